//! A single queue entry and its lifecycle.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::TaskError;

/// Lifecycle status of a queue entry.
///
/// `done` and `failed` are terminal; `running`, `paused`, `stopping` and
/// `killing` mean the entry currently owns a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a free slot.
    Queued,
    /// Excluded from scheduling until explicitly enqueued again.
    Stashed,
    /// Child process is executing.
    Running,
    /// Child process received the suspend signal.
    Paused,
    /// Terminate signal sent, waiting for the child to exit.
    Stopping,
    /// Kill signal sent, waiting for the child to exit.
    Killing,
    /// Child exited with returncode zero.
    Done,
    /// Child exited with a non-zero returncode or could not be spawned.
    Failed,
}

impl TaskStatus {
    /// Whether the entry has finished for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// Whether the entry currently occupies a slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Running | TaskStatus::Paused | TaskStatus::Stopping | TaskStatus::Killing
        )
    }

    /// Whether the entry-level state machine allows `self -> next`.
    pub fn can_transition(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Stashed)
                | (Queued, Failed)
                | (Stashed, Queued)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopping)
                | (Paused, Stopping)
                | (Running, Killing)
                | (Paused, Killing)
                | (Running, Done)
                | (Running, Failed)
                | (Paused, Done)
                | (Paused, Failed)
                | (Stopping, Queued)
                | (Stopping, Killing)
                | (Killing, Failed)
        )
    }
}

/// One shell command submitted by a client, plus its lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// The shell command line as a single string.
    pub command: String,
    /// Absolute working directory captured at submission.
    pub path: PathBuf,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Exit code of the child, empty until it terminated.
    pub returncode: Option<i32>,
    /// Wall-clock `HH:MM` stamp taken at spawn, empty until then.
    pub start: String,
    /// Wall-clock `HH:MM` stamp taken at reap, empty until then.
    pub end: String,
    /// Captured stdout of the finished child.
    pub stdout: String,
    /// Captured stderr of the finished child.
    pub stderr: String,
}

impl Task {
    /// Creates a fresh `queued` entry for a command.
    pub fn new(command: String, path: PathBuf) -> Self {
        Self {
            command,
            path,
            status: TaskStatus::Queued,
            returncode: None,
            start: String::new(),
            end: String::new(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// A fresh `queued` copy keeping only command and working directory.
    pub fn requeued(&self) -> Self {
        Task::new(self.command.clone(), self.path.clone())
    }

    /// Moves the entry to `next` if the state machine allows it.
    pub fn transition(&mut self, key: usize, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition(next) {
            return Err(TaskError::WrongStatus {
                key,
                status: self.status,
            });
        }
        self.status = next;
        Ok(())
    }
}
