//! The in-memory queue of entries and its on-disk mirror.
use std::{collections::BTreeMap, fs, path::PathBuf};

use tracing::{error, warn};

use crate::{
    error::TaskError,
    paths::Paths,
    task::{Task, TaskStatus},
};

/// Ordered map of entries keyed by monotonically assigned keys.
///
/// The queue is the single owner of all entries; the process handler refers
/// to them by key only. Every mutation that changes the set of entries or a
/// status is persisted before the daemon acknowledges it to the client.
#[derive(Debug)]
pub struct Queue {
    tasks: BTreeMap<usize, Task>,
    next_key: usize,
    queue_file: PathBuf,
}

impl Queue {
    /// Restores the queue from disk. A corrupt file is discarded.
    pub fn load(paths: &Paths) -> Self {
        let queue_file = paths.queue_file();
        let tasks: BTreeMap<usize, Task> = match fs::read(&queue_file) {
            Ok(bytes) => match bincode::deserialize(&bytes) {
                Ok(tasks) => tasks,
                Err(err) => {
                    warn!("Queue file corrupted, starting with an empty queue: {err}");
                    let _ = fs::remove_file(&queue_file);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        let next_key = tasks.keys().next_back().map_or(0, |key| key + 1);
        Self {
            tasks,
            next_key,
            queue_file,
        }
    }

    /// Resets entries interrupted by a previous session back to `queued`.
    pub fn clean(&mut self) {
        let mut dirty = false;
        for task in self.tasks.values_mut() {
            if task.status.is_active() {
                task.status = TaskStatus::Queued;
                task.start.clear();
                task.end.clear();
                dirty = true;
            }
        }
        if dirty {
            self.save();
        }
    }

    /// Persists the queue with a write-to-temp-and-rename.
    ///
    /// Persistence is best effort; failures are logged and the daemon keeps
    /// serving from memory.
    pub fn save(&self) {
        let bytes = match bincode::serialize(&self.tasks) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("Failed to serialise queue: {err}");
                return;
            }
        };

        let temp = self.queue_file.with_extension("tmp");
        if let Err(err) = fs::write(&temp, &bytes).and_then(|()| fs::rename(&temp, &self.queue_file))
        {
            error!("Failed to write queue file: {err}");
        }
    }

    /// Allocates the next key and inserts a fresh `queued` entry.
    pub fn add_new(&mut self, command: String, path: PathBuf) -> usize {
        let key = self.next_key;
        self.next_key += 1;
        self.tasks.insert(key, Task::new(command, path));
        self.save();
        key
    }

    /// Removes an entry, refusing while it occupies a slot.
    pub fn remove(&mut self, key: usize) -> Result<(), TaskError> {
        let task = self.tasks.get(&key).ok_or(TaskError::UnknownKey(key))?;
        if task.status.is_active() {
            return Err(TaskError::Running(key));
        }
        self.tasks.remove(&key);
        self.save();
        Ok(())
    }

    /// Drops an entry unconditionally.
    ///
    /// Only used when a stopped or killed child is reaped with the remove
    /// flag set; client-initiated removal goes through [`Queue::remove`].
    pub fn delete(&mut self, key: usize) {
        self.tasks.remove(&key);
        self.save();
    }

    /// Swaps the contents of two entries; their keys stay in place.
    pub fn switch(&mut self, first: usize, second: usize) -> Result<(), TaskError> {
        for key in [first, second] {
            let task = self.tasks.get(&key).ok_or(TaskError::UnknownKey(key))?;
            if task.status.is_active() {
                return Err(TaskError::Running(key));
            }
        }

        // Both keys were just checked, the clones cannot fail.
        if let (Some(a), Some(b)) = (
            self.tasks.get(&first).cloned(),
            self.tasks.get(&second).cloned(),
        ) {
            self.tasks.insert(first, b);
            self.tasks.insert(second, a);
            self.save();
        }
        Ok(())
    }

    /// Enqueues a fresh copy of a finished entry under a new key.
    pub fn restart(&mut self, key: usize) -> Result<usize, TaskError> {
        let task = self.tasks.get(&key).ok_or(TaskError::UnknownKey(key))?;
        if !task.status.is_terminal() {
            return Err(TaskError::WrongStatus {
                key,
                status: task.status,
            });
        }

        let copy = task.requeued();
        let new_key = self.next_key;
        self.next_key += 1;
        self.tasks.insert(new_key, copy);
        self.save();
        Ok(new_key)
    }

    /// Excludes a queued entry from scheduling.
    pub fn stash(&mut self, key: usize) -> Result<(), TaskError> {
        let task = self.tasks.get_mut(&key).ok_or(TaskError::UnknownKey(key))?;
        task.transition(key, TaskStatus::Stashed)?;
        self.save();
        Ok(())
    }

    /// Returns a stashed entry to the queue.
    pub fn enqueue(&mut self, key: usize) -> Result<(), TaskError> {
        let task = self.tasks.get_mut(&key).ok_or(TaskError::UnknownKey(key))?;
        if task.status != TaskStatus::Stashed {
            return Err(TaskError::WrongStatus {
                key,
                status: task.status,
            });
        }
        task.transition(key, TaskStatus::Queued)?;
        self.save();
        Ok(())
    }

    /// Removes all finished entries.
    pub fn clear(&mut self) {
        self.tasks.retain(|_, task| !task.status.is_terminal());
        self.save();
    }

    /// Drops every entry and resets key allocation.
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.next_key = 0;
        self.save();
    }

    /// The smallest key waiting in `queued`, if any.
    pub fn next(&self) -> Option<usize> {
        self.tasks
            .iter()
            .find(|(_, task)| task.status == TaskStatus::Queued)
            .map(|(key, _)| *key)
    }

    /// All entries in key order.
    pub fn tasks(&self) -> &BTreeMap<usize, Task> {
        &self.tasks
    }

    /// Looks up one entry.
    pub fn get(&self, key: usize) -> Option<&Task> {
        self.tasks.get(&key)
    }

    /// Looks up one entry mutably.
    pub fn get_mut(&mut self, key: usize) -> Option<&mut Task> {
        self.tasks.get_mut(&key)
    }

    /// Whether the queue holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
