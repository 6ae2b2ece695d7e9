//! Wire protocol spoken over the control socket.
//!
//! Every connection carries exactly one request and one response, each
//! framed as a big-endian `u32` length prefix followed by a JSON payload.
//! The daemon never assumes a single `read` returns a whole message.
use std::{
    collections::BTreeMap,
    io::{Read, Write},
    os::unix::net::UnixStream,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    error::ProtocolError,
    paths::Paths,
    task::{Task, TaskStatus},
};

/// Upper bound for a single framed message.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Message sent from a client invocation to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Request {
    /// Enqueue a new command.
    Add {
        /// The shell command line.
        command: String,
        /// Working directory captured by the client.
        path: PathBuf,
    },
    /// Remove entries that are not occupying a slot.
    Remove {
        /// Entries to remove.
        keys: Vec<usize>,
    },
    /// Swap the contents of two entries.
    Switch {
        /// One side of the swap.
        first: usize,
        /// The other side.
        second: usize,
    },
    /// Write to the stdin of a running child.
    Send {
        /// The entry whose child receives the input.
        key: usize,
        /// Data written to the pipe verbatim.
        input: String,
    },
    /// Fetch the daemon state and a queue snapshot.
    Status,
    /// Resume the daemon, or start the given entries.
    Start {
        /// Entries to resume or spawn; empty means the whole daemon.
        #[serde(default)]
        keys: Vec<usize>,
    },
    /// Pause the daemon, or suspend the given entries.
    Pause {
        /// Entries to suspend; empty means the whole daemon.
        #[serde(default)]
        keys: Vec<usize>,
        /// Leave running children untouched and only stop scheduling.
        #[serde(default)]
        wait: bool,
    },
    /// Exclude queued entries from scheduling.
    Stash {
        /// Entries to stash.
        keys: Vec<usize>,
    },
    /// Return stashed entries to the queue.
    Enqueue {
        /// Entries to enqueue.
        keys: Vec<usize>,
    },
    /// Enqueue fresh copies of finished entries.
    Restart {
        /// Entries to clone.
        keys: Vec<usize>,
    },
    /// Terminate children, requeueing their entries on reap.
    Stop {
        /// Entries to stop; empty means all children plus the daemon.
        #[serde(default)]
        keys: Vec<usize>,
        /// Delete the entries on reap instead of requeueing them.
        #[serde(default)]
        remove: bool,
    },
    /// Kill children.
    Kill {
        /// Entries to kill; empty means all children plus the daemon.
        #[serde(default)]
        keys: Vec<usize>,
        /// Delete the entries on reap instead of marking them failed.
        #[serde(default)]
        remove: bool,
        /// Signal name or number to deliver instead of the default kill.
        #[serde(default)]
        signal: Option<String>,
    },
    /// Kill everything and wipe the queue.
    Reset,
    /// Drop all finished entries, archiving their log.
    Clear,
    /// Update a single daemon option.
    Config {
        /// Option name, e.g. `maxProcesses`.
        option: String,
        /// New value, parsed according to the option.
        value: String,
    },
    /// Kill all children and shut the daemon down.
    #[serde(rename = "STOPDAEMON")]
    StopDaemon,
}

/// Message sent by the daemon in reply to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// The request was carried out.
    Success(String),
    /// The request was refused or failed.
    Error(String),
    /// Snapshot payload for a `status` request.
    Status(Box<StatusSnapshot>),
}

/// Scheduling state of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DaemonState {
    /// The daemon spawns queued entries as slots free up.
    Running,
    /// The daemon does not spawn anything until resumed.
    Paused,
}

/// Queue view returned by `status`.
///
/// Per-entry stdout/stderr are stripped; they can be large and are served
/// from the session log instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Scheduling state of the daemon.
    pub state: DaemonState,
    /// All entries, keyed by their queue key.
    pub tasks: BTreeMap<usize, TaskSummary>,
}

/// One entry as reported by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    /// The shell command line.
    pub command: String,
    /// Working directory the command runs in.
    pub path: PathBuf,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Exit code, once the child terminated.
    pub returncode: Option<i32>,
    /// `HH:MM` spawn stamp.
    pub start: String,
    /// `HH:MM` reap stamp.
    pub end: String,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            command: task.command.clone(),
            path: task.path.clone(),
            status: task.status,
            returncode: task.returncode,
            start: task.start.clone(),
            end: task.end.clone(),
        }
    }
}

/// Writes one length-prefixed frame.
pub fn write_message(stream: &mut UnixStream, payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::Oversized(payload.len()));
    }
    stream.write_all(&(payload.len() as u32).to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame, enforcing the size bound.
pub fn read_message(stream: &mut UnixStream) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::Oversized(len));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

/// Reads and decodes a request. Used by the daemon event loop.
pub fn read_request(stream: &mut UnixStream) -> Result<Request, ProtocolError> {
    let payload = read_message(stream)?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Encodes and writes a response to the connected client.
pub fn write_response(stream: &mut UnixStream, response: &Response) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(response)?;
    write_message(stream, &payload)
}

/// Sends a request to the daemon and waits for its response.
pub fn send_request(paths: &Paths, request: &Request) -> Result<Response, ProtocolError> {
    let socket = paths.socket();
    if !socket.exists() {
        return Err(ProtocolError::NotAvailable);
    }

    let mut stream = UnixStream::connect(socket).map_err(|_| ProtocolError::NotAvailable)?;
    let payload = serde_json::to_vec(request)?;
    write_message(&mut stream, &payload)?;

    let response = read_message(&mut stream)?;
    Ok(serde_json::from_slice(&response)?)
}
