//! Error handling for pueue.
use thiserror::Error;

use crate::task::TaskStatus;

/// Errors raised by the control socket helpers.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Socket I/O error.
    #[error("control socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Error serializing or deserializing a message.
    #[error("failed to serialise message: {0}")]
    Serde(#[from] serde_json::Error),

    /// A frame announced or carried more bytes than the protocol allows.
    #[error("message of {0} bytes exceeds the frame limit")]
    Oversized(usize),

    /// Control socket not available or daemon not running.
    #[error("daemon socket not available")]
    NotAvailable,
}

/// Errors raised while reading or writing the daemon options file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Error reading or writing the options file.
    #[error("failed to access options file: {0}")]
    Io(#[from] std::io::Error),

    /// Error serializing the options for persistence.
    #[error("failed to serialise options: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The `config` request named an option that does not exist.
    #[error("unknown option '{0}'")]
    UnknownOption(String),

    /// The `config` request carried a value the option cannot hold.
    #[error("invalid value '{value}' for option '{option}'")]
    InvalidValue {
        /// The option that was being set.
        option: String,
        /// The rejected value.
        value: String,
    },
}

/// Reasons an operation on a single queue entry is refused.
///
/// These map one-to-one onto the per-key error messages aggregated into
/// bulk responses.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The key is not present in the queue.
    #[error("no command with key #{0}")]
    UnknownKey(usize),

    /// The entry owns a child process and cannot be touched.
    #[error("command #{0} is currently running")]
    Running(usize),

    /// The entry is in a status the operation does not accept.
    #[error("command #{key} is {status}")]
    WrongStatus {
        /// The entry that was addressed.
        key: usize,
        /// Its current status.
        status: TaskStatus,
    },

    /// Every slot is taken, the entry cannot be started right now.
    #[error("no free slot to start command #{0}")]
    NoFreeSlot(usize),

    /// There is no child process for this entry.
    #[error("no running process for command #{0}")]
    NoProcess(usize),

    /// Delivering a signal to the child's process group failed.
    #[error("failed to signal command #{key}: {source}")]
    Signal {
        /// The entry whose child was signalled.
        key: usize,
        /// The underlying errno.
        source: nix::errno::Errno,
    },

    /// Writing to the child's stdin pipe failed.
    #[error("failed to write to stdin of command #{key}: {source}")]
    Stdin {
        /// The entry whose child was addressed.
        key: usize,
        /// The underlying error.
        source: std::io::Error,
    },
}

/// Errors that abort the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// I/O error while setting up or tearing down daemon state.
    #[error("daemon I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The listening socket could not be bound.
    #[error("failed to bind control socket: {0}")]
    Bind(#[source] std::io::Error),

    /// Another daemon already holds the advisory lock for this root.
    #[error("another daemon is already running for this directory")]
    AlreadyRunning,

    /// Error in the options file.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Error on the control socket.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
