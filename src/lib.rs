//! A personal queue for long-running shell commands.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// Test dependencies are only used in test code
#[cfg(test)]
use assert_cmd as _;
use ctrlc as _;
use libc as _;
#[cfg(test)]
use predicates as _;
use tracing_subscriber as _;

/// CLI parsing.
pub mod cli;

/// Client-side request plumbing.
pub mod client;

/// Daemon event loop and dispatch.
pub mod daemon;

/// Errors.
pub mod error;

/// Child process supervision.
pub mod handler;

/// Session and operational logs.
pub mod logger;

/// Filesystem layout.
pub mod paths;

/// Wire protocol.
pub mod protocol;

/// Queue state machine.
pub mod queue;

/// Persisted daemon options.
pub mod settings;

/// Signal name parsing.
pub mod signals;

/// Queue entries.
pub mod task;
