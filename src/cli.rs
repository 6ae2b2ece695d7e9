//! Command-line interface for pueue.
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for pueue.
#[derive(Parser)]
#[command(name = "pueue", version, author)]
#[command(about = "A personal queue for long-running shell commands", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Directory containing `.config/pueue` (defaults to the home directory).
    #[arg(long, value_name = "DIR", global = true)]
    pub root: Option<PathBuf>,

    /// Fork the daemon into the background and run its event loop.
    #[arg(long, conflicts_with_all = ["no_daemon", "stop_daemon"])]
    pub daemon: bool,

    /// Run the daemon in the foreground.
    #[arg(long = "no-daemon", conflicts_with = "stop_daemon")]
    pub no_daemon: bool,

    /// Ask the running daemon to shut down.
    #[arg(long = "stop-daemon")]
    pub stop_daemon: bool,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for pueue.
#[derive(Subcommand)]
pub enum Commands {
    /// Append a shell command to the queue.
    Add {
        /// The command line to enqueue; shell syntax is allowed.
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Remove commands from the queue.
    Remove {
        /// Keys of the entries to remove.
        #[arg(required = true)]
        keys: Vec<usize>,
    },

    /// Swap the places of two commands.
    Switch {
        /// One side of the swap.
        first: usize,
        /// The other side.
        second: usize,
    },

    /// Write to the stdin of a running command.
    Send {
        /// Key of the entry whose child receives the input.
        key: usize,
        /// Data written to the pipe verbatim.
        input: String,
    },

    /// Show the daemon state and the queue.
    Status,

    /// Resume the daemon, or start specific commands.
    Start {
        /// Keys to resume or spawn; resumes the daemon when omitted.
        keys: Vec<usize>,
    },

    /// Pause the daemon, or suspend specific commands.
    Pause {
        /// Keys to suspend; pauses the daemon when omitted.
        keys: Vec<usize>,

        /// Let running commands finish instead of suspending them.
        #[arg(short, long)]
        wait: bool,
    },

    /// Exclude queued commands from scheduling.
    Stash {
        /// Keys of the entries to stash.
        #[arg(required = true)]
        keys: Vec<usize>,
    },

    /// Return stashed commands to the queue.
    Enqueue {
        /// Keys of the entries to enqueue.
        #[arg(required = true)]
        keys: Vec<usize>,
    },

    /// Enqueue a fresh copy of finished commands.
    Restart {
        /// Keys of the entries to clone.
        #[arg(required = true)]
        keys: Vec<usize>,
    },

    /// Terminate running commands, requeueing them once they exit.
    Stop {
        /// Keys to stop; stops everything and pauses the daemon when omitted.
        keys: Vec<usize>,

        /// Remove the entries instead of requeueing them.
        #[arg(short, long)]
        remove: bool,
    },

    /// Kill running commands.
    Kill {
        /// Keys to kill; kills everything and pauses the daemon when omitted.
        keys: Vec<usize>,

        /// Remove the entries instead of marking them failed.
        #[arg(short, long)]
        remove: bool,

        /// Signal to deliver, as a name or number (e.g. `term` or `9`).
        #[arg(short, long)]
        signal: Option<String>,
    },

    /// Kill everything and wipe the queue.
    Reset,

    /// Drop all finished commands and archive their log.
    Clear,

    /// Update a daemon option.
    Config {
        /// Option name (`maxProcesses`, `stopAtError`, `resumeAfterStart`, `logTime`).
        option: String,
        /// The new value.
        value: String,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
