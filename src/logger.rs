//! Session log of finished commands and the daemon's operational log.
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs::{self, File},
    io::{self, Write},
    path::PathBuf,
};

use chrono::{Local, NaiveDateTime};
use tracing::debug;

use crate::{paths::Paths, task::Task};

const LOG_HEADER: &str = "Pueue log for executed commands:\n\n";
const STAMP_FORMAT: &str = "%Y%m%d-%H%M";

/// Writes the human-readable `queue.log` and manages its rotation.
pub struct TaskLogger {
    paths: Paths,
}

impl TaskLogger {
    /// Creates a logger writing below the paths' log directory.
    pub fn new(paths: &Paths) -> Self {
        Self {
            paths: paths.clone(),
        }
    }

    /// Overwrites `queue.log` with a summary of every finished entry.
    pub fn write(&self, tasks: &BTreeMap<usize, Task>) -> io::Result<()> {
        let mut out = String::from(LOG_HEADER);
        for (key, task) in tasks {
            if !task.status.is_terminal() {
                continue;
            }
            let Some(returncode) = task.returncode else {
                continue;
            };

            let _ = writeln!(
                out,
                "Command #{key} exited with returncode {returncode}: \"{}\"",
                task.command
            );
            let _ = writeln!(out, "Path: {}", task.path.display());
            let _ = writeln!(out, "Start: {}, End: {}", task.start, task.end);
            if !task.stderr.is_empty() {
                let _ = writeln!(out, "Stderr output:\n    {}", task.stderr);
            }
            if !task.stdout.is_empty() {
                let _ = writeln!(out, "Stdout output:\n    {}", task.stdout);
            }
            out.push('\n');
        }

        let target = self.paths.session_log();
        let temp = target.with_extension("log.tmp");
        fs::write(&temp, out)?;
        fs::rename(&temp, &target)
    }

    /// Archives the current `queue.log` under a timestamped name and starts
    /// a fresh empty one.
    pub fn rotate(&self) -> io::Result<()> {
        let current = self.paths.session_log();
        if current.exists() {
            let stamp = Local::now().format(STAMP_FORMAT).to_string();
            fs::rename(&current, self.paths.rotated_log(&stamp))?;
        }
        fs::write(&current, LOG_HEADER)
    }

    /// Deletes rotated logs older than `max_age` seconds.
    ///
    /// Age is determined by the timestamp embedded in the file name, not by
    /// mtime. The current `queue.log` is never touched.
    pub fn remove_old(&self, max_age: u64) -> io::Result<()> {
        let now = Local::now().naive_local();
        for entry in fs::read_dir(self.paths.log_dir())? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stamp) = name
                .strip_prefix("queue-")
                .and_then(|rest| rest.strip_suffix(".log"))
            else {
                continue;
            };
            let Ok(rotated_at) = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT) else {
                continue;
            };

            let age = now.signed_duration_since(rotated_at).num_seconds();
            if age > max_age as i64 {
                debug!("Purging rotated log {name}");
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// Size-rotating writer backing the daemon's operational log.
///
/// Keeps `daemon.log` plus numbered backups, shifting `daemon.log.1` ..
/// `daemon.log.N` on overflow the way a classic rotating file handler does.
pub struct RotatingLogWriter {
    path: PathBuf,
    file: File,
    max_size: u64,
    backups: usize,
}

impl RotatingLogWriter {
    /// Opens the operational log with the default limits (5 MiB, 7 backups).
    pub fn open(path: PathBuf) -> io::Result<Self> {
        Self::with_limits(path, 5 * 1024 * 1024, 7)
    }

    /// Opens the operational log with explicit limits.
    pub fn with_limits(path: PathBuf, max_size: u64, backups: usize) -> io::Result<Self> {
        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            max_size,
            backups,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        for index in (1..self.backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, self.backup_path(1))?;
        }
        self.file = File::create(&self.path)?;
        Ok(())
    }
}

impl Write for RotatingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let current = self.file.metadata().map(|meta| meta.len()).unwrap_or(0);
        if current + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
