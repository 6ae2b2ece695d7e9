//! Resolves the on-disk layout shared by the daemon and the client.
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

/// Locations of everything pueue persists below a root directory.
///
/// The root defaults to `$HOME` and can be overridden with `--root`; the
/// daemon and the client must agree on it to find the same socket.
#[derive(Debug, Clone)]
pub struct Paths {
    config_dir: PathBuf,
    log_dir: PathBuf,
}

impl Paths {
    /// Resolves the layout for the given root, falling back to `$HOME`.
    ///
    /// A relative root is anchored at the current working directory so the
    /// paths stay valid after the daemon detaches and changes directory.
    pub fn new(root: Option<&Path>) -> Self {
        let root = match root {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf()),
            None => env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/")),
        };

        Self {
            config_dir: root.join(".config/pueue"),
            log_dir: root.join(".local/share/pueue"),
        }
    }

    /// Creates the config and log directories if they are missing.
    pub fn create_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.config_dir)?;
        fs::create_dir_all(&self.log_dir)
    }

    /// Directory holding the queue file, options, socket and spool files.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Directory holding the session logs of finished commands.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// The unix socket the daemon listens on.
    pub fn socket(&self) -> PathBuf {
        self.config_dir.join("pueue.sock")
    }

    /// Advisory lock file guarding against concurrent daemons.
    pub fn lock_file(&self) -> PathBuf {
        self.config_dir.join("daemon.lock")
    }

    /// Binary serialization of the queue.
    pub fn queue_file(&self) -> PathBuf {
        self.config_dir.join("queue")
    }

    /// The persisted daemon options.
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("pueue.ini")
    }

    /// Operational log written by the daemon itself.
    pub fn daemon_log(&self) -> PathBuf {
        self.config_dir.join("daemon.log")
    }

    /// Spool file capturing the stdout of the child behind `key`.
    pub fn stdout_spool(&self, key: usize) -> PathBuf {
        self.config_dir.join(format!("pueue_process_{key}.stdout"))
    }

    /// Spool file capturing the stderr of the child behind `key`.
    pub fn stderr_spool(&self, key: usize) -> PathBuf {
        self.config_dir.join(format!("pueue_process_{key}.stderr"))
    }

    /// The current session log of finished commands.
    pub fn session_log(&self) -> PathBuf {
        self.log_dir.join("queue.log")
    }

    /// A rotated session log carrying its rotation timestamp in the name.
    pub fn rotated_log(&self, stamp: &str) -> PathBuf {
        self.log_dir.join(format!("queue-{stamp}.log"))
    }
}
