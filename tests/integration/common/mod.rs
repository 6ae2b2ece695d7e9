#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use pueue::{
    daemon::Daemon,
    paths::Paths,
    protocol::{self, Request, Response, StatusSnapshot},
    task::TaskStatus,
};
use tempfile::TempDir;

/// Runs a daemon on its own temporary root for the duration of a test.
pub struct DaemonHarness {
    root: Option<TempDir>,
    pub paths: Paths,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DaemonHarness {
    pub fn start() -> Self {
        Self::start_in(TempDir::new().unwrap())
    }

    /// Starts a daemon on an existing root, e.g. to simulate a restart.
    pub fn start_in(root: TempDir) -> Self {
        let paths = Paths::new(Some(root.path()));
        let mut daemon = Daemon::new(paths.clone()).expect("daemon should start");
        let shutdown = daemon.shutdown_handle();
        let handle = thread::spawn(move || {
            let _ = daemon.run();
        });

        let harness = Self {
            root: Some(root),
            paths,
            shutdown,
            handle: Some(handle),
        };
        harness.wait_until(|harness| {
            protocol::send_request(&harness.paths, &Request::Status).is_ok()
        });
        harness
    }

    /// Shuts the daemon down and hands the root back for a later restart.
    pub fn stop(mut self) -> TempDir {
        self.shutdown_daemon();
        self.root.take().expect("root still owned")
    }

    pub fn root_path(&self) -> &Path {
        self.root.as_ref().expect("root still owned").path()
    }

    pub fn send(&self, request: &Request) -> Response {
        protocol::send_request(&self.paths, request).expect("daemon should be reachable")
    }

    /// Enqueues a command with the harness root as its working directory.
    pub fn add(&self, command: &str) -> Response {
        self.send(&Request::Add {
            command: command.to_string(),
            path: self.root_path().to_path_buf(),
        })
    }

    pub fn status(&self) -> StatusSnapshot {
        match self.send(&Request::Status) {
            Response::Status(snapshot) => *snapshot,
            other => panic!("expected a status snapshot, got {other:?}"),
        }
    }

    pub fn task_status(&self, key: usize) -> Option<TaskStatus> {
        self.status().tasks.get(&key).map(|task| task.status)
    }

    pub fn wait_for_status(&self, key: usize, status: TaskStatus) {
        self.wait_until(|harness| harness.task_status(key) == Some(status));
    }

    pub fn wait_for_removed(&self, key: usize) {
        self.wait_until(|harness| harness.task_status(key).is_none());
    }

    pub fn wait_until(&self, predicate: impl Fn(&Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if predicate(self) {
                return;
            }
            if Instant::now() >= deadline {
                let snapshot = protocol::send_request(&self.paths, &Request::Status);
                panic!("Timed out waiting for queue condition; status: {snapshot:?}");
            }
            thread::sleep(Duration::from_millis(100));
        }
    }

    fn shutdown_daemon(&mut self) {
        let _ = protocol::send_request(&self.paths, &Request::StopDaemon);
        // Covers the case where the socket is already gone.
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DaemonHarness {
    fn drop(&mut self) {
        self.shutdown_daemon();
    }
}
