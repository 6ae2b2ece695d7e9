//! Spawns, supervises and signals the child processes behind queue entries.
use std::{
    collections::{BTreeMap, HashSet},
    fs::{self, File},
    io::Write as _,
    os::unix::process::{CommandExt, ExitStatusExt},
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::Duration,
};

use chrono::Local;
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::TaskError,
    paths::Paths,
    queue::Queue,
    task::TaskStatus,
};

/// Outcome of one reap pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct FinishReport {
    /// At least one entry reached `done` or `failed`.
    pub finished: bool,
    /// At least one entry finished on its own with a non-zero returncode.
    pub failed: bool,
}

/// Supervises up to `max_processes` children on behalf of the queue.
///
/// The handler owns the child handles and their spool files but never the
/// entries themselves; it addresses the queue by key. All methods run on the
/// daemon's event loop, there is no internal threading.
pub struct ProcessHandler {
    paths: Paths,
    max_processes: usize,
    children: BTreeMap<usize, Child>,
    remove_on_reap: HashSet<usize>,
}

impl ProcessHandler {
    /// Creates a handler with a single slot.
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            max_processes: 1,
            children: BTreeMap::new(),
            remove_on_reap: HashSet::new(),
        }
    }

    /// Sets the bound on concurrently supervised children.
    ///
    /// Lowering the bound never touches existing children; new spawns simply
    /// wait until enough of them finish.
    pub fn set_max(&mut self, amount: usize) {
        self.max_processes = amount;
    }

    /// Whether any child is still alive or unreaped.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Number of currently supervised children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Spawns queued entries while free slots remain.
    ///
    /// Returns `true` when an entry could not be spawned and went straight
    /// to `failed`, so the daemon knows to rewrite the session log.
    pub fn check_for_new(&mut self, queue: &mut Queue) -> bool {
        let mut spawn_failed = false;
        while self.children.len() < self.max_processes {
            let Some(key) = queue.next() else { break };
            if !self.spawn(key, queue) {
                spawn_failed = true;
            }
        }
        spawn_failed
    }

    /// Spawns the child for one queued entry.
    ///
    /// Returns `false` when the entry was marked `failed` instead, either
    /// because its working directory vanished or the shell could not be
    /// launched.
    pub fn spawn(&mut self, key: usize, queue: &mut Queue) -> bool {
        let Some(task) = queue.get(key) else {
            return true;
        };
        let command = task.command.clone();
        let path = task.path.clone();

        if !path.exists() {
            let message = format!(
                "The directory for this command doesn't exist anymore: {}",
                path.display()
            );
            warn!("Not spawning command #{key}: {message}");
            self.fail_spawn(key, queue, message);
            return false;
        }

        match self.launch(key, &command, &path) {
            Ok(child) => {
                debug!("Spawned command #{key} as pid {}", child.id());
                self.children.insert(key, child);
                if let Some(task) = queue.get_mut(key) {
                    task.status = TaskStatus::Running;
                    task.start = timestamp();
                }
                queue.save();
                true
            }
            Err(err) => {
                warn!("Failed to spawn command #{key}: {err}");
                self.fail_spawn(key, queue, format!("Failed to spawn: {err}"));
                false
            }
        }
    }

    fn launch(&self, key: usize, command: &str, path: &Path) -> std::io::Result<Child> {
        let stdout = File::create(self.paths.stdout_spool(key))?;
        let stderr = File::create(self.paths.stderr_spool(key))?;

        Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .current_dir(path)
            // Each child leads its own process group so signals reach the
            // shell and every descendant it spawned.
            .process_group(0)
            .spawn()
    }

    fn fail_spawn(&mut self, key: usize, queue: &mut Queue, message: String) {
        if let Some(task) = queue.get_mut(key) {
            task.status = TaskStatus::Failed;
            task.stdout = String::new();
            task.stderr = message;
        }
        queue.save();
    }

    /// Polls all children and finalizes any that terminated.
    pub fn check_finished(&mut self, queue: &mut Queue) -> FinishReport {
        let mut report = FinishReport::default();
        let mut finished = Vec::new();

        for (&key, child) in &mut self.children {
            match child.try_wait() {
                Ok(Some(status)) => finished.push((key, status)),
                Ok(None) => {}
                Err(err) => error!("Failed to poll command #{key}: {err}"),
            }
        }

        for (key, status) in finished {
            self.children.remove(&key);
            let remove = self.remove_on_reap.remove(&key);
            let (stdout, stderr) = self.collect_spool(key);

            let Some(previous) = queue.get(key).map(|task| task.status) else {
                continue;
            };

            if remove && matches!(previous, TaskStatus::Stopping | TaskStatus::Killing) {
                debug!("Dropping command #{key} after reap");
                queue.delete(key);
                continue;
            }

            let Some(task) = queue.get_mut(key) else {
                continue;
            };
            match previous {
                TaskStatus::Stopping => {
                    task.status = TaskStatus::Queued;
                    task.returncode = None;
                    task.start.clear();
                    task.end.clear();
                    task.stdout.clear();
                    task.stderr.clear();
                }
                TaskStatus::Killing => {
                    task.status = TaskStatus::Failed;
                    task.returncode = Some(exit_code(status));
                    task.end = timestamp();
                    task.stdout = stdout;
                    task.stderr = stderr;
                    report.finished = true;
                }
                _ => {
                    let code = exit_code(status);
                    info!("Command #{key} finished with returncode {code}");
                    task.status = if code == 0 {
                        TaskStatus::Done
                    } else {
                        TaskStatus::Failed
                    };
                    task.returncode = Some(code);
                    task.end = timestamp();
                    task.stdout = stdout;
                    task.stderr = stderr;
                    report.finished = true;
                    if code != 0 {
                        report.failed = true;
                    }
                }
            }
            queue.save();
        }

        report
    }

    fn collect_spool(&self, key: usize) -> (String, String) {
        let stdout_path = self.paths.stdout_spool(key);
        let stderr_path = self.paths.stderr_spool(key);
        let stdout = fs::read_to_string(&stdout_path).unwrap_or_default();
        let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();
        let _ = fs::remove_file(stdout_path);
        let _ = fs::remove_file(stderr_path);
        (stdout, stderr)
    }

    /// Writes client-supplied data to the stdin pipe of a running child.
    pub fn send_to_child(&mut self, key: usize, input: &str) -> Result<(), TaskError> {
        let child = self.children.get_mut(&key).ok_or(TaskError::NoProcess(key))?;
        let stdin = child.stdin.as_mut().ok_or(TaskError::NoProcess(key))?;
        stdin
            .write_all(input.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(|source| TaskError::Stdin { key, source })
    }

    /// Resumes a paused entry, or spawns a queued one if a slot is free.
    pub fn start_task(&mut self, key: usize, queue: &mut Queue) -> Result<(), TaskError> {
        let status = queue
            .get(key)
            .map(|task| task.status)
            .ok_or(TaskError::UnknownKey(key))?;

        match status {
            TaskStatus::Paused => {
                self.signal_group(key, Signal::SIGCONT)?;
                if let Some(task) = queue.get_mut(key) {
                    task.transition(key, TaskStatus::Running)?;
                }
                queue.save();
                Ok(())
            }
            TaskStatus::Queued => {
                if self.children.len() >= self.max_processes {
                    return Err(TaskError::NoFreeSlot(key));
                }
                self.spawn(key, queue);
                Ok(())
            }
            other => Err(TaskError::WrongStatus { key, status: other }),
        }
    }

    /// Suspends a running entry.
    pub fn pause_task(&mut self, key: usize, queue: &mut Queue) -> Result<(), TaskError> {
        let status = queue
            .get(key)
            .map(|task| task.status)
            .ok_or(TaskError::UnknownKey(key))?;
        if status != TaskStatus::Running {
            return Err(TaskError::WrongStatus { key, status });
        }

        self.signal_group(key, Signal::SIGSTOP)?;
        if let Some(task) = queue.get_mut(key) {
            task.transition(key, TaskStatus::Paused)?;
        }
        queue.save();
        Ok(())
    }

    /// Sends the terminate signal and marks the entry `stopping`.
    ///
    /// On reap the entry returns to `queued`, or is deleted when `remove`
    /// is set.
    pub fn stop_task(&mut self, key: usize, remove: bool, queue: &mut Queue) -> Result<(), TaskError> {
        self.halt_task(key, remove, Signal::SIGTERM, TaskStatus::Stopping, queue)
    }

    /// Sends the kill signal, or a caller-chosen one, and marks the entry
    /// `killing`.
    ///
    /// On reap the entry becomes `failed`, or is deleted when `remove` is
    /// set. With a signal that does not terminate the child, the entry stays
    /// `killing` until the child eventually exits.
    pub fn kill_task(
        &mut self,
        key: usize,
        remove: bool,
        signal: Option<Signal>,
        queue: &mut Queue,
    ) -> Result<(), TaskError> {
        let signal = signal.unwrap_or(Signal::SIGKILL);
        self.halt_task(key, remove, signal, TaskStatus::Killing, queue)
    }

    fn halt_task(
        &mut self,
        key: usize,
        remove: bool,
        signal: Signal,
        mark: TaskStatus,
        queue: &mut Queue,
    ) -> Result<(), TaskError> {
        if !self.children.contains_key(&key) {
            return Err(TaskError::NoProcess(key));
        }
        let status = queue
            .get(key)
            .map(|task| task.status)
            .ok_or(TaskError::UnknownKey(key))?;
        if !status.can_transition(mark) {
            return Err(TaskError::WrongStatus { key, status });
        }

        self.signal_group(key, signal)?;
        if status == TaskStatus::Paused && signal != Signal::SIGSTOP {
            // A suspended child only handles the signal once it runs again.
            let _ = self.signal_group(key, Signal::SIGCONT);
        }

        if let Some(task) = queue.get_mut(key) {
            task.status = mark;
        }
        if remove {
            self.remove_on_reap.insert(key);
        } else {
            self.remove_on_reap.remove(&key);
        }
        queue.save();
        Ok(())
    }

    /// Resumes all paused children.
    pub fn start_all(&mut self, queue: &mut Queue) {
        for key in self.child_keys() {
            if queue.get(key).map(|task| task.status) == Some(TaskStatus::Paused)
                && let Err(err) = self.start_task(key, queue)
            {
                warn!("Failed to resume command #{key}: {err}");
            }
        }
    }

    /// Suspends all running children.
    pub fn pause_all(&mut self, queue: &mut Queue) {
        for key in self.child_keys() {
            if queue.get(key).map(|task| task.status) == Some(TaskStatus::Running)
                && let Err(err) = self.pause_task(key, queue)
            {
                warn!("Failed to pause command #{key}: {err}");
            }
        }
    }

    /// Sends the terminate signal to every child.
    pub fn stop_all(&mut self, remove: bool, queue: &mut Queue) {
        for key in self.child_keys() {
            if let Err(err) = self.stop_task(key, remove, queue) {
                warn!("Failed to stop command #{key}: {err}");
            }
        }
    }

    /// Sends the kill signal, or a caller-chosen one, to every child.
    pub fn kill_all(&mut self, remove: bool, signal: Option<Signal>, queue: &mut Queue) {
        for key in self.child_keys() {
            if let Err(err) = self.kill_task(key, remove, signal, queue) {
                warn!("Failed to kill command #{key}: {err}");
            }
        }
    }

    /// Blocks until every child has been reaped. Only used during shutdown.
    pub fn wait_for_finish(&mut self, queue: &mut Queue) {
        while self.has_children() {
            self.check_finished(queue);
            if self.has_children() {
                thread::sleep(Duration::from_millis(500));
            }
        }
    }

    fn child_keys(&self) -> Vec<usize> {
        self.children.keys().copied().collect()
    }

    fn signal_group(&self, key: usize, signal: Signal) -> Result<(), TaskError> {
        let child = self.children.get(&key).ok_or(TaskError::NoProcess(key))?;
        let pid = Pid::from_raw(child.id() as i32);
        signal::killpg(pid, signal).map_err(|source| TaskError::Signal { key, source })
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M").to_string()
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map_or(1, |signal| 128 + signal))
}
