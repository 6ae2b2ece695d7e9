//! The resident daemon: socket owner, event loop and request dispatch.
use std::{
    fs, io,
    os::fd::AsFd,
    os::unix::fs::PermissionsExt,
    os::unix::net::{UnixListener, UnixStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use fs2::FileExt;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, error, info, warn};

use crate::{
    error::{DaemonError, TaskError},
    handler::ProcessHandler,
    logger::TaskLogger,
    paths::Paths,
    protocol::{self, DaemonState, Request, Response, StatusSnapshot, TaskSummary},
    queue::Queue,
    settings::Settings,
    signals::parse_signal,
};

/// How long one loop iteration waits for a client before polling children.
const TICK: Duration = Duration::from_secs(1);

/// The long-running daemon behind the control socket.
///
/// Owns the queue, the process handler, the session logger and the options;
/// everything runs on a single thread, so all state transitions are
/// serialised by their position in the event loop.
pub struct Daemon {
    paths: Paths,
    settings: Settings,
    queue: Queue,
    handler: ProcessHandler,
    logger: TaskLogger,
    listener: UnixListener,
    // Held for the lifetime of the daemon; dropping releases the lock.
    _lock_file: fs::File,
    running: bool,
    paused: bool,
    reset_pending: bool,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    /// Sets up directories, state and the control socket.
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] when another daemon holds
    /// the advisory lock for the same root.
    pub fn new(paths: Paths) -> Result<Self, DaemonError> {
        paths.create_dirs()?;

        let lock_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(paths.lock_file())?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| DaemonError::AlreadyRunning)?;

        let settings = Settings::load(&paths)?;
        let mut queue = Queue::load(&paths);
        queue.clean();

        let logger = TaskLogger::new(&paths);
        if let Err(err) = logger.remove_old(settings.log.log_time) {
            warn!("Failed to purge rotated logs: {err}");
        }
        if queue.tasks().values().all(|task| task.status.is_terminal()) {
            // Nothing from the previous session is still in flight, archive
            // its log and start a fresh one.
            if let Err(err) = logger.rotate() {
                warn!("Failed to rotate session log: {err}");
            }
        }

        let paused = !settings.default.resume_after_start && !queue.is_empty();

        // The lock guarantees exclusivity, so any leftover socket is stale.
        let socket = paths.socket();
        if socket.exists() {
            fs::remove_file(&socket)?;
        }
        let listener = UnixListener::bind(&socket).map_err(DaemonError::Bind)?;
        fs::set_permissions(&socket, fs::Permissions::from_mode(0o700))?;
        listener.set_nonblocking(true)?;

        let mut handler = ProcessHandler::new(paths.clone());
        handler.set_max(settings.default.max_processes);

        info!("Daemon listening on {:?}", socket);
        Ok(Self {
            paths,
            settings,
            queue,
            handler,
            logger,
            listener,
            _lock_file: lock_file,
            running: true,
            paused,
            reset_pending: false,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that external signal handlers may set to request a shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Whether the daemon is currently scheduling queued entries.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Runs the event loop until a shutdown is requested, then drains all
    /// children and removes the socket.
    pub fn run(&mut self) -> Result<(), DaemonError> {
        while self.running {
            if self.shutdown.swap(false, Ordering::SeqCst) {
                info!("Shutdown requested by signal");
                self.handler.kill_all(false, None, &mut self.queue);
                self.running = false;
                continue;
            }

            let report = self.handler.check_finished(&mut self.queue);
            if report.finished {
                self.write_session_log();
            }
            if report.failed && self.settings.default.stop_at_error && !self.paused {
                info!("Pausing daemon after a failed command (stopAtError)");
                self.paused = true;
            }

            if self.reset_pending && !self.handler.has_children() {
                if let Err(err) = self.logger.rotate() {
                    warn!("Failed to rotate session log: {err}");
                }
                self.queue.reset();
                self.reset_pending = false;
                info!("Queue reset");
            }

            if !self.paused && self.handler.check_for_new(&mut self.queue) {
                self.write_session_log();
            }

            self.accept_clients();
        }

        self.shutdown_runtime();
        Ok(())
    }

    /// Waits up to one tick for connections and serves every pending one.
    fn accept_clients(&mut self) {
        let ready = {
            let mut fds = [PollFd::new(self.listener.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(TICK.as_millis() as u16)) {
                Ok(count) => count > 0,
                Err(nix::errno::Errno::EINTR) => false,
                Err(err) => {
                    error!("Polling the control socket failed: {err}");
                    false
                }
            }
        };
        if !ready {
            return;
        }

        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => self.handle_client(stream),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("Failed to accept client: {err}");
                    break;
                }
            }
        }
    }

    /// Reads one request, dispatches it and writes the response.
    fn handle_client(&mut self, mut stream: UnixStream) {
        let _ = stream.set_nonblocking(false);
        // A stalling client must not block the event loop indefinitely.
        let _ = stream.set_read_timeout(Some(TICK));

        let request = match protocol::read_request(&mut stream) {
            Ok(request) => request,
            Err(err) => {
                warn!("Dropping invalid request: {err}");
                let response = Response::Error(format!("Invalid request: {err}"));
                let _ = protocol::write_response(&mut stream, &response);
                return;
            }
        };

        debug!("Received request: {request:?}");
        let response = self.dispatch(request);
        if let Err(err) = protocol::write_response(&mut stream, &response) {
            warn!("Client went away before the response was sent: {err}");
        }
    }

    fn dispatch(&mut self, request: Request) -> Response {
        match request {
            Request::Add { command, path } => {
                let key = self.queue.add_new(command, path);
                Response::Success(format!("Command added as #{key}"))
            }
            Request::Remove { keys } => {
                self.for_each_key(&keys, "Removed", |daemon, key| daemon.queue.remove(key))
            }
            Request::Switch { first, second } => match self.queue.switch(first, second) {
                Ok(()) => Response::Success(format!("Commands #{first} and #{second} switched")),
                Err(err) => Response::Error(err.to_string()),
            },
            Request::Send { key, input } => match self.handler.send_to_child(key, &input) {
                Ok(()) => Response::Success("Message sent".to_string()),
                Err(err) => Response::Error(err.to_string()),
            },
            Request::Status => self.status(),
            Request::Start { keys } => self.start(keys),
            Request::Pause { keys, wait } => self.pause(keys, wait),
            Request::Stash { keys } => {
                self.for_each_key(&keys, "Stashed", |daemon, key| daemon.queue.stash(key))
            }
            Request::Enqueue { keys } => {
                self.for_each_key(&keys, "Enqueued", |daemon, key| daemon.queue.enqueue(key))
            }
            Request::Restart { keys } => self.for_each_key(&keys, "Restarted", |daemon, key| {
                daemon.queue.restart(key).map(|_| ())
            }),
            Request::Stop { keys, remove } => self.stop(keys, remove),
            Request::Kill {
                keys,
                remove,
                signal,
            } => self.kill(keys, remove, signal),
            Request::Reset => {
                self.handler.kill_all(true, None, &mut self.queue);
                self.reset_pending = true;
                Response::Success("Resetting the queue".to_string())
            }
            Request::Clear => self.clear(),
            Request::Config { option, value } => self.config(&option, &value),
            Request::StopDaemon => {
                info!("Daemon shutdown requested");
                self.handler.kill_all(false, None, &mut self.queue);
                self.running = false;
                Response::Success("Pueue daemon shutting down".to_string())
            }
        }
    }

    fn status(&self) -> Response {
        let state = if self.paused {
            DaemonState::Paused
        } else {
            DaemonState::Running
        };
        let tasks = self
            .queue
            .tasks()
            .iter()
            .map(|(key, task)| (*key, TaskSummary::from(task)))
            .collect();
        Response::Status(Box::new(StatusSnapshot { state, tasks }))
    }

    fn start(&mut self, keys: Vec<usize>) -> Response {
        if keys.is_empty() {
            self.handler.start_all(&mut self.queue);
            if self.paused {
                self.paused = false;
                Response::Success("Daemon started".to_string())
            } else {
                Response::Success("Daemon already running".to_string())
            }
        } else {
            self.for_each_key(&keys, "Started", |daemon, key| {
                daemon.handler.start_task(key, &mut daemon.queue)
            })
        }
    }

    fn pause(&mut self, keys: Vec<usize>, wait: bool) -> Response {
        if keys.is_empty() {
            if !wait {
                self.handler.pause_all(&mut self.queue);
            }
            if !self.paused {
                self.paused = true;
                Response::Success("Daemon paused".to_string())
            } else {
                Response::Success("Daemon already paused".to_string())
            }
        } else {
            self.for_each_key(&keys, "Paused", |daemon, key| {
                daemon.handler.pause_task(key, &mut daemon.queue)
            })
        }
    }

    fn stop(&mut self, keys: Vec<usize>, remove: bool) -> Response {
        if keys.is_empty() {
            self.handler.stop_all(remove, &mut self.queue);
            self.paused = true;
            Response::Success("Stopping all running commands, daemon paused".to_string())
        } else {
            self.for_each_key(&keys, "Stopping", |daemon, key| {
                daemon.handler.stop_task(key, remove, &mut daemon.queue)
            })
        }
    }

    fn kill(&mut self, keys: Vec<usize>, remove: bool, signal: Option<String>) -> Response {
        let signal = match signal {
            Some(name) => match parse_signal(&name) {
                Some(signal) => Some(signal),
                None => return Response::Error(format!("Unknown signal: {name}")),
            },
            None => None,
        };

        if keys.is_empty() {
            self.handler.kill_all(remove, signal, &mut self.queue);
            self.paused = true;
            Response::Success("Killing all running commands, daemon paused".to_string())
        } else {
            self.for_each_key(&keys, "Killing", |daemon, key| {
                daemon.handler.kill_task(key, remove, signal, &mut daemon.queue)
            })
        }
    }

    fn clear(&mut self) -> Response {
        // Archive the finished entries before they are dropped.
        if let Err(err) = self.logger.rotate() {
            warn!("Failed to rotate session log: {err}");
        }
        self.queue.clear();
        self.write_session_log();
        Response::Success("Cleared all finished commands".to_string())
    }

    fn config(&mut self, option: &str, value: &str) -> Response {
        if let Err(err) = self.settings.set(option, value) {
            return Response::Error(err.to_string());
        }
        if option == "maxProcesses" {
            self.handler.set_max(self.settings.default.max_processes);
        }
        if let Err(err) = self.settings.save(&self.paths) {
            error!("Failed to persist options: {err}");
        }
        Response::Success(format!("Set {option} to {value}"))
    }

    /// Applies `op` to every key, aggregating per-key results.
    ///
    /// All keys are attempted; the response is an error iff at least one of
    /// them failed, and the message enumerates both groups.
    fn for_each_key<F>(&mut self, keys: &[usize], verb: &str, mut op: F) -> Response
    where
        F: FnMut(&mut Self, usize) -> Result<(), TaskError>,
    {
        if keys.is_empty() {
            return Response::Error("No keys given".to_string());
        }

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for &key in keys {
            match op(self, key) {
                Ok(()) => succeeded.push(format!("#{key}")),
                Err(err) => failed.push(err.to_string()),
            }
        }

        let mut parts = Vec::new();
        if !succeeded.is_empty() {
            parts.push(format!("{verb} commands {}", succeeded.join(", ")));
        }
        if !failed.is_empty() {
            parts.push(format!("Failed: {}", failed.join("; ")));
        }
        let message = parts.join(". ");

        if failed.is_empty() {
            Response::Success(message)
        } else {
            Response::Error(message)
        }
    }

    fn write_session_log(&self) {
        if let Err(err) = self.logger.write(self.queue.tasks()) {
            error!("Failed to write session log: {err}");
        }
    }

    fn shutdown_runtime(&mut self) {
        self.handler.wait_for_finish(&mut self.queue);
        self.write_session_log();
        if let Err(err) = fs::remove_file(self.paths.socket()) {
            warn!("Failed to remove socket file: {err}");
        }
        info!("Daemon shut down");
    }
}
