use std::{
    io,
    os::fd::IntoRawFd,
    process,
    sync::{Mutex, atomic::Ordering},
};

use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use pueue::{
    cli::{Cli, parse_args},
    client,
    daemon::Daemon,
    logger::RotatingLogWriter,
    paths::Paths,
    protocol::{self, Request, Response},
};

fn main() {
    let args = parse_args();
    let paths = Paths::new(args.root.as_deref());

    if args.stop_daemon {
        init_client_logging(&args);
        stop_daemon(&paths);
        return;
    }

    if args.daemon || args.no_daemon {
        run_daemon(args, paths);
        return;
    }

    init_client_logging(&args);

    let Some(command) = args.command else {
        eprintln!("No command given; see `pueue --help`");
        process::exit(1);
    };

    match client::run(&paths, command) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            eprintln!("Failed to reach daemon: {err}");
            process::exit(1);
        }
    }
}

fn stop_daemon(paths: &Paths) {
    match protocol::send_request(paths, &Request::StopDaemon) {
        Ok(Response::Success(message)) => println!("{message}"),
        Ok(Response::Error(message)) => {
            eprintln!("{message}");
            process::exit(1);
        }
        Ok(Response::Status(_)) => {
            eprintln!("Unexpected response from daemon");
            process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to reach daemon: {err}");
            process::exit(1);
        }
    }
}

fn run_daemon(args: Cli, paths: Paths) {
    if let Err(err) = paths.create_dirs() {
        eprintln!("Failed to create state directories: {err}");
        process::exit(1);
    }

    if args.daemon && let Err(err) = daemonize() {
        eprintln!("Failed to daemonize: {err}");
        process::exit(1);
    }

    init_daemon_logging(&args, &paths);

    let mut daemon = match Daemon::new(paths) {
        Ok(daemon) => daemon,
        Err(err) => {
            error!("Failed to start daemon: {err}");
            process::exit(1);
        }
    };

    let shutdown = daemon.shutdown_handle();
    if args.no_daemon
        && let Err(err) = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
    {
        warn!("Failed to register signal handler: {err}");
    }

    if let Err(err) = daemon.run() {
        error!("Daemon exited with error: {err}");
        process::exit(1);
    }
}

fn filter(args: &Cli, default: &str) -> EnvFilter {
    if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    }
}

fn init_client_logging(args: &Cli) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(args, "warn"))
        .with_writer(io::stderr)
        .try_init();
}

fn init_daemon_logging(args: &Cli, paths: &Paths) {
    let filter = filter(args, "info");
    match RotatingLogWriter::open(paths.daemon_log()) {
        Ok(writer) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(writer))
                .with_ansi(false)
                .try_init();
        }
        Err(err) => {
            eprintln!("Failed to open daemon log: {err}; logging to stderr");
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}

/// Classic double fork so the daemon survives the invoking terminal.
fn daemonize() -> io::Result<()> {
    if unsafe { libc::fork() } > 0 {
        process::exit(0);
    }

    unsafe {
        libc::setsid();
    }

    if unsafe { libc::fork() } > 0 {
        process::exit(0);
    }

    std::env::set_current_dir("/")?;
    let devnull = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    let fd = devnull.into_raw_fd();
    unsafe {
        let _ = libc::dup2(fd, libc::STDIN_FILENO);
        let _ = libc::dup2(fd, libc::STDOUT_FILENO);
        let _ = libc::dup2(fd, libc::STDERR_FILENO);
        libc::close(fd);
    }

    Ok(())
}
