use std::{
    process::{Command as StdCommand, Stdio},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn help_lists_the_subcommands() {
    Command::cargo_bin("pueue")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("add")
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("kill"))
                .and(predicate::str::contains("stash")),
        );
}

#[test]
fn version_flag_works() {
    Command::cargo_bin("pueue")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pueue"));
}

#[test]
fn missing_subcommand_fails() {
    Command::cargo_bin("pueue")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("No command given"));
}

#[test]
fn unreachable_daemon_exits_nonzero() {
    let temp = tempdir().unwrap();
    Command::cargo_bin("pueue")
        .unwrap()
        .arg("--root")
        .arg(temp.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("daemon socket not available"));
}

#[test]
fn end_to_end_against_a_foreground_daemon() {
    let temp = tempdir().unwrap();
    let binary = assert_cmd::cargo::cargo_bin("pueue");

    let mut daemon = StdCommand::new(&binary)
        .arg("--no-daemon")
        .arg("--root")
        .arg(temp.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Wait until the daemon answers on its socket.
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let status = StdCommand::new(&binary)
            .arg("--root")
            .arg(temp.path())
            .arg("status")
            .output()
            .unwrap();
        if status.status.success() {
            break;
        }
        if Instant::now() >= deadline {
            let _ = daemon.kill();
            panic!("daemon never became reachable");
        }
        thread::sleep(Duration::from_millis(100));
    }

    Command::cargo_bin("pueue")
        .unwrap()
        .arg("--root")
        .arg(temp.path())
        .arg("add")
        .arg("echo")
        .arg("from the cli")
        .assert()
        .success()
        .stdout(predicate::str::contains("Command added"));

    // Wait for the entry to finish and show up as done.
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let output = StdCommand::new(&binary)
            .arg("--root")
            .arg(temp.path())
            .arg("status")
            .output()
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("done") {
            assert!(stdout.contains("echo from the cli"));
            break;
        }
        if Instant::now() >= deadline {
            let _ = daemon.kill();
            panic!("entry never finished; last status: {stdout}");
        }
        thread::sleep(Duration::from_millis(100));
    }

    Command::cargo_bin("pueue")
        .unwrap()
        .arg("--root")
        .arg(temp.path())
        .arg("--stop-daemon")
        .assert()
        .success()
        .stdout(predicate::str::contains("shutting down"));

    // The daemon process exits on its own after the request.
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if daemon.try_wait().unwrap().is_some() {
            break;
        }
        if Instant::now() >= deadline {
            let _ = daemon.kill();
            panic!("daemon did not exit after --stop-daemon");
        }
        thread::sleep(Duration::from_millis(100));
    }
}
