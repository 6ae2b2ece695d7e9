#[path = "common/mod.rs"]
mod common;

use std::{thread, time::Duration};

use common::DaemonHarness;
use pueue::{
    protocol::{DaemonState, Request, Response},
    task::TaskStatus,
};

#[test]
fn basic_lifecycle() {
    let harness = DaemonHarness::start();

    harness.send(&Request::Pause {
        keys: vec![],
        wait: false,
    });
    harness.add("ls");

    let snapshot = harness.status();
    assert_eq!(snapshot.state, DaemonState::Paused);
    let task = &snapshot.tasks[&0];
    assert_eq!(task.command, "ls");
    assert_eq!(task.path, harness.root_path());
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.returncode, None);

    harness.send(&Request::Start { keys: vec![] });
    harness.wait_for_status(0, TaskStatus::Done);

    let snapshot = harness.status();
    assert_eq!(snapshot.state, DaemonState::Running);
    let task = &snapshot.tasks[&0];
    assert_eq!(task.returncode, Some(0));
    assert!(!task.start.is_empty());
    assert!(!task.end.is_empty());
}

#[test]
fn bounded_concurrency() {
    let harness = DaemonHarness::start();
    harness.send(&Request::Config {
        option: "maxProcesses".to_string(),
        value: "3".to_string(),
    });

    for _ in 0..4 {
        harness.add("sleep 60");
    }

    harness.wait_until(|harness| {
        let snapshot = harness.status();
        snapshot
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Running)
            .count()
            == 3
    });
    assert_eq!(harness.task_status(3), Some(TaskStatus::Queued));
}

#[test]
fn stop_requeues_without_remove() {
    let harness = DaemonHarness::start();
    harness.add("sleep 60");
    harness.wait_for_status(0, TaskStatus::Running);

    // Pause scheduling so the requeued entry is not spawned right away.
    harness.send(&Request::Pause {
        keys: vec![],
        wait: true,
    });
    let response = harness.send(&Request::Stop {
        keys: vec![0],
        remove: false,
    });
    assert!(matches!(response, Response::Success(_)));

    harness.wait_for_status(0, TaskStatus::Queued);
    let task = &harness.status().tasks[&0];
    assert!(task.start.is_empty());
    assert!(task.end.is_empty());
    assert_eq!(task.returncode, None);
}

#[test]
fn stop_with_remove_drops_the_entry() {
    let harness = DaemonHarness::start();
    harness.add("sleep 60");
    harness.wait_for_status(0, TaskStatus::Running);

    harness.send(&Request::Stop {
        keys: vec![0],
        remove: true,
    });
    harness.wait_for_removed(0);
}

#[test]
fn stash_gates_scheduling_until_enqueue() {
    let harness = DaemonHarness::start();
    harness.send(&Request::Pause {
        keys: vec![],
        wait: false,
    });
    harness.add("ls");

    let response = harness.send(&Request::Stash { keys: vec![0] });
    assert!(matches!(response, Response::Success(_)));

    harness.send(&Request::Start { keys: vec![] });
    // Give the scheduler a couple of ticks; the entry must not spawn.
    thread::sleep(Duration::from_millis(1500));
    assert_eq!(harness.task_status(0), Some(TaskStatus::Stashed));

    harness.send(&Request::Enqueue { keys: vec![0] });
    harness.wait_for_status(0, TaskStatus::Done);
}

#[test]
fn stash_refuses_running_entries() {
    let harness = DaemonHarness::start();
    harness.add("sleep 60");
    harness.wait_for_status(0, TaskStatus::Running);

    let response = harness.send(&Request::Stash { keys: vec![0] });
    assert!(matches!(response, Response::Error(_)));
    assert_eq!(harness.task_status(0), Some(TaskStatus::Running));
}

#[test]
fn switch_is_forbidden_while_running() {
    let harness = DaemonHarness::start();
    harness.add("sleep 60");
    harness.add("ls -l");
    harness.wait_for_status(0, TaskStatus::Running);

    let response = harness.send(&Request::Switch {
        first: 0,
        second: 1,
    });
    assert!(matches!(response, Response::Error(_)));

    let snapshot = harness.status();
    assert_eq!(snapshot.tasks[&0].command, "sleep 60");
    assert_eq!(snapshot.tasks[&1].command, "ls -l");
}

#[test]
fn switch_swaps_queued_entries() {
    let harness = DaemonHarness::start();
    harness.send(&Request::Pause {
        keys: vec![],
        wait: false,
    });
    harness.add("ls");
    harness.add("ls -l");

    let response = harness.send(&Request::Switch {
        first: 0,
        second: 1,
    });
    assert!(matches!(response, Response::Success(_)));

    let snapshot = harness.status();
    assert_eq!(snapshot.tasks[&0].command, "ls -l");
    assert_eq!(snapshot.tasks[&1].command, "ls");
}

#[test]
fn pause_without_wait_suspends_children() {
    let harness = DaemonHarness::start();
    harness.add("sleep 60");
    harness.wait_for_status(0, TaskStatus::Running);

    harness.send(&Request::Pause {
        keys: vec![],
        wait: false,
    });
    let snapshot = harness.status();
    assert_eq!(snapshot.state, DaemonState::Paused);
    assert_eq!(snapshot.tasks[&0].status, TaskStatus::Paused);

    harness.send(&Request::Start { keys: vec![] });
    harness.wait_for_status(0, TaskStatus::Running);
}

#[test]
fn pause_with_wait_lets_children_finish() {
    let harness = DaemonHarness::start();
    harness.add("sleep 2");
    harness.wait_for_status(0, TaskStatus::Running);

    harness.send(&Request::Pause {
        keys: vec![],
        wait: true,
    });
    let snapshot = harness.status();
    assert_eq!(snapshot.state, DaemonState::Paused);
    assert_eq!(snapshot.tasks[&0].status, TaskStatus::Running);

    harness.wait_for_status(0, TaskStatus::Done);
    assert_eq!(harness.status().state, DaemonState::Paused);
}

#[test]
fn pause_is_idempotent_for_clients() {
    let harness = DaemonHarness::start();

    for _ in 0..2 {
        let response = harness.send(&Request::Pause {
            keys: vec![],
            wait: false,
        });
        assert!(matches!(response, Response::Success(_)));
        assert_eq!(harness.status().state, DaemonState::Paused);
    }
}

#[test]
fn specific_start_ignores_the_daemon_pause() {
    let harness = DaemonHarness::start();
    harness.send(&Request::Pause {
        keys: vec![],
        wait: false,
    });
    harness.add("ls");

    let response = harness.send(&Request::Start { keys: vec![0] });
    assert!(matches!(response, Response::Success(_)));
    harness.wait_for_status(0, TaskStatus::Done);
    // The daemon itself stays paused.
    assert_eq!(harness.status().state, DaemonState::Paused);
}

#[test]
fn kill_without_keys_pauses_the_daemon() {
    let harness = DaemonHarness::start();
    harness.add("sleep 60");
    harness.wait_for_status(0, TaskStatus::Running);

    harness.send(&Request::Kill {
        keys: vec![],
        remove: false,
        signal: None,
    });

    harness.wait_for_status(0, TaskStatus::Failed);
    assert_eq!(harness.status().state, DaemonState::Paused);
}

#[test]
fn kill_accepts_the_documented_signal_spellings() {
    for signal in ["sigterm", "TERM", "15", "int", "sigkill"] {
        let harness = DaemonHarness::start();
        harness.add("sleep 60");
        harness.wait_for_status(0, TaskStatus::Running);

        let response = harness.send(&Request::Kill {
            keys: vec![0],
            remove: false,
            signal: Some(signal.to_string()),
        });
        assert!(matches!(response, Response::Success(_)), "signal {signal}");
        harness.wait_for_status(0, TaskStatus::Failed);
        // A keyed kill leaves the daemon running.
        assert_eq!(harness.status().state, DaemonState::Running);
    }
}

#[test]
fn kill_with_remove_drops_the_entry() {
    let harness = DaemonHarness::start();
    harness.add("sleep 60");
    harness.wait_for_status(0, TaskStatus::Running);

    harness.send(&Request::Kill {
        keys: vec![0],
        remove: true,
        signal: None,
    });
    harness.wait_for_removed(0);
}

#[test]
fn remove_refuses_running_entries() {
    let harness = DaemonHarness::start();
    harness.add("sleep 60");
    harness.add("ls");
    harness.wait_for_status(0, TaskStatus::Running);

    let response = harness.send(&Request::Remove { keys: vec![0] });
    assert!(matches!(response, Response::Error(_)));
    assert_eq!(harness.task_status(0), Some(TaskStatus::Running));

    let response = harness.send(&Request::Remove { keys: vec![1] });
    assert!(matches!(response, Response::Success(_)));
    assert!(harness.status().tasks.get(&1).is_none());
}

#[test]
fn restart_clones_a_finished_entry() {
    let harness = DaemonHarness::start();
    harness.add("ls");
    harness.wait_for_status(0, TaskStatus::Done);

    let response = harness.send(&Request::Restart { keys: vec![0] });
    assert!(matches!(response, Response::Success(_)));

    harness.wait_for_status(1, TaskStatus::Done);
    let snapshot = harness.status();
    assert_eq!(snapshot.tasks[&0].status, TaskStatus::Done);
    assert_eq!(snapshot.tasks[&1].command, "ls");
}

#[test]
fn restart_refuses_unfinished_entries() {
    let harness = DaemonHarness::start();
    harness.add("sleep 60");
    harness.wait_for_status(0, TaskStatus::Running);

    let response = harness.send(&Request::Restart { keys: vec![0] });
    assert!(matches!(response, Response::Error(_)));
}

#[test]
fn send_reaches_the_childs_stdin() {
    let harness = DaemonHarness::start();
    harness.add("read line && echo \"got $line\"");
    harness.wait_for_status(0, TaskStatus::Running);

    let response = harness.send(&Request::Send {
        key: 0,
        input: "hello\n".to_string(),
    });
    assert!(matches!(response, Response::Success(_)));

    harness.wait_for_status(0, TaskStatus::Done);
    let log = std::fs::read_to_string(harness.paths.session_log()).unwrap();
    assert!(log.contains("got hello"), "session log: {log}");
}

#[test]
fn stop_at_error_pauses_the_daemon() {
    let harness = DaemonHarness::start();
    harness.add("exit 2");
    harness.wait_for_status(0, TaskStatus::Failed);

    harness.wait_until(|harness| harness.status().state == DaemonState::Paused);

    // With stopAtError disabled a failure keeps the daemon running.
    harness.send(&Request::Config {
        option: "stopAtError".to_string(),
        value: "false".to_string(),
    });
    harness.send(&Request::Start { keys: vec![] });
    harness.add("exit 2");
    harness.wait_for_status(1, TaskStatus::Failed);
    thread::sleep(Duration::from_millis(500));
    assert_eq!(harness.status().state, DaemonState::Running);
}

#[test]
fn clear_archives_and_drops_finished_entries() {
    let harness = DaemonHarness::start();
    harness.send(&Request::Config {
        option: "stopAtError".to_string(),
        value: "false".to_string(),
    });
    harness.add("exit 1");
    harness.add("ls");
    harness.wait_for_status(0, TaskStatus::Failed);
    harness.wait_for_status(1, TaskStatus::Done);
    harness.add("sleep 60");
    harness.wait_for_status(2, TaskStatus::Running);

    let response = harness.send(&Request::Clear);
    assert!(matches!(response, Response::Success(_)));

    let snapshot = harness.status();
    assert!(snapshot.tasks.get(&0).is_none());
    assert!(snapshot.tasks.get(&1).is_none());
    assert_eq!(snapshot.tasks[&2].status, TaskStatus::Running);
}

#[test]
fn unknown_requests_get_an_error_response() {
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    let harness = DaemonHarness::start();

    let mut stream = UnixStream::connect(harness.paths.socket()).unwrap();
    let payload = br#"{"mode":"launch"}"#;
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .unwrap();
    stream.write_all(payload).unwrap();
    stream.flush().unwrap();

    let response = pueue::protocol::read_message(&mut stream).unwrap();
    let response: Response = serde_json::from_slice(&response).unwrap();
    assert!(matches!(response, Response::Error(_)));

    // The daemon keeps serving after a protocol error.
    assert!(matches!(
        harness.send(&Request::Status),
        Response::Status(_)
    ));
}
