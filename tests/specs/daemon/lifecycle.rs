//! Daemon lifecycle specs: start/stop/status and the files it leaves
//! behind in its state directory.

use crate::prelude::*;

#[test]
fn status_reports_not_running_before_start() {
    let daemon = Daemon::empty();
    daemon
        .meow()
        .args(&["daemon", "status"])
        .fails()
        .stdout_has("not running");
}

#[test]
fn start_then_status_reports_running() {
    let daemon = Daemon::empty();
    daemon.meow().args(&["daemon", "start"]).passes();
    daemon
        .meow()
        .args(&["daemon", "status"])
        .passes()
        .stdout_has("running");
}

#[test]
fn start_creates_socket_and_pid_files() {
    let daemon = Daemon::empty();
    daemon.meow().args(&["daemon", "start"]).passes();

    let has_socket = wait_for(SPEC_WAIT_MAX_MS, || {
        daemon.state_path().join("daemon.sock").exists()
    });
    assert!(has_socket, "daemon.sock should exist after start");

    let has_pid = wait_for(SPEC_WAIT_MAX_MS, || {
        daemon.state_path().join("daemon.pid").exists()
    });
    assert!(has_pid, "daemon.pid should exist after start");
}

#[test]
fn stop_then_status_reports_not_running() {
    let daemon = Daemon::empty();
    daemon.meow().args(&["daemon", "start"]).passes();
    daemon.meow().args(&["daemon", "stop"]).passes();
    daemon
        .meow()
        .args(&["daemon", "status"])
        .fails()
        .stdout_has("not running");
}

#[test]
fn starting_twice_does_not_disrupt_running_daemon() {
    let daemon = Daemon::empty();
    daemon.meow().args(&["daemon", "start"]).passes();

    // Launching meowd directly while one is already running must fail
    // (exclusive lock) without disturbing the running instance.
    let output = std::process::Command::new(meowd_binary())
        .env("MEOW_STATE_DIR", daemon.state_path())
        .output()
        .expect("meowd should run");
    assert!(
        !output.status.success(),
        "a second meowd should fail to acquire the lock"
    );

    daemon
        .meow()
        .args(&["daemon", "status"])
        .passes()
        .stdout_has("running");
    assert!(daemon.state_path().join("daemon.sock").exists());
}
