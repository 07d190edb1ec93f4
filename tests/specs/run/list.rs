//! `meow list` enumerates runs known to the daemon, optionally filtered
//! by status.

use crate::prelude::*;

#[test]
fn list_is_empty_before_any_runs() {
    let daemon = Daemon::empty();
    daemon.meow().args(&["daemon", "start"]).passes();

    daemon
        .meow()
        .args(&["list"])
        .passes()
        .stdout_has("no runs");
}

#[test]
fn list_shows_every_created_run() {
    let daemon = Daemon::empty();
    daemon.template("one-step", &shell_template(vec![shell_step("s", "echo hi")]));
    daemon.meow().args(&["daemon", "start"]).passes();

    let first = daemon.meow().args(&["run", "one-step"]).passes();
    let first_id = first.stdout().trim().to_string();
    let second = daemon.meow().args(&["run", "one-step"]).passes();
    let second_id = second.stdout().trim().to_string();

    daemon
        .meow()
        .args(&["list"])
        .passes()
        .stdout_has(&first_id)
        .stdout_has(&second_id);
}

#[test]
fn list_filters_by_status() {
    let daemon = Daemon::empty();
    daemon.template("one-step", &shell_template(vec![shell_step("s", "echo hi")]));
    daemon.meow().args(&["daemon", "start"]).passes();

    let created = daemon.meow().args(&["run", "one-step"]).passes();
    let run_id = created.stdout().trim().to_string();

    let reached_done = wait_for(SPEC_WAIT_MAX_MS, || {
        daemon
            .meow()
            .args(&["status", &run_id])
            .passes()
            .stdout()
            .contains("done, 0 failed")
    });
    assert!(reached_done, "run should finish done");

    daemon
        .meow()
        .args(&["list", "--status", "done"])
        .passes()
        .stdout_has(&run_id);

    daemon
        .meow()
        .args(&["list", "--status", "running"])
        .passes()
        .stdout_has("no runs");
}
