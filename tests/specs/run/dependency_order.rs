//! S1 — dependency ordering: a step only dispatches once every entry in
//! its `needs` list is `done`.

use crate::prelude::*;

#[test]
fn dependent_step_runs_only_after_its_dependency_completes() {
    let daemon = Daemon::empty();
    daemon.template(
        "two-step",
        &shell_template(vec![
            shell_step("step-1", "echo first"),
            shell_step_needs("step-2", "echo second", &["step-1"]),
        ]),
    );
    daemon.meow().args(&["daemon", "start"]).passes();

    let run_id = daemon
        .meow()
        .args(&["run", "two-step", "--wait"])
        .passes();
    let out = run_id.stdout();
    assert!(out.contains("done"), "run should finish done\n{out}");
    assert!(
        out.contains("2/2 done, 0 failed"),
        "both steps should be done\n{out}"
    );
}

#[test]
fn run_with_zero_steps_completes_immediately() {
    let daemon = Daemon::empty();
    daemon.template("empty", &shell_template(vec![]));
    daemon.meow().args(&["daemon", "start"]).passes();

    daemon
        .meow()
        .args(&["run", "empty", "--wait"])
        .passes()
        .stdout_has("done");
}

#[test]
fn status_lists_every_step_by_id() {
    let daemon = Daemon::empty();
    daemon.template(
        "two-step",
        &shell_template(vec![
            shell_step("step-1", "echo first"),
            shell_step_needs("step-2", "echo second", &["step-1"]),
        ]),
    );
    daemon.meow().args(&["daemon", "start"]).passes();

    let created = daemon.meow().args(&["run", "two-step"]).passes();
    let run_id = created.stdout().trim().to_string();

    let reached_done = wait_for(SPEC_WAIT_MAX_MS, || {
        daemon
            .meow()
            .args(&["status", &run_id])
            .passes()
            .stdout()
            .contains("2/2 done, 0 failed")
    });
    assert!(reached_done, "run should reach 2/2 done");

    daemon
        .meow()
        .args(&["status", &run_id])
        .passes()
        .stdout_has("step-1")
        .stdout_has("step-2");
}
