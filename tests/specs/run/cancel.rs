//! Cancelling a run in flight requests a graceful stop of its running
//! steps rather than leaving them orphaned.

use crate::prelude::*;

#[test]
fn cancel_stops_a_running_step() {
    let daemon = Daemon::empty();
    daemon.template("long-running", &shell_template(vec![shell_step("s", "sleep 5")]));
    daemon.meow().args(&["daemon", "start"]).passes();

    let created = daemon.meow().args(&["run", "long-running"]).passes();
    let run_id = created.stdout().trim().to_string();

    let is_running = wait_for(SPEC_WAIT_MAX_MS, || {
        daemon
            .meow()
            .args(&["status", &run_id])
            .passes()
            .stdout()
            .contains("running")
    });
    assert!(is_running, "run should reach running before it is cancelled");

    daemon.meow().args(&["cancel", &run_id]).passes();

    let stopped = wait_for(SPEC_WAIT_MAX_MS, || {
        let out = daemon.meow().args(&["status", &run_id]).passes().stdout();
        out.contains("stopped") || out.contains("cleaning_up")
    });
    assert!(stopped, "cancelled run should move towards stopped");
}

#[test]
fn cancelling_an_unknown_run_reports_an_error() {
    let daemon = Daemon::empty();
    daemon.meow().args(&["daemon", "start"]).passes();

    daemon
        .meow()
        .args(&["cancel", "no-such-run"])
        .fails()
        .stderr_has("no-such-run");
}
