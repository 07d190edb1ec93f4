//! S2/S3 — branch steps: run a condition command and expand the
//! `on_true`/`on_false`/`on_timeout` template based on its outcome.

use crate::prelude::*;

fn branch_step(id: &str, condition: &str, on_true: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "needs": [],
        "executor": {
            "kind": "branch",
            "condition": condition,
            "on_true": on_true,
        },
    })
}

fn branch_step_with_timeout(
    id: &str,
    condition: &str,
    timeout_ms: u64,
    on_timeout: &str,
) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "needs": [],
        "executor": {
            "kind": "branch",
            "condition": condition,
            "timeout": timeout_ms,
            "on_timeout": on_timeout,
        },
    })
}

#[test]
fn branch_true_expands_on_true_template() {
    let daemon = Daemon::empty();
    daemon.template("branch-true", &shell_template(vec![branch_step(
        "b",
        "exit 0",
        "on-true-tmpl",
    )]));
    daemon.template(
        "on-true-tmpl",
        &shell_template(vec![shell_step("t", "echo on-true")]),
    );
    daemon.meow().args(&["daemon", "start"]).passes();

    let created = daemon.meow().args(&["run", "branch-true"]).passes();
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
        .args(&["status", &run_id])
        .passes()
        .stdout_has("b.t");
}

#[test]
fn branch_timeout_expands_on_timeout_template() {
    let daemon = Daemon::empty();
    daemon.template(
        "branch-timeout",
        &shell_template(vec![branch_step_with_timeout(
            "b",
            "sleep 2",
            100,
            "on-timeout-tmpl",
        )]),
    );
    daemon.template(
        "on-timeout-tmpl",
        &shell_template(vec![shell_step("t", "echo on-timeout")]),
    );
    daemon.meow().args(&["daemon", "start"]).passes();

    let created = daemon.meow().args(&["run", "branch-timeout"]).passes();
    let run_id = created.stdout().trim().to_string();

    let reached_done = wait_for(SPEC_WAIT_MAX_MS, || {
        daemon
            .meow()
            .args(&["status", &run_id])
            .passes()
            .stdout()
            .contains("done, 0 failed")
    });
    assert!(reached_done, "run should finish done after branch timeout");

    daemon
        .meow()
        .args(&["status", &run_id])
        .passes()
        .stdout_has("b.t");
}
