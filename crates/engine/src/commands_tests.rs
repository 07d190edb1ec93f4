// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use meow_core::{RunId, StepId};

#[tokio::test]
async fn cancel_all_for_run_only_fires_matching_run() {
    let pending = PendingCommands::new();
    let (tx1, rx1) = oneshot::channel();
    let (tx2, rx2) = oneshot::channel();
    pending.insert(RunId::new("r1"), StepId::new("s1"), tx1);
    pending.insert(RunId::new("r2"), StepId::new("s1"), tx2);

    pending.cancel_all_for_run(&RunId::new("r1"));

    assert!(rx1.await.is_ok());
    // r2's entry untouched.
    assert_eq!(pending.len(), 1);
    drop(rx2);
}

#[tokio::test]
async fn remove_drops_the_entry_without_firing() {
    let pending = PendingCommands::new();
    let (tx, rx) = oneshot::channel();
    pending.insert(RunId::new("r1"), StepId::new("s1"), tx);
    pending.remove(&RunId::new("r1"), &StepId::new("s1"));
    assert_eq!(pending.len(), 0);
    assert!(rx.await.is_err());
}

#[tokio::test]
async fn task_tracker_joins_all_tracked_tasks() {
    let tracker = TaskTracker::new();
    let (tx, rx) = oneshot::channel::<()>();
    tracker.track(tokio::spawn(async move {
        let _ = rx.await;
    }));
    tx.send(()).unwrap();
    tracker.join_all().await;
}
