// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracking for in-flight async shell/branch commands: a process-wide
//! cancellation map keyed by `(run, step)` plus a wait-group-style
//! handle list so `Shutdown` can cancel every outstanding command and
//! wait for its goroutine-equivalent task to actually exit (§4.1.3,
//! §4.1.4).
//!
//! Keying by the pair, rather than by step ID alone, is called out in
//! `spec.md` as fixing a documented bug in the source system: two runs
//! that happen to share a step ID must not cancel each other's command.

use meow_core::{RunId, StepId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Process-wide registry of cancellation senders for in-flight shell and
/// branch commands. Cheap to clone — internally `Arc`-shared.
#[derive(Clone, Default)]
pub struct PendingCommands {
    inner: Arc<Mutex<HashMap<(RunId, StepId), oneshot::Sender<()>>>>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cancellation sender for `(run, step)`. The entry is
    /// meant to be removed by the command's own task on exit (including
    /// on cancellation) via [`PendingCommands::remove`] — never left
    /// behind.
    pub fn insert(&self, run: RunId, step: StepId, cancel: oneshot::Sender<()>) {
        self.inner.lock().insert((run, step), cancel);
    }

    /// Remove and drop the entry for `(run, step)`, called by the
    /// command's own task as it exits, regardless of outcome.
    pub fn remove(&self, run: &RunId, step: &StepId) {
        self.inner.lock().remove(&(run.clone(), step.clone()));
    }

    /// Fire every cancellation sender for `run` and drop them from the
    /// map. Used by `Shutdown`.
    pub fn cancel_all_for_run(&self, run: &RunId) {
        let mut inner = self.inner.lock();
        let keys: Vec<_> = inner
            .keys()
            .filter(|(r, _)| r == run)
            .cloned()
            .collect();
        for key in keys {
            if let Some(tx) = inner.remove(&key) {
                let _ = tx.send(());
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// A simple wait-group substitute: a list of task handles a per-run
/// orchestrator can join on shutdown. Not shared across runs.
#[derive(Default)]
pub struct TaskTracker {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait for every tracked task to finish. Tasks cancelled via
    /// [`PendingCommands::cancel_all_for_run`] still run their
    /// completion logic (which observes the cancellation and exits
    /// early without mutating persisted state) before this returns.
    pub async fn join_all(&self) {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
