// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The run data model: the top-level unit of orchestration.

use crate::id::{AgentId, RunId, StepId};
use crate::step::Step;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a run.
///
/// `pending -> running -> {done | failed | stopped | cleaning_up -> {done|failed|stopped}}`.
/// `cleaning_up` is a staging status used to make cleanup crash-safe;
/// `prior_status` records the intended terminal status and is set
/// atomically when entering `cleaning_up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Done,
    Failed,
    Stopped,
    CleaningUp,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Done | RunStatus::Failed | RunStatus::Stopped
        )
    }
}

/// Which cleanup script reasons should run for this run, and the shell
/// command (if any) that constitutes that script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupPolicy {
    #[serde(default = "default_true")]
    pub on_success: bool,
    #[serde(default = "default_true")]
    pub on_failure: bool,
    #[serde(default = "default_true")]
    pub on_stop: bool,
    /// The cleanup script to run between `cleaning_up`'s entry and the
    /// recorded terminal status (§4.1.6). `None` means there is nothing
    /// to run beyond `AgentManager.KillAll`.
    #[serde(default)]
    pub command: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            on_success: true,
            on_failure: true,
            on_stop: true,
            command: None,
        }
    }
}

impl CleanupPolicy {
    pub fn applies_to(&self, reason: RunStatus) -> bool {
        match reason {
            RunStatus::Done => self.on_success,
            RunStatus::Failed => self.on_failure,
            RunStatus::Stopped => self.on_stop,
            _ => false,
        }
    }
}

/// A registered agent within a run: the session identifier returned by
/// the `AgentManager` at spawn time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub session_id: String,
}

/// The top-level unit of orchestration: a template instantiation plus
/// its materialized DAG of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub template: String,
    #[serde(default)]
    pub vars: HashMap<String, String>,
    pub status: RunStatus,
    #[serde(default)]
    pub prior_status: Option<RunStatus>,
    #[serde(default)]
    pub cleanup: CleanupPolicy,
    #[serde(default)]
    pub default_adapter: Option<String>,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub done_at: Option<u64>,
    /// Exit code of the last `cleanup.command` run, if any (§7: the
    /// cleanup script's exit code is one of the run's user-visible
    /// failure surfaces). `None` until a cleanup command has run.
    #[serde(default)]
    pub cleanup_exit_code: Option<i32>,
    #[serde(default)]
    pub steps: IndexMap<StepId, Step>,
    #[serde(default)]
    pub agents: HashMap<AgentId, AgentRegistration>,
}

impl Run {
    pub fn new(id: RunId, template: impl Into<String>, vars: HashMap<String, String>) -> Self {
        Self {
            id,
            template: template.into(),
            vars,
            status: RunStatus::Pending,
            prior_status: None,
            cleanup: CleanupPolicy::default(),
            default_adapter: None,
            started_at: None,
            done_at: None,
            cleanup_exit_code: None,
            steps: IndexMap::new(),
            agents: HashMap::new(),
        }
    }

    /// Enter the `cleaning_up` staging status, recording the intended
    /// terminal status. Idempotent: re-entering with the same reason is
    /// a no-op so crash recovery can safely re-invoke cleanup.
    pub fn begin_cleanup(&mut self, reason: RunStatus) {
        if self.status == RunStatus::CleaningUp {
            return;
        }
        self.prior_status = Some(reason);
        self.status = RunStatus::CleaningUp;
    }

    /// Complete a cleanup started by [`Run::begin_cleanup`], moving to
    /// the recorded terminal status.
    pub fn finish_cleanup(&mut self, now_ms: u64) {
        if let Some(reason) = self.prior_status.take() {
            self.status = reason;
            self.done_at = Some(now_ms);
        }
    }

    /// True once every step in the run is in a terminal status.
    pub fn all_steps_terminal(&self) -> bool {
        self.steps.values().all(|s| s.status.is_terminal())
    }

    /// True if any step in the run has failed.
    pub fn any_step_failed(&self) -> bool {
        self.steps
            .values()
            .any(|s| s.status == crate::step::StepStatus::Failed)
    }

    /// A step is ready when it is `pending` and every ID in `needs`
    /// resolves to an existing, `done` step.
    pub fn is_step_ready(&self, step: &Step) -> bool {
        step.status == crate::step::StepStatus::Pending
            && step.needs.iter().all(|dep| {
                self.steps
                    .get(dep)
                    .is_some_and(|d| d.status == crate::step::StepStatus::Done)
            })
    }

    /// All currently ready steps, in no particular order (the caller is
    /// responsible for priority sorting before dispatch).
    pub fn ready_steps(&self) -> Vec<&Step> {
        self.steps
            .values()
            .filter(|s| self.is_step_ready(s))
            .collect()
    }

    /// Resolve a sibling/ancestor step reference by scope-walking up from
    /// `from`: `a.b.c` looking up `foo` probes `a.b.c.foo`, `a.b.foo`,
    /// `a.foo`, then bare `foo`.
    pub fn resolve_scoped<'a>(&'a self, from: &StepId, name: &str) -> Option<&'a Step> {
        for ancestor in from.ancestors() {
            if let Some(step) = self.steps.get(&ancestor.child(name)) {
                return Some(step);
            }
        }
        self.steps.get(&StepId::new(name))
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
