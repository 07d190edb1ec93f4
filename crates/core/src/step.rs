// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The step data model: executor kinds, status, and the per-step record
//! that lives inside a [`crate::Run`]'s step map.

use crate::id::StepId;
use crate::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle status of a single step.
///
/// `pending -> running -> {completing -> done | failed}`. `completing`
/// is held only between receipt of a step-done signal and successful
/// validation + persistence of its outputs; it reverts to `running` on
/// validation failure so the agent may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completing,
    Done,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed)
    }
}

/// What happens to the run when a shell/branch step exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// The step is marked `failed` and the run is marked `failed` on the
    /// next tick.
    Fail,
    /// The step is marked `done`; the error is recorded in its outputs
    /// under the `error` key.
    Continue,
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Fail
    }
}

/// The resolved outcome of a branch condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOutcome {
    True,
    False,
    Timeout,
}

/// A single iteration target for a `foreach` expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeachConfig {
    /// The items to iterate over, bound to `item_var` in each iteration's
    /// scope.
    pub items: Vec<serde_json::Value>,
    /// Variable name each item is bound to inside the expanded template.
    pub item_var: String,
    /// Sequential iterations gain an implicit dependency on the previous
    /// iteration's last step; parallel iterations are gated by
    /// `max_concurrent`.
    #[serde(default)]
    pub sequential: bool,
    /// Maximum number of iterations with any step `running` at once, in
    /// parallel mode. `None` means unbounded.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

/// The *what* of a step. Exactly one of these describes any given step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepExecutor {
    /// Run a shell command and capture exit code, stdout, stderr.
    Shell {
        command: String,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default, with = "opt_duration_serde")]
        timeout: Option<Duration>,
        #[serde(default)]
        on_error: OnError,
    },

    /// Spawn a new agent session.
    Spawn {
        agent_id: AgentId,
        agent_name: String,
        command: String,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: HashMap<String, String>,
    },

    /// Stop a running agent session.
    Kill { agent_id: AgentId },

    /// Materialize a template (optionally once per `foreach` item) as a
    /// subgraph of child steps prefixed by this step's ID.
    Expand {
        template: String,
        #[serde(default)]
        vars: HashMap<String, String>,
        #[serde(default)]
        foreach: Option<ForeachConfig>,
    },

    /// Run a shell condition; expand the matching target template based
    /// on its outcome.
    Branch {
        condition: String,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default, with = "opt_duration_serde")]
        timeout: Option<Duration>,
        #[serde(default)]
        on_true: Option<String>,
        #[serde(default)]
        on_false: Option<String>,
        #[serde(default)]
        on_timeout: Option<String>,
        #[serde(default)]
        vars: HashMap<String, String>,
    },

    /// Inject a prompt into an agent and wait for its step-done signal.
    Agent {
        agent_id: AgentId,
        prompt: String,
        #[serde(default)]
        interactive: bool,
        #[serde(default, with = "opt_duration_serde")]
        timeout: Option<Duration>,
        /// Declared shape of this step's outputs, validated by
        /// `IPCHandler`/`HandleStepDone` before a `step_done` signal is
        /// accepted (§4.3). Empty means any outputs are accepted.
        #[serde(default)]
        expected_outputs: Vec<OutputSpec>,
    },
}

/// One declared output field an agent step promises to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub kind: OutputKind,
    /// If false, the output may be omitted from `step_done`.
    #[serde(default = "default_true_field")]
    pub required: bool,
}

fn default_true_field() -> bool {
    true
}

/// The expected JSON shape of a declared output, plus the `file_path`
/// special case (§4.3: "`file_path` outputs reference existing files").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    String,
    Number,
    Bool,
    /// A string output whose value must name an existing file.
    FilePath,
}

impl StepExecutor {
    /// Dispatch priority tier: lower dispatches first within a tick.
    /// Orchestrator-control executors (spawn/kill) go before task-like
    /// executors, which go before agent steps (gated by agent-busy).
    pub fn priority_tier(&self) -> u8 {
        match self {
            StepExecutor::Kill { .. } => 0,
            StepExecutor::Spawn { .. } => 1,
            StepExecutor::Expand { .. } => 2,
            StepExecutor::Branch { .. } => 2,
            StepExecutor::Shell { .. } => 3,
            StepExecutor::Agent { .. } => 4,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            StepExecutor::Shell { .. } => "shell",
            StepExecutor::Spawn { .. } => "spawn",
            StepExecutor::Kill { .. } => "kill",
            StepExecutor::Expand { .. } => "expand",
            StepExecutor::Branch { .. } => "branch",
            StepExecutor::Agent { .. } => "agent",
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            StepExecutor::Shell { timeout, .. } => *timeout,
            StepExecutor::Branch { timeout, .. } => *timeout,
            StepExecutor::Agent { timeout, .. } => *timeout,
            StepExecutor::Spawn { .. } | StepExecutor::Kill { .. } | StepExecutor::Expand { .. } => {
                None
            }
        }
    }

    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            StepExecutor::Spawn { agent_id, .. }
            | StepExecutor::Kill { agent_id }
            | StepExecutor::Agent { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}

/// Record of a per-step error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub message: String,
    #[serde(default)]
    pub timed_out: bool,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
        }
    }
}

/// One node in a run's DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub executor: StepExecutor,
    pub status: StepStatus,
    #[serde(default)]
    pub needs: Vec<StepId>,
    #[serde(default)]
    pub outputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub done_at: Option<u64>,
    #[serde(default)]
    pub interrupted_at: Option<u64>,
    #[serde(default)]
    pub expanded_from: Option<StepId>,
    #[serde(default)]
    pub expanded_into: Vec<StepId>,
    #[serde(default)]
    pub error: Option<StepError>,
}

impl Step {
    pub fn new(id: StepId, executor: StepExecutor, needs: Vec<StepId>) -> Self {
        Self {
            id,
            executor,
            status: StepStatus::Pending,
            needs,
            outputs: HashMap::new(),
            started_at: None,
            done_at: None,
            interrupted_at: None,
            expanded_from: None,
            expanded_into: Vec::new(),
            error: None,
        }
    }

    /// Whether this step is an `expand` or `branch` node that produces
    /// children.
    pub fn is_parent(&self) -> bool {
        matches!(
            self.executor,
            StepExecutor::Expand { .. } | StepExecutor::Branch { .. }
        )
    }
}

/// Serializes an `Option<Duration>` as milliseconds.
mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        d.map(|d| d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
