// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-state change notifications.
//!
//! These are the internal events an [`AgentManager`](crate) implementation's
//! session watcher emits as it observes a spawned agent (working, waiting
//! for input, exited, or its session vanishing) — distinct from the
//! orchestrator IPC messages in [`crate::ipc`] and the
//! [`meow_engine::EventRouter`] waiter-matching those drive.

use crate::agent::{AgentError, AgentId, AgentState};
use serde::{Deserialize, Serialize};

/// Agent state-change notification, keyed by [`AgentId`].
///
/// Serializes with `{"type": "agent:name", ...fields}` format.
/// Unknown type tags deserialize to `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "agent:working")]
    AgentWorking { agent_id: AgentId },

    #[serde(rename = "agent:waiting")]
    AgentWaiting { agent_id: AgentId },

    #[serde(rename = "agent:failed")]
    AgentFailed {
        agent_id: AgentId,
        error: AgentError,
    },

    #[serde(rename = "agent:exited")]
    AgentExited {
        agent_id: AgentId,
        exit_code: Option<i32>,
    },

    #[serde(rename = "agent:gone")]
    AgentGone { agent_id: AgentId },

    /// Agent is idle (from the adapter's Notification hook).
    #[serde(rename = "agent:idle")]
    AgentIdle { agent_id: AgentId },

    /// Catch-all for unknown event types (extensibility).
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    /// Build the matching event for an [`AgentState`] transition.
    pub fn from_agent_state(agent_id: AgentId, state: AgentState) -> Self {
        match state {
            AgentState::Working => Event::AgentWorking { agent_id },
            AgentState::WaitingForInput => Event::AgentWaiting { agent_id },
            AgentState::Failed(error) => Event::AgentFailed { agent_id, error },
            AgentState::Exited { exit_code } => Event::AgentExited { agent_id, exit_code },
            AgentState::SessionGone => Event::AgentGone { agent_id },
        }
    }

    /// Extract the `(agent_id, state)` pair if this is an agent-state event.
    pub fn as_agent_state(&self) -> Option<(&AgentId, AgentState)> {
        match self {
            Event::AgentWorking { agent_id } => Some((agent_id, AgentState::Working)),
            Event::AgentWaiting { agent_id } => Some((agent_id, AgentState::WaitingForInput)),
            Event::AgentFailed { agent_id, error } => {
                Some((agent_id, AgentState::Failed(error.clone())))
            }
            Event::AgentExited {
                agent_id,
                exit_code,
            } => Some((
                agent_id,
                AgentState::Exited {
                    exit_code: *exit_code,
                },
            )),
            Event::AgentGone { agent_id } => Some((agent_id, AgentState::SessionGone)),
            Event::AgentIdle { .. } | Event::Custom => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Event::AgentWorking { .. } => "agent:working",
            Event::AgentWaiting { .. } => "agent:waiting",
            Event::AgentFailed { .. } => "agent:failed",
            Event::AgentExited { .. } => "agent:exited",
            Event::AgentGone { .. } => "agent:gone",
            Event::AgentIdle { .. } => "agent:idle",
            Event::Custom => "custom",
        }
    }

    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::AgentWorking { agent_id }
            | Event::AgentWaiting { agent_id }
            | Event::AgentFailed { agent_id, .. }
            | Event::AgentExited { agent_id, .. }
            | Event::AgentGone { agent_id }
            | Event::AgentIdle { agent_id } => format!("{t} agent={agent_id}"),
            Event::Custom => t.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
