// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC message envelopes exchanged between a running agent and the
//! orchestrator, independent of the transport (see `meow-daemon`'s
//! `protocol_wire` for the length-prefixed wire framing).

use crate::step::StepStatus;
use crate::RunId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A message from an agent process to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    /// Sent by the adapter immediately after a step's prompt is
    /// injected, used only to set the step-acknowledgment grace window
    /// that filters spurious `agent-stopped` signals.
    StepStart {
        workflow: RunId,
        agent: String,
        step: String,
    },

    /// Report the outputs of a completed agent step.
    StepDone {
        workflow: RunId,
        agent: String,
        step: String,
        #[serde(default)]
        outputs: HashMap<String, serde_json::Value>,
    },

    /// Fire-and-forget event, routed to any matching `AwaitEvent` waiter.
    Event {
        event_type: String,
        workflow: RunId,
        agent: String,
        #[serde(default)]
        data: HashMap<String, serde_json::Value>,
    },

    /// Block until an event matching `event_type` and `filter` arrives,
    /// or `timeout_ms` elapses.
    AwaitEvent {
        event_type: String,
        #[serde(default)]
        filter: HashMap<String, String>,
        timeout_ms: u64,
    },

    /// Query the current status of a step.
    GetStepStatus { workflow: RunId, step_id: String },

    /// Query the live session ID backing an agent.
    GetSessionId { agent: String },

    /// Query the prompt currently assigned to an agent. Returns empty
    /// while the agent's step is `completing`; an `interactive` step
    /// keeps returning its last-set prompt until it leaves `running`
    /// (§9 open question, resolved).
    GetPrompt { agent: String },
}

/// The orchestrator's reply to an [`IpcMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Accepted; no further data. Also returned, silently, for messages
    /// arriving against a terminal or `cleaning_up` run.
    Ack,

    /// Rejected: validation failure, unknown run/step/agent, or timeout.
    Error { message: String },

    /// An `AwaitEvent` waiter was matched.
    EventMatch {
        event_type: String,
        data: HashMap<String, serde_json::Value>,
        timestamp_ms: u64,
    },

    StepStatus { step_id: String, status: StepStatus },

    SessionId { session_id: String },

    Prompt { prompt: String },
}

#[cfg(test)]
#[path = "ipc_tests.rs"]
mod tests;
