// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-level request/response types spoken over the daemon's Unix
//! socket.
//!
//! Two kinds of client share one socket: the `meow` CLI, which issues
//! control-plane requests (`RunCreate`/`RunStatus`/`RunCancel`/`RunList`),
//! and spawned agents, which speak the [`meow_core::ipc`] protocol
//! described in `spec.md` §6 (`step_start`/`step_done`/`event`/
//! `await_event`/`get_step_status`/`get_session_id`). The latter is
//! carried verbatim inside [`Request::Ipc`]/[`Response::Ipc`] rather
//! than duplicated here — the core's message shapes are the contract,
//! the daemon only adds the run-lifecycle envelope around them.

use std::collections::HashMap;

use meow_core::{IpcMessage, IpcResponse, RunId, RunStatus, StepStatus};
use serde::{Deserialize, Serialize};

/// Everything a client can ask the daemon to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Instantiate a new run from a template and block until it exists
    /// (not until it completes — use `RunStatus` / `await_event` for
    /// that).
    RunCreate {
        template: String,
        #[serde(default)]
        variables: HashMap<String, String>,
    },

    RunStatus {
        run_id: RunId,
    },

    /// Request a graceful stop: in-flight commands are cancelled, the
    /// run transitions through `cleaning_up` to `stopped` (§4.1.4/4.1.6).
    RunCancel {
        run_id: RunId,
    },

    RunList {
        #[serde(default)]
        status: Option<RunStatus>,
    },

    /// An agent-originated IPC message (§6), forwarded to the
    /// [`meow_engine::IpcHandler`] verbatim.
    Ipc(IpcMessage),
}

/// Summary of a run's state, enough for `meow status`/`meow run` to
/// render without shipping the full step DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub template: String,
    pub status: RunStatus,
    pub steps_total: usize,
    pub steps_done: usize,
    pub steps_failed: usize,
}

/// Status of a single step, returned by `RunStatus` when the caller
/// wants step-level detail rather than just the run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub id: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    pub summary: RunSummary,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    RunCreated { run_id: RunId },
    RunStatus { detail: RunDetail },
    RunList { runs: Vec<RunSummary> },
    Ack,
    Error { message: String },
    Ipc(IpcResponse),
}
