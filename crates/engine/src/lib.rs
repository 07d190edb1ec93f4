// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Odd Jobs execution engine: the DAG orchestrator, its tick loop, and
//! the IPC/event plumbing that feeds it.

pub mod commands;
mod event_router;
pub mod ipc_handler;
pub mod orchestrator;
pub mod output_validation;

pub use commands::{PendingCommands, TaskTracker};
pub use event_router::{EventEnvelope, EventRouter, RoutedEvent};
pub use ipc_handler::{IpcHandler, OrchestratorLookup, OrchestratorRegistry, AGENT_STOPPED_GRACE};
pub use orchestrator::{
    Orchestrator, OrchestratorDeps, OrchestratorError, DEFAULT_POLL_INTERVAL, INTERRUPT_GRACE,
};
pub use output_validation::validate_outputs;
