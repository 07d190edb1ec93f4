// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared error taxonomy for the core data model.

use crate::{AgentId, RunId, StepId};
use thiserror::Error;

/// Errors that can arise while manipulating a [`crate::Run`] or its steps,
/// independent of any particular storage or transport layer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("step {step} not found in run {run}")]
    StepNotFound { run: RunId, step: StepId },

    #[error("step {0} already exists")]
    DuplicateStep(StepId),

    #[error("agent {0} is already running a step")]
    AgentBusy(AgentId),

    #[error("agent {0} not found")]
    AgentNotFound(AgentId),

    #[error("step {step} has no {field} config for executor kind {kind}")]
    MissingExecutorConfig {
        step: StepId,
        field: &'static str,
        kind: &'static str,
    },

    #[error("expansion of step {0} exceeded the configured depth or step-count limit")]
    ExpansionLimitExceeded(StepId),

    #[error("output validation failed for step {step}: {reason}")]
    OutputValidation { step: StepId, reason: String },

    #[error("invalid transition for step {step}: {reason}")]
    InvalidTransition { step: StepId, reason: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
