// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output formatting shared by every subcommand.

use clap::ValueEnum;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Render a run status for the run's terminal exit code: `done` -> 0,
/// anything else non-terminal-success -> 1. Used by `meow run --wait`
/// and `meow status` to decide the process exit code.
pub fn status_exit_code(status: meow_core::RunStatus) -> i32 {
    match status {
        meow_core::RunStatus::Done => 0,
        _ => 1,
    }
}

pub fn status_label(status: meow_core::RunStatus) -> &'static str {
    match status {
        meow_core::RunStatus::Pending => "pending",
        meow_core::RunStatus::Running => "running",
        meow_core::RunStatus::Done => "done",
        meow_core::RunStatus::Failed => "failed",
        meow_core::RunStatus::Stopped => "stopped",
        meow_core::RunStatus::CleaningUp => "cleaning_up",
    }
}

pub fn step_status_label(status: meow_core::StepStatus) -> &'static str {
    match status {
        meow_core::StepStatus::Pending => "pending",
        meow_core::StepStatus::Running => "running",
        meow_core::StepStatus::Completing => "completing",
        meow_core::StepStatus::Done => "done",
        meow_core::StepStatus::Failed => "failed",
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
