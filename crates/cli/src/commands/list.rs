// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `meow list` — enumerate runs, optionally filtered by status.

use anyhow::Result;
use clap::Args;

use crate::client::DaemonClient;
use crate::output::{status_label, OutputFormat};

#[derive(Args)]
pub struct ListArgs {
    /// Only show runs in this status.
    #[arg(long, value_enum)]
    pub status: Option<RunStatusArg>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum RunStatusArg {
    Pending,
    Running,
    Done,
    Failed,
    Stopped,
    CleaningUp,
}

impl From<RunStatusArg> for meow_core::RunStatus {
    fn from(v: RunStatusArg) -> Self {
        match v {
            RunStatusArg::Pending => meow_core::RunStatus::Pending,
            RunStatusArg::Running => meow_core::RunStatus::Running,
            RunStatusArg::Done => meow_core::RunStatus::Done,
            RunStatusArg::Failed => meow_core::RunStatus::Failed,
            RunStatusArg::Stopped => meow_core::RunStatus::Stopped,
            RunStatusArg::CleaningUp => meow_core::RunStatus::CleaningUp,
        }
    }
}

pub async fn handle(args: ListArgs, format: OutputFormat) -> Result<()> {
    let client = DaemonClient::for_query()?;
    let runs = client.run_list(args.status.map(Into::into)).await?;

    match format {
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("no runs");
                return Ok(());
            }
            for run in &runs {
                println!(
                    "{}  {}  {}  {}/{} done, {} failed",
                    run.id,
                    run.template,
                    status_label(run.status),
                    run.steps_done,
                    run.steps_total,
                    run.steps_failed,
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&runs).unwrap_or_default());
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "list_tests.rs"]
mod tests;
