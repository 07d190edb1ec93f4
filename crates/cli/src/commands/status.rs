// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `meow status <run-id>` — print a run's summary and per-step detail.

use anyhow::Result;
use clap::Args;

use crate::client::DaemonClient;
use crate::output::{status_label, step_status_label, OutputFormat};

#[derive(Args)]
pub struct StatusArgs {
    /// Run ID to inspect.
    pub run_id: String,
}

pub async fn handle(args: StatusArgs, format: OutputFormat) -> Result<()> {
    let client = DaemonClient::for_query()?;
    let detail = client.run_status(meow_core::RunId::new(args.run_id)).await?;

    match format {
        OutputFormat::Text => {
            println!(
                "{}  template={}  {}  {}/{} done, {} failed",
                detail.summary.id,
                detail.summary.template,
                status_label(detail.summary.status),
                detail.summary.steps_done,
                detail.summary.steps_total,
                detail.summary.steps_failed,
            );
            for step in &detail.steps {
                println!("  {}  {}", step.id, step_status_label(step.status));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&detail).unwrap_or_default());
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
