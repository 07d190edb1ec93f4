// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `meow run <template>` — create a run from a template and, optionally,
//! block until it reaches a terminal status.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::client::DaemonClient;
use crate::output::{status_exit_code, status_label, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Template reference to expand into the run's root steps.
    pub template: String,

    /// Template variable, repeatable: `--var name=value`.
    #[arg(long = "var", value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Block until the run reaches a terminal status, exiting non-zero
    /// if it did not finish `done`.
    #[arg(long)]
    pub wait: bool,
}

pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected `name=value`, got `{s}`")),
    }
}

pub async fn handle(args: RunArgs, format: OutputFormat) -> Result<()> {
    let client = DaemonClient::for_action()?;
    let variables: HashMap<String, String> = args.var.into_iter().collect();
    let run_id = client.run_create(args.template, variables).await?;

    if !args.wait {
        print_created(&run_id, format);
        return Ok(());
    }

    loop {
        let detail = client.run_status(run_id.clone()).await?;
        if detail.summary.status.is_terminal() {
            print_detail(&detail, format);
            let code = status_exit_code(detail.summary.status);
            if code != 0 {
                std::process::exit(code);
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn print_created(run_id: &meow_core::RunId, format: OutputFormat) {
    match format {
        OutputFormat::Text => println!("{run_id}"),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "run_id": run_id.as_str() }));
        }
    }
}

fn print_detail(detail: &meow_daemon::RunDetail, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            println!(
                "{}  {}  {}/{} done, {} failed",
                detail.summary.id,
                status_label(detail.summary.status),
                detail.summary.steps_done,
                detail.summary.steps_total,
                detail.summary.steps_failed,
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(detail).unwrap_or_default());
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
