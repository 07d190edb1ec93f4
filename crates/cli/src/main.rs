// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! meow - orchestration CLI over the `meowd` daemon.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod commands;
mod daemon_process;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{cancel, daemon, list, run, status};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "meow", version, about = "Drive DAG-orchestrated runs through meowd")]
struct Cli {
    /// Output format.
    #[arg(short = 'o', long = "output", value_enum, default_value_t, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a run from a template.
    Run(run::RunArgs),
    /// Show a run's summary and per-step status.
    Status(status::StatusArgs),
    /// Request a graceful stop of a run.
    Cancel(cancel::CancelArgs),
    /// List runs, optionally filtered by status.
    List(list::ListArgs),
    /// Manage the `meowd` background process.
    Daemon(daemon::DaemonArgs),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run::handle(args, cli.output).await,
        Commands::Status(args) => status::handle(args, cli.output).await,
        Commands::Cancel(args) => cancel::handle(args).await,
        Commands::List(args) => list::handle(args, cli.output).await,
        Commands::Daemon(args) => daemon::handle(args).await,
    }
}
