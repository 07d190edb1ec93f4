// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `meow daemon start|stop|status` — manage the `meowd` background
//! process directly, without going through an action/query command.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::client::DaemonClient;
use crate::daemon_process::{daemon_socket, probe_socket, read_daemon_pid};

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon if it isn't already running.
    Start,
    /// Stop the daemon (SIGTERM, then SIGKILL on timeout).
    Stop,
    /// Report whether the daemon is running and reachable.
    Status,
}

pub async fn handle(args: DaemonArgs) -> Result<()> {
    match args.command {
        DaemonCommand::Start => {
            DaemonClient::for_action()?;
            println!("daemon started");
        }
        DaemonCommand::Stop => {
            crate::client::stop_daemon();
            println!("daemon stopped");
        }
        DaemonCommand::Status => {
            let socket_path = daemon_socket()?;
            if socket_path.exists() && probe_socket(&socket_path) {
                match read_daemon_pid()? {
                    Some(pid) => println!("running (pid {pid})"),
                    None => println!("running"),
                }
            } else {
                println!("not running");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
