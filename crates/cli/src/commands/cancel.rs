// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `meow cancel <run-id>` — request a graceful stop (§4.1.4/4.1.6).

use anyhow::Result;
use clap::Args;

use crate::client::DaemonClient;

#[derive(Args)]
pub struct CancelArgs {
    /// Run ID to cancel.
    pub run_id: String,
}

pub async fn handle(args: CancelArgs) -> Result<()> {
    let client = DaemonClient::for_action()?;
    client.run_cancel(meow_core::RunId::new(args.run_id)).await?;
    Ok(())
}

#[cfg(test)]
#[path = "cancel_tests.rs"]
mod tests;
