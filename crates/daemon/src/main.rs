// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Meow Daemon (meowd)
//!
//! Background process owning every active run's orchestrator. Listens
//! on a Unix socket for CLI control requests and agent IPC traffic
//! (`spec.md` §6), and drives each run's tick loop as an independent
//! background task.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod env;
mod lifecycle;
mod listener;

use std::sync::Arc;

use lifecycle::{Config, LifecycleError, StartupResult};
use meow_engine::{IpcHandler, OrchestratorLookup};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

/// How often the background sweeper checks the event router for
/// expired `await_event` waiters (§4.2).
const EVENT_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("meowd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("meowd {}", env!("CARGO_PKG_VERSION"));
                println!("Meow Daemon - background process driving run orchestration");
                println!();
                println!("USAGE:");
                println!("    meowd");
                println!();
                println!("The daemon is typically started by the `meow` CLI and should not");
                println!("be invoked directly. It listens on a Unix socket for commands.");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: meowd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;
    let _log_guard = setup_logging(&config);

    info!("starting meow daemon");

    let StartupResult { daemon, listener } = match lifecycle::startup(&config).await {
        Ok(r) => r,
        Err(LifecycleError::LockFailed) => {
            let pid = std::fs::read_to_string(&config.lock_path).unwrap_or_default();
            eprintln!("meowd is already running");
            if !pid.trim().is_empty() {
                eprintln!("  pid: {}", pid.trim());
            }
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "failed to start daemon");
            return Err(e.into());
        }
    };

    let daemon = Arc::new(daemon);
    let ipc = Arc::new(IpcHandler::new(
        daemon.registry.clone() as Arc<dyn OrchestratorLookup<_, _, _, _>>,
        daemon.events.clone(),
    ));

    println!("READY");
    info!(socket = %config.socket_path.display(), "daemon listening");

    // Crash recovery runs after the socket is already accepting
    // connections (§4.1.5) so a waiting CLI isn't blocked behind it.
    {
        let daemon = daemon.clone();
        tokio::spawn(async move {
            if let Err(e) = daemon.recover_all().await {
                error!(error = %e, "recovery failed");
            }
        });
    }

    // Background sweeper (§4.2, §5): periodically drop expired
    // await-event waiters so a crashed/never-answering caller's slot
    // doesn't linger in the router forever, and piggyback the
    // IpcHandler's own lazily-cleaned `recent_completions`/
    // `step_acknowledgments` maps onto the same tick.
    {
        let events = daemon.events.clone();
        let ipc = ipc.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVENT_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let now = std::time::Instant::now();
                events.sweep_expired(now);
                ipc.prune_expired(now);
            }
        });
    }

    let serve_daemon = daemon.clone();
    let serve_ipc = ipc.clone();
    let serve_task = tokio::spawn(listener::serve(listener, serve_daemon, serve_ipc));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    info!("shutting down");
    serve_task.abort();
    lifecycle::shutdown(&config);
    Ok(())
}

fn setup_logging(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(
        config.log_path.parent().unwrap_or(&config.state_dir),
        config
            .log_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "daemon.log".to_string()),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    guard
}
