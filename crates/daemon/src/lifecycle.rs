// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, crash recovery.
//!
//! Mirrors the shape of the teacher's `lifecycle/mod.rs` (exclusive PID
//! lock, fixed state-dir layout, `Config`/`StartupResult` split) but
//! with the WAL/checkpoint/materialized-state machinery replaced by the
//! atomic [`FsRunStore`] — there is no event log to replay, only a
//! directory of `Run` files and the per-run recovery pass described in
//! `spec.md` §4.1.5.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use meow_adapters::{
    AdapterAgentManager, ClaudeAgentAdapter, TmuxAdapter, TokioShellRunner, TracedAgent,
    TracedSession,
};
use meow_core::{Clock, IdGen, RunId, RunStatus, SystemClock, UuidIdGen};
use meow_engine::{
    EventRouter, Orchestrator, OrchestratorDeps, OrchestratorLookup, OrchestratorRegistry,
    PendingCommands,
};
use meow_runbook::{Expander, FsTemplateLoader};
use meow_storage::{FsRunStore, RunStore, RunStoreError};
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::env;

/// Concrete agent-manager stack: tmux-backed sessions, the Claude CLI
/// adapter on top, tracing wrapped around both layers — the same
/// composition the teacher wires in its own `lifecycle/mod.rs`.
pub type DaemonAgentManager =
    AdapterAgentManager<TracedAgent<ClaudeAgentAdapter<TracedSession<TmuxAdapter>>>>;

pub type DaemonOrchestrator =
    Orchestrator<FsRunStore, DaemonAgentManager, TokioShellRunner, SystemClock>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine a state directory (set MEOW_STATE_DIR)")]
    NoStateDir,
    #[error("daemon is already running")]
    LockFailed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] RunStoreError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    pub runs_path: PathBuf,
    pub templates_path: PathBuf,
    pub poll_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir().ok_or(LifecycleError::NoStateDir)?;
        Ok(Self {
            socket_path: state_dir.join("daemon.sock"),
            lock_path: state_dir.join("daemon.pid"),
            log_path: state_dir.join("daemon.log"),
            runs_path: state_dir.join("runs"),
            templates_path: state_dir.join("templates"),
            poll_interval: env::poll_interval_ms()
                .unwrap_or(meow_engine::DEFAULT_POLL_INTERVAL),
            state_dir,
        })
    }
}

/// Everything the running daemon needs to dispatch requests and
/// recover runs: the shared deps every [`DaemonOrchestrator`] is built
/// from, plus the registry tracking which runs are currently active.
pub struct DaemonState {
    pub config: Config,
    #[allow(dead_code)]
    lock_file: File,
    pub store: Arc<FsRunStore>,
    pub agents: Arc<DaemonAgentManager>,
    pub shell: Arc<TokioShellRunner>,
    pub loader: Arc<FsTemplateLoader>,
    pub events: Arc<EventRouter>,
    pub pending: PendingCommands,
    pub registry: Arc<OrchestratorRegistry<FsRunStore, DaemonAgentManager, TokioShellRunner, SystemClock>>,
    pub expander: Expander,
    pub orch_sock: String,
}

pub struct StartupResult {
    pub daemon: DaemonState,
    pub listener: UnixListener,
}

impl DaemonState {
    fn deps(&self) -> OrchestratorDeps<FsRunStore, DaemonAgentManager, TokioShellRunner, SystemClock> {
        OrchestratorDeps {
            store: self.store.clone(),
            agents: self.agents.clone(),
            shell: self.shell.clone(),
            clock: SystemClock,
            loader: self.loader.clone(),
            events: self.events.clone(),
            pending: self.pending.clone(),
            poll_interval: self.config.poll_interval,
            orch_sock: self.orch_sock.clone(),
        }
    }

    /// Look up the orchestrator currently serving `run_id`, if the run
    /// is active (not yet recovered, or already terminal and evicted
    /// from the registry).
    pub fn registry_lookup(&self, run_id: &RunId) -> Option<Arc<DaemonOrchestrator>> {
        self.registry.by_run(run_id)
    }

    /// Build (but do not start ticking) the orchestrator owning `run_id`,
    /// registering it so IPC traffic and CLI queries can reach it.
    pub fn orchestrator_for(&self, run_id: RunId) -> Arc<DaemonOrchestrator> {
        if let Some(existing) = self.registry.by_run(&run_id) {
            return existing;
        }
        let orch = Orchestrator::new(run_id.clone(), self.deps());
        self.registry.insert(run_id, orch.clone());
        orch
    }

    /// Spawn the tick loop for `orch` as a background task, deregistering
    /// it from the active registry once the run reaches a terminal
    /// status so a later run with a reused ID (tests, replay) doesn't
    /// collide with a stale entry.
    pub fn spawn_run(&self, orch: Arc<DaemonOrchestrator>) {
        let registry = self.registry.clone();
        let run_id = orch.run_id().clone();
        tokio::spawn(async move {
            match orch.run().await {
                Ok(status) => info!(run = %run_id, ?status, "run reached terminal status"),
                Err(e) => warn!(run = %run_id, error = %e, "run exited with error"),
            }
            registry.remove(&run_id);
        });
    }

    /// Create a new run from a template, persist it, and start ticking
    /// it. Returns the fresh `RunId`.
    pub fn create_run(
        &self,
        template: String,
        variables: std::collections::HashMap<String, String>,
    ) -> Result<RunId, String> {
        let run_id = RunId::new(UuidIdGen.next());
        let mut run = meow_core::Run::new(run_id.clone(), template.clone(), variables.clone());
        let steps = self
            .expander
            .expand_root(self.loader.as_ref(), &template, &variables)
            .map_err(|e| e.to_string())?;
        for step in steps {
            run.steps.insert(step.id.clone(), step);
        }
        run.status = RunStatus::Running;
        run.started_at = Some(SystemClock.epoch_ms());
        self.store.create(&run).map_err(|e| e.to_string())?;
        let orch = self.orchestrator_for(run_id.clone());
        self.spawn_run(orch);
        Ok(run_id)
    }

    /// Re-attach a running orchestrator to every non-terminal run found
    /// in the store, after first reconciling its in-memory state via
    /// `Recover` (§4.1.5). Terminal runs are left untouched.
    pub async fn recover_all(&self) -> Result<(), LifecycleError> {
        for run in self.store.list(&meow_storage::RunFilter::default())? {
            if run.status.is_terminal() {
                continue;
            }
            let orch = self.orchestrator_for(run.id.clone());
            if let Err(e) = orch.recover().await {
                warn!(run = %run.id, error = %e, "recovery failed");
                continue;
            }
            self.spawn_run(orch);
        }
        Ok(())
    }
}

/// Acquire the exclusive daemon lock, open the run store and template
/// loader, bind the listening socket, and return everything `main`
/// needs to start serving. Crash recovery (`recover_all`) is *not* run
/// here — `main` runs it after printing the ready marker so the socket
/// is immediately accepting connections.
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    fs::create_dir_all(&config.state_dir)?;
    fs::create_dir_all(&config.runs_path)?;
    fs::create_dir_all(&config.templates_path)?;

    let lock_file = File::create(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| LifecycleError::LockFailed)?;
    fs::write(&config.lock_path, std::process::id().to_string())?;

    if config.socket_path.exists() {
        let _ = fs::remove_file(&config.socket_path);
    }
    let listener = UnixListener::bind(&config.socket_path)?;

    let store = Arc::new(FsRunStore::open(config.runs_path.clone())?);
    let agents = Arc::new(AdapterAgentManager::new(TracedAgent::new(
        ClaudeAgentAdapter::new(TracedSession::new(TmuxAdapter::new())),
    )));
    let shell = Arc::new(TokioShellRunner);
    let loader = Arc::new(FsTemplateLoader::new(config.templates_path.clone()));
    let events = Arc::new(EventRouter::new());
    let registry = Arc::new(OrchestratorRegistry::new());

    let daemon = DaemonState {
        config: config.clone(),
        lock_file,
        store,
        agents,
        shell,
        loader,
        events,
        pending: PendingCommands::new(),
        registry,
        expander: Expander::new(),
        orch_sock: config.socket_path.to_string_lossy().into_owned(),
    };

    Ok(StartupResult { daemon, listener })
}

/// Release the daemon lock and socket file. Idempotent: safe to call
/// even if startup partially failed.
pub fn shutdown(config: &Config) {
    let _ = fs::remove_file(&config.lock_path);
    let _ = fs::remove_file(&config.socket_path);
}
