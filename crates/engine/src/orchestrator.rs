// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The tick loop: the core scheduling engine (§4.1 of `spec.md`).
//!
//! One [`Orchestrator`] owns one [`Run`]. It holds a single in-process
//! mutex serializing every tick, every `HandleStepDone` call, crash
//! recovery, and cleanup's state transitions — contention between the
//! tick and IPC is the documented source of lost-update bugs in naive
//! designs, so that serialization is non-negotiable. The [`RunStore`]
//! is the source of truth; the `Run` is re-read from it at the top of
//! every tick rather than trusted from a prior iteration.

use crate::commands::{PendingCommands, TaskTracker};
use crate::event_router::EventRouter;
use crate::output_validation::validate_outputs;
use meow_adapters::{AgentManager, ShellOutcome, ShellRunner};
use meow_core::{
    AgentId, Clock, CoreError, ForeachConfig, Run, RunId, RunStatus, Step, StepError, StepExecutor,
    StepId, StepStatus,
};
use meow_runbook::{ExpandError, Expander, TemplateLoader};
use meow_storage::{RunStore, RunStoreError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{info, warn};

/// Post-interrupt mercy period before an unresponsive step is failed
/// (§4.1.1 step 2). Modeled as a constant distinct from
/// [`crate::ipc_handler::AGENT_STOPPED_GRACE`] even though both are
/// currently 10s — `spec.md`'s open questions call these out as
/// independent tunables in some source variants.
pub const INTERRUPT_GRACE: Duration = Duration::from_secs(10);

/// Default tick interval when not woken early by an IPC completion.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] RunStoreError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Expand(#[from] ExpandError),
    #[error("shutdown requested")]
    Cancelled,
}

/// Everything the orchestrator needs but doesn't own: storage, agent
/// supervision, shell execution, the template loader, the shared event
/// router, and the process-wide pending-command registry.
pub struct OrchestratorDeps<S, A, R, C> {
    pub store: Arc<S>,
    pub agents: Arc<A>,
    pub shell: Arc<R>,
    pub clock: C,
    pub loader: Arc<dyn TemplateLoader>,
    pub events: Arc<EventRouter>,
    pub pending: PendingCommands,
    pub poll_interval: Duration,
    /// Path of the orchestrator's listening Unix socket, handed to every
    /// spawned agent as `MEOW_ORCH_SOCK` (§6) so it can phone home over
    /// the IPC protocol without the caller needing to rediscover it.
    pub orch_sock: String,
}

pub struct Orchestrator<S, A, R, C> {
    run_id: RunId,
    store: Arc<S>,
    agents: Arc<A>,
    shell: Arc<R>,
    clock: C,
    loader: Arc<dyn TemplateLoader>,
    events: Arc<EventRouter>,
    pending: PendingCommands,
    poll_interval: Duration,
    orch_sock: String,
    lock: Mutex<()>,
    tasks: TaskTracker,
    wake: Notify,
    cancel: Notify,
    shutting_down: AtomicBool,
    expander: Expander,
}

impl<S, A, R, C> Orchestrator<S, A, R, C>
where
    S: RunStore + 'static,
    A: AgentManager + 'static,
    R: ShellRunner + 'static,
    C: Clock + 'static,
{
    pub fn new(run_id: RunId, deps: OrchestratorDeps<S, A, R, C>) -> Arc<Self> {
        Arc::new(Self {
            run_id,
            store: deps.store,
            agents: deps.agents,
            shell: deps.shell,
            clock: deps.clock,
            loader: deps.loader,
            events: deps.events,
            pending: deps.pending,
            poll_interval: deps.poll_interval,
            orch_sock: deps.orch_sock,
            lock: Mutex::new(()),
            tasks: TaskTracker::new(),
            wake: Notify::new(),
            cancel: Notify::new(),
            shutting_down: AtomicBool::new(false),
            expander: Expander::new(),
        })
    }

    /// Wake the tick loop early (called by `HandleStepDone` and the
    /// IPC handler after a mutating completion) instead of waiting for
    /// the next poll interval.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// The run this orchestrator owns.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Block until the run reaches a terminal status or shutdown is
    /// requested.
    pub async fn run(self: &Arc<Self>) -> Result<RunStatus, OrchestratorError> {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(OrchestratorError::Cancelled);
            }
            let terminal = self.tick().await?;
            if terminal {
                let run = self.store.get(&self.run_id)?;
                return Ok(run.status);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {}
                _ = self.cancel.notified() => {
                    return Err(OrchestratorError::Cancelled);
                }
            }
        }
    }

    /// Cancel all in-flight async commands for this run, wait for their
    /// tasks to exit, and stop the tick loop. Never mutates persisted
    /// state itself — a cancelled command's own completion handler
    /// decides whether to record anything, and crash recovery cleans up
    /// whatever remains.
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
        self.pending.cancel_all_for_run(&self.run_id);
        self.tasks.join_all().await;
    }

    // ---- tick ----------------------------------------------------

    async fn tick(self: &Arc<Self>) -> Result<bool, OrchestratorError> {
        let _guard = self.lock.lock().await;
        let mut run = self.store.get(&self.run_id)?;
        let now_ms = self.clock.epoch_ms();
        let mut changed = false;

        if run.status == RunStatus::Pending {
            run.status = RunStatus::Running;
            run.started_at = Some(now_ms);
            changed = true;
        }

        if run.status == RunStatus::CleaningUp {
            let reason = run.prior_status.unwrap_or(RunStatus::Done);
            drop(_guard);
            self.run_cleanup(reason).await?;
            return Ok(true);
        }

        if run.status.is_terminal() {
            return Ok(true);
        }

        changed |= self.check_step_timeouts(&mut run, now_ms);
        changed |= self.reconcile_parents(&mut run);

        if run.all_steps_terminal() {
            let reason = if run.any_step_failed() {
                RunStatus::Failed
            } else {
                RunStatus::Done
            };
            if changed {
                self.store.save(&run)?;
            }
            drop(_guard);
            self.run_cleanup(reason).await?;
            return Ok(true);
        }

        let ready = self.priority_sorted_ready(&run);
        changed |= self.dispatch(&mut run, ready, now_ms).await;

        if changed {
            self.store.save(&run)?;
        }
        Ok(false)
    }

    /// Two-phase interrupt-then-fail timeout protocol (§4.1.1 step 2).
    fn check_step_timeouts(&self, run: &mut Run, now_ms: u64) -> bool {
        let mut changed = false;
        let mut to_interrupt = Vec::new();
        let mut to_fail = Vec::new();

        for step in run.steps.values() {
            if step.status != StepStatus::Running {
                continue;
            }
            let Some(timeout) = step.executor.timeout() else {
                continue;
            };
            let Some(started_at) = step.started_at else {
                continue;
            };
            let elapsed = Duration::from_millis(now_ms.saturating_sub(started_at));
            match step.interrupted_at {
                None if elapsed > timeout => {
                    to_interrupt.push(step.id.clone());
                }
                Some(interrupted_at) => {
                    let since_interrupt =
                        Duration::from_millis(now_ms.saturating_sub(interrupted_at));
                    if since_interrupt > INTERRUPT_GRACE {
                        to_fail.push(step.id.clone());
                    }
                }
                _ => {}
            }
        }

        for step_id in to_interrupt {
            if let Some(agent_id) = run
                .steps
                .get(&step_id)
                .and_then(|s| s.executor.agent_id())
                .cloned()
            {
                self.spawn_interrupt(agent_id);
            }
            if let Some(step) = run.steps.get_mut(&step_id) {
                step.interrupted_at = Some(now_ms);
                changed = true;
            }
        }
        for step_id in to_fail {
            if let Some(step) = run.steps.get_mut(&step_id) {
                step.status = StepStatus::Failed;
                step.error = Some(StepError::timeout(format!(
                    "step {step_id} timed out and did not respond to interrupt"
                )));
                changed = true;
            }
        }
        changed
    }

    fn spawn_interrupt(&self, agent_id: AgentId) {
        let agents = self.agents.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = agents.interrupt(&agent_id).await {
                warn!(%agent_id, error = %e, "failed to send interrupt to agent");
            }
        });
        self.tasks.track(handle);
    }

    /// Transition branch/expand parents to `done`/`failed` once every
    /// step in `ExpandedInto` is terminal (invariant 4).
    fn reconcile_parents(&self, run: &mut Run) -> bool {
        let mut changed = false;
        let parent_ids: Vec<StepId> = run
            .steps
            .values()
            .filter(|s| s.status == StepStatus::Running && s.is_parent() && !s.expanded_into.is_empty())
            .map(|s| s.id.clone())
            .collect();

        for parent_id in parent_ids {
            let Some(parent) = run.steps.get(&parent_id) else {
                continue;
            };
            let all_terminal = parent
                .expanded_into
                .iter()
                .all(|c| run.steps.get(c).is_some_and(|s| s.status.is_terminal()));
            if !all_terminal {
                continue;
            }
            let any_failed = parent
                .expanded_into
                .iter()
                .any(|c| run.steps.get(c).map(|s| s.status == StepStatus::Failed).unwrap_or(false));
            if let Some(parent) = run.steps.get_mut(&parent_id) {
                parent.status = if any_failed {
                    StepStatus::Failed
                } else {
                    StepStatus::Done
                };
                parent.done_at = Some(self.clock.epoch_ms());
                if any_failed && parent.error.is_none() {
                    parent.error = Some(StepError::new("one or more expanded children failed"));
                }
                changed = true;
            }
        }
        changed
    }

    /// Ready steps, sorted by priority tier then executor kind name
    /// (§4.1.1 step 6).
    fn priority_sorted_ready(&self, run: &Run) -> Vec<StepId> {
        let mut ready: Vec<&Step> = run.ready_steps();
        ready.sort_by(|a, b| {
            a.executor
                .priority_tier()
                .cmp(&b.executor.priority_tier())
                .then_with(|| a.executor.kind_name().cmp(b.executor.kind_name()))
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        ready.into_iter().map(|s| s.id.clone()).collect()
    }

    async fn dispatch(self: &Arc<Self>, run: &mut Run, ready: Vec<StepId>, now_ms: u64) -> bool {
        let mut changed = false;
        let mut agent_busy: HashSet<AgentId> = run
            .steps
            .values()
            .filter(|s| s.status == StepStatus::Running)
            .filter_map(|s| s.executor.agent_id().cloned())
            .collect();

        for step_id in ready {
            let Some(step) = run.steps.get(&step_id) else {
                continue;
            };
            if step.status != StepStatus::Pending {
                continue;
            }
            if self.foreach_gated(run, &step_id) {
                continue;
            }

            match step.executor.clone() {
                StepExecutor::Agent { agent_id, .. } => {
                    if agent_busy.contains(&agent_id) {
                        continue;
                    }
                    agent_busy.insert(agent_id.clone());
                    self.dispatch_agent(run, &step_id, now_ms);
                    changed = true;
                }
                StepExecutor::Shell { .. } => {
                    self.dispatch_shell(run, &step_id, now_ms);
                    changed = true;
                }
                StepExecutor::Branch { .. } => {
                    self.dispatch_branch(run, &step_id, now_ms);
                    changed = true;
                }
                StepExecutor::Spawn { .. } => {
                    self.dispatch_spawn(run, &step_id, now_ms).await;
                    changed = true;
                }
                StepExecutor::Kill { .. } => {
                    self.dispatch_kill(run, &step_id, now_ms).await;
                    changed = true;
                }
                StepExecutor::Expand { .. } => {
                    self.dispatch_expand(run, &step_id, now_ms);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Foreach `max_concurrent` gating (§4.1.1 open question): at most N
    /// iterations of a parallel `foreach` expansion may have any step
    /// `running` at once. Only applies to steps expanded from a
    /// `foreach` expand step with `max_concurrent` set and not
    /// sequential (sequential mode already serializes via the implicit
    /// dependency chain).
    fn foreach_gated(&self, run: &Run, step_id: &StepId) -> bool {
        let Some(step) = run.steps.get(step_id) else {
            return false;
        };
        let Some(parent_id) = &step.expanded_from else {
            return false;
        };
        let Some(parent) = run.steps.get(parent_id) else {
            return false;
        };
        let StepExecutor::Expand {
            foreach: Some(ForeachConfig {
                sequential: false,
                max_concurrent: Some(max),
                ..
            }),
            ..
        } = &parent.executor
        else {
            return false;
        };

        let Some(iteration) = iteration_prefix(parent_id, step_id) else {
            return false;
        };
        let mut running_iterations: HashSet<StepId> = HashSet::new();
        for child_id in &parent.expanded_into {
            let Some(child) = run.steps.get(child_id) else {
                continue;
            };
            if child.status != StepStatus::Running {
                continue;
            }
            if let Some(iter) = iteration_prefix(parent_id, child_id) {
                running_iterations.insert(iter);
            }
        }
        running_iterations.len() >= *max && !running_iterations.contains(&iteration)
    }

    fn dispatch_agent(&self, run: &mut Run, step_id: &StepId, now_ms: u64) {
        let (agent_id, prompt) = {
            let Some(step) = run.steps.get_mut(step_id) else {
                return;
            };
            step.status = StepStatus::Running;
            step.started_at = Some(now_ms);
            match &step.executor {
                StepExecutor::Agent {
                    agent_id, prompt, ..
                } => (agent_id.clone(), prompt.clone()),
                _ => unreachable!("dispatch_agent called on non-agent step"),
            }
        };

        let agents = self.agents.clone();
        let orch_agents = self.agents.clone();
        let run_id = self.run_id.clone();
        let step_id = step_id.clone();
        let store = self.store.clone();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            if agents.inject_prompt(&agent_id, &prompt).await.is_err() {
                this.handle_agent_dispatch_failure(store, orch_agents, run_id, step_id, agent_id)
                    .await;
            }
        });
        self.tasks.track(handle);
    }

    /// Handle an async prompt-injection failure (§4.1.2): probe whether
    /// the agent session is alive. If so the failure is transient —
    /// revert the step to `pending` for the next tick's retry. If the
    /// session is dead, mark the step `failed`.
    async fn handle_agent_dispatch_failure(
        self: Arc<Self>,
        store: Arc<S>,
        agents: Arc<A>,
        run_id: RunId,
        step_id: StepId,
        agent_id: AgentId,
    ) {
        let _guard = self.lock.lock().await;
        let Ok(mut run) = store.get(&run_id) else {
            return;
        };
        let alive = agents.is_alive(&agent_id).await;
        if let Some(step) = run.steps.get_mut(&step_id) {
            if alive {
                step.status = StepStatus::Pending;
                step.started_at = None;
            } else {
                step.status = StepStatus::Failed;
                step.error = Some(StepError::new("agent session is dead"));
            }
            let _ = store.save(&run);
        }
        self.wake();
    }

    fn dispatch_shell(self: &Arc<Self>, run: &mut Run, step_id: &StepId, now_ms: u64) {
        let (command, cwd, env, timeout, on_error) = {
            let Some(step) = run.steps.get_mut(step_id) else {
                return;
            };
            step.status = StepStatus::Running;
            step.started_at = Some(now_ms);
            match &step.executor {
                StepExecutor::Shell {
                    command,
                    cwd,
                    env,
                    timeout,
                    on_error,
                } => (command.clone(), cwd.clone(), env.clone(), *timeout, *on_error),
                _ => unreachable!("dispatch_shell called on non-shell step"),
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.pending
            .insert(self.run_id.clone(), step_id.clone(), cancel_tx);

        let shell = self.shell.clone();
        let store = self.store.clone();
        let pending = self.pending.clone();
        let run_id = self.run_id.clone();
        let step_id = step_id.clone();
        let this = self.clone();

        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = shell.run(&command, cwd.as_ref(), &env, timeout) => Some(outcome),
                _ = cancel_rx => None,
            };
            pending.remove(&run_id, &step_id);
            let Some(outcome) = outcome else {
                // Cancelled by Shutdown; persisted state is left alone
                // for crash recovery to reset.
                return;
            };
            this.finish_shell(store, run_id, step_id, outcome, on_error)
                .await;
        });
        self.tasks.track(handle);
    }

    async fn finish_shell(
        self: Arc<Self>,
        store: Arc<S>,
        run_id: RunId,
        step_id: StepId,
        outcome: ShellOutcome,
        on_error: meow_core::OnError,
    ) {
        let _guard = self.lock.lock().await;
        let Ok(mut run) = store.get(&run_id) else {
            return;
        };
        if let Some(step) = run.steps.get_mut(&step_id) {
            apply_shell_outcome(step, &outcome, on_error, self.clock.epoch_ms());
            let _ = store.save(&run);
        }
        self.wake();
    }

    fn dispatch_branch(self: &Arc<Self>, run: &mut Run, step_id: &StepId, now_ms: u64) {
        let (condition, cwd, timeout, on_true, on_false, on_timeout, vars) = {
            let Some(step) = run.steps.get_mut(step_id) else {
                return;
            };
            step.status = StepStatus::Running;
            step.started_at = Some(now_ms);
            match &step.executor {
                StepExecutor::Branch {
                    condition,
                    cwd,
                    timeout,
                    on_true,
                    on_false,
                    on_timeout,
                    vars,
                } => (
                    condition.clone(),
                    cwd.clone(),
                    *timeout,
                    on_true.clone(),
                    on_false.clone(),
                    on_timeout.clone(),
                    vars.clone(),
                ),
                _ => unreachable!("dispatch_branch called on non-branch step"),
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.pending
            .insert(self.run_id.clone(), step_id.clone(), cancel_tx);

        let shell = self.shell.clone();
        let store = self.store.clone();
        let pending = self.pending.clone();
        let run_id = self.run_id.clone();
        let step_id = step_id.clone();
        let this = self.clone();

        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = shell.run(&condition, cwd.as_ref(), &HashMap::new(), timeout) => Some(outcome),
                _ = cancel_rx => None,
            };
            pending.remove(&run_id, &step_id);
            let Some(outcome) = outcome else {
                return;
            };
            this.finish_branch(
                store, run_id, step_id, outcome, on_true, on_false, on_timeout, vars,
            )
            .await;
        });
        self.tasks.track(handle);
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_branch(
        self: Arc<Self>,
        store: Arc<S>,
        run_id: RunId,
        step_id: StepId,
        outcome: ShellOutcome,
        on_true: Option<String>,
        on_false: Option<String>,
        on_timeout: Option<String>,
        vars: HashMap<String, String>,
    ) {
        let _guard = self.lock.lock().await;
        let Ok(mut run) = store.get(&run_id) else {
            return;
        };
        let now_ms = self.clock.epoch_ms();
        let branch_outcome = if outcome.timed_out {
            meow_core::BranchOutcome::Timeout
        } else if outcome.exit_code == Some(0) {
            meow_core::BranchOutcome::True
        } else {
            meow_core::BranchOutcome::False
        };

        let target = match branch_outcome {
            meow_core::BranchOutcome::True => on_true,
            meow_core::BranchOutcome::False => on_false,
            meow_core::BranchOutcome::Timeout => on_timeout.or(on_false),
        };

        if let Some(step) = run.steps.get_mut(&step_id) {
            step.outputs.insert(
                "outcome".to_string(),
                serde_json::json!(branch_outcome_str(branch_outcome)),
            );
            if let Some(code) = outcome.exit_code {
                step.outputs
                    .insert("exit_code".to_string(), serde_json::json!(code));
            }
            step.outputs
                .insert("stdout".to_string(), serde_json::json!(outcome.stdout));
            step.outputs
                .insert("stderr".to_string(), serde_json::json!(outcome.stderr));
        }

        match target {
            Some(template_ref) => {
                let mut resolver = |name: &str| resolve_scoped_output(&run, &step_id, name);
                let expanded = self.expander.expand(
                    self.loader.as_ref(),
                    &template_ref,
                    &vars,
                    &step_id,
                    0,
                    &mut resolver,
                );
                match expanded {
                    Ok(children) => {
                        let child_ids: Vec<StepId> = children.iter().map(|c| c.id.clone()).collect();
                        for child in children {
                            run.steps.insert(child.id.clone(), child);
                        }
                        if let Some(step) = run.steps.get_mut(&step_id) {
                            step.expanded_into = child_ids;
                            step.status = StepStatus::Running;
                        }
                    }
                    Err(e) => {
                        if let Some(step) = run.steps.get_mut(&step_id) {
                            step.status = StepStatus::Failed;
                            step.error = Some(StepError::new(format!("branch expansion failed: {e}")));
                        }
                    }
                }
            }
            None => {
                if let Some(step) = run.steps.get_mut(&step_id) {
                    step.status = StepStatus::Done;
                    step.done_at = Some(now_ms);
                }
            }
        }

        let _ = store.save(&run);
        self.wake();
    }

    async fn dispatch_spawn(&self, run: &mut Run, step_id: &StepId, now_ms: u64) {
        // §4.1.2: spawn/kill complete synchronously from the
        // orchestrator's perspective — awaited inline rather than
        // handed off to a background task.
        let config = {
            let Some(step) = run.steps.get(step_id) else {
                return;
            };
            match &step.executor {
                StepExecutor::Spawn {
                    agent_id,
                    agent_name,
                    command,
                    cwd,
                    env,
                } => {
                    let mut full_env: Vec<(String, String)> =
                        env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    // §6: every spawned agent is handed its own identity,
                    // the run it belongs to, and where to reach the
                    // orchestrator over IPC.
                    full_env.push(("MEOW_AGENT".to_string(), agent_id.as_str().to_string()));
                    full_env.push(("MEOW_WORKFLOW".to_string(), self.run_id.as_str().to_string()));
                    full_env.push(("MEOW_ORCH_SOCK".to_string(), self.orch_sock.clone()));
                    meow_adapters::AgentSpawnConfig {
                        agent_id: agent_id.clone(),
                        agent_name: agent_name.clone(),
                        command: command.clone(),
                        env: full_env,
                        workspace_path: cwd.clone().unwrap_or_default(),
                        cwd: cwd.clone(),
                        prompt: String::new(),
                        pipeline_name: String::new(),
                        pipeline_id: self.run_id.as_str().to_string(),
                        project_root: cwd.clone().unwrap_or_default(),
                        session_config: HashMap::new(),
                    }
                }
                _ => unreachable!("dispatch_spawn called on non-spawn step"),
            }
        };
        let agent_id = config.agent_id.clone();
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let result = self.agents.spawn(config, tx).await;
        let Some(step) = run.steps.get_mut(step_id) else {
            return;
        };
        match result {
            Ok(handle) => {
                step.status = StepStatus::Done;
                step.started_at = Some(now_ms);
                step.done_at = Some(now_ms);
                run.agents.insert(
                    agent_id,
                    meow_core::AgentRegistration {
                        session_id: handle.session_id,
                    },
                );
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.started_at = Some(now_ms);
                step.error = Some(StepError::new(format!("spawn failed: {e}")));
            }
        }
    }

    async fn dispatch_kill(&self, run: &mut Run, step_id: &StepId, now_ms: u64) {
        let agent_id = {
            let Some(step) = run.steps.get(step_id) else {
                return;
            };
            match &step.executor {
                StepExecutor::Kill { agent_id } => agent_id.clone(),
                _ => unreachable!("dispatch_kill called on non-kill step"),
            }
        };
        let result = self.agents.kill(&agent_id).await;
        let Some(step) = run.steps.get_mut(step_id) else {
            return;
        };
        step.started_at = Some(now_ms);
        match result {
            Ok(()) => {
                step.status = StepStatus::Done;
                step.done_at = Some(now_ms);
                run.agents.remove(&agent_id);
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.error = Some(StepError::new(format!("kill failed: {e}")));
            }
        }
    }

    fn dispatch_expand(&self, run: &mut Run, step_id: &StepId, now_ms: u64) {
        let (template, vars, foreach) = {
            let Some(step) = run.steps.get(step_id) else {
                return;
            };
            match &step.executor {
                StepExecutor::Expand {
                    template,
                    vars,
                    foreach,
                } => (template.clone(), vars.clone(), foreach.clone()),
                _ => unreachable!("dispatch_expand called on non-expand step"),
            }
        };

        let result = {
            let run_shared: &Run = run;
            let mut resolver = |name: &str| resolve_scoped_output(run_shared, step_id, name);
            match &foreach {
                Some(cfg) => self.expander.expand_foreach(
                    self.loader.as_ref(),
                    &template,
                    &vars,
                    step_id,
                    0,
                    &cfg.items,
                    &cfg.item_var,
                    cfg.sequential,
                    &mut resolver,
                ),
                None => self.expander.expand(
                    self.loader.as_ref(),
                    &template,
                    &vars,
                    step_id,
                    0,
                    &mut resolver,
                ),
            }
        };

        let Some(step) = run.steps.get_mut(step_id) else {
            return;
        };
        step.started_at = Some(now_ms);
        match result {
            Ok(children) => {
                if children.is_empty() {
                    // An empty foreach completes immediately (§8 boundary behavior).
                    step.status = StepStatus::Done;
                    step.done_at = Some(now_ms);
                    return;
                }
                let child_ids: Vec<StepId> = children.iter().map(|c| c.id.clone()).collect();
                step.expanded_into = child_ids;
                step.status = StepStatus::Running;
                let children_owned: Vec<Step> = children;
                drop(step);
                for child in children_owned {
                    run.steps.insert(child.id.clone(), child);
                }
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.error = Some(StepError::new(format!("expansion failed: {e}")));
            }
        }
    }

    // ---- step-done / IPC entry point -----------------------------

    /// Validate outputs, transition `running -> completing -> done`,
    /// persist. Reverts to `running` on validation failure so the
    /// agent may retry (§3 step lifecycle). Silently no-ops against a
    /// terminal or `cleaning_up` run (§4.3) — late completions racing
    /// with cleanup must not resurrect a closed run.
    pub async fn handle_step_done(
        self: &Arc<Self>,
        agent_id: &AgentId,
        step_id: &StepId,
        outputs: HashMap<String, serde_json::Value>,
    ) -> Result<(), String> {
        let _guard = self.lock.lock().await;
        let mut run = self
            .store
            .get(&self.run_id)
            .map_err(|e| e.to_string())?;

        if run.status.is_terminal() || run.status == RunStatus::CleaningUp {
            return Ok(());
        }

        let Some(step) = run.steps.get(step_id) else {
            return Err(format!("step {step_id} not found"));
        };
        let (declared_agent, expected) = match &step.executor {
            StepExecutor::Agent {
                agent_id,
                expected_outputs,
                ..
            } => (agent_id.clone(), expected_outputs.clone()),
            _ => return Err(format!("step {step_id} is not an agent step")),
        };
        if &declared_agent != agent_id {
            return Err(format!("step {step_id} belongs to a different agent"));
        }
        if step.status != StepStatus::Running {
            // Not currently running: duplicate or racing signal, ignored.
            return Ok(());
        }

        {
            let Some(step) = run.steps.get_mut(step_id) else {
                return Err(format!("step {step_id} disappeared mid-validation"));
            };
            step.status = StepStatus::Completing;
        }

        match validate_outputs(&expected, &outputs) {
            Ok(()) => {
                let now_ms = self.clock.epoch_ms();
                let Some(step) = run.steps.get_mut(step_id) else {
                    return Err(format!("step {step_id} disappeared mid-validation"));
                };
                step.outputs = outputs;
                step.status = StepStatus::Done;
                step.done_at = Some(now_ms);
                self.store.save(&run).map_err(|e| e.to_string())?;
                self.wake();
                Ok(())
            }
            Err(reason) => {
                let Some(step) = run.steps.get_mut(step_id) else {
                    return Err(format!("step {step_id} disappeared mid-validation"));
                };
                step.status = StepStatus::Running;
                self.store.save(&run).map_err(|e| e.to_string())?;
                Err(reason)
            }
        }
    }

    /// Current status of a step, for `GetStepStatus` (§6).
    pub async fn get_step_status(&self, step_id: &StepId) -> Result<StepStatus, String> {
        let _guard = self.lock.lock().await;
        let run = self.store.get(&self.run_id).map_err(|e| e.to_string())?;
        run.steps
            .get(step_id)
            .map(|s| s.status)
            .ok_or_else(|| format!("step {step_id} not found"))
    }

    /// Whether `agent_id` is registered on this run, used by the IPC
    /// handler's agent-to-run lookup for `GetSessionId`/`GetPrompt`.
    pub fn has_agent(&self, agent_id: &AgentId) -> bool {
        self.store
            .get(&self.run_id)
            .map(|run| run.agents.contains_key(agent_id) || run.steps.values().any(|s| matches!(s.executor.agent_id(), Some(a) if a == agent_id)))
            .unwrap_or(false)
    }

    /// Live session ID for a registered agent, for `GetSessionId` (§6).
    pub async fn get_session_id(&self, agent_id: &AgentId) -> Result<String, String> {
        let _guard = self.lock.lock().await;
        let run = self.store.get(&self.run_id).map_err(|e| e.to_string())?;
        run.agents
            .get(agent_id)
            .map(|r| r.session_id.clone())
            .ok_or_else(|| format!("agent {agent_id} is not registered on this run"))
    }

    /// The prompt currently assigned to an agent's running step, for
    /// `GetPrompt` (§9 open question, resolved): empty while the step is
    /// `completing`, otherwise the step's prompt for as long as it
    /// remains `running` (including `interactive` steps, which keep
    /// returning the same prompt until they leave `running`).
    pub async fn get_prompt(&self, agent_id: &AgentId) -> Result<String, String> {
        let _guard = self.lock.lock().await;
        let run = self.store.get(&self.run_id).map_err(|e| e.to_string())?;
        let Some(step) = run.steps.values().find(|s| {
            matches!(s.executor.agent_id(), Some(a) if a == agent_id)
                && matches!(s.status, StepStatus::Running | StepStatus::Completing)
        }) else {
            return Ok(String::new());
        };
        if step.status == StepStatus::Completing {
            return Ok(String::new());
        }
        match &step.executor {
            StepExecutor::Agent { prompt, .. } => Ok(prompt.clone()),
            _ => Ok(String::new()),
        }
    }

    /// Request that this run stop: transitions a non-terminal run into
    /// cleanup with `Stopped` as the resulting status, then runs the
    /// same staged cleanup crash recovery would. No-ops on a run that's
    /// already terminal or mid-cleanup rather than erroring, so a
    /// `cancel` racing the run's own completion is harmless.
    pub async fn stop(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        {
            let run = self.store.get(&self.run_id)?;
            if run.status.is_terminal() || run.status == RunStatus::CleaningUp {
                return Ok(());
            }
        }
        self.run_cleanup(RunStatus::Stopped).await?;
        self.wake();
        Ok(())
    }

    // ---- cleanup ---------------------------------------------------

    /// Staged, idempotent cleanup (§4.1.6): enter `cleaning_up` under
    /// the mutex, release it for the external cleanup work, then
    /// reacquire to record the terminal status. Safe to re-enter
    /// (crash recovery may call this again for a run it finds already
    /// in `cleaning_up`).
    pub async fn run_cleanup(self: &Arc<Self>, reason: RunStatus) -> Result<(), OrchestratorError> {
        {
            let _guard = self.lock.lock().await;
            let mut run = self.store.get(&self.run_id)?;
            if run.status != RunStatus::CleaningUp {
                run.begin_cleanup(reason);
                self.store.save(&run)?;
            }
        }

        // External cleanup work happens with the mutex released (§4.1.6,
        // §5): the cleanup script and `AgentManager.KillAll`.
        let run = self.store.get(&self.run_id)?;
        let policy_applies = run.cleanup.applies_to(run.prior_status.unwrap_or(reason));
        let mut cleanup_exit_code = None;
        if policy_applies {
            cleanup_exit_code = self.run_cleanup_command(&run).await;
            self.kill_all_agents(&run).await;
        }

        let _guard = self.lock.lock().await;
        let mut run = self.store.get(&self.run_id)?;
        let now_ms = self.clock.epoch_ms();
        if cleanup_exit_code.is_some() {
            run.cleanup_exit_code = cleanup_exit_code;
        }
        run.finish_cleanup(now_ms);
        self.store.save(&run)?;
        info!(run_id = %self.run_id, status = ?run.status, "run reached terminal status");
        Ok(())
    }

    /// Run the run's cleanup command, if one is configured, via the same
    /// `ShellRunner` shell steps use. Returns its exit code (§7: "the
    /// cleanup script's exit code" is one of the run's user-visible
    /// failure surfaces) so the caller can persist it; a missing command
    /// is not an error.
    async fn run_cleanup_command(&self, run: &Run) -> Option<i32> {
        let command = run.cleanup.command.as_ref()?;
        let outcome = self
            .shell
            .run(command, None, &HashMap::new(), None)
            .await;
        if !outcome.success() {
            warn!(
                run_id = %self.run_id,
                exit_code = ?outcome.exit_code,
                stderr = %outcome.stderr,
                "cleanup command exited non-zero"
            );
        }
        outcome.exit_code
    }

    async fn kill_all_agents(&self, run: &Run) {
        for agent_id in run.agents.keys() {
            if let Err(e) = self.agents.kill(agent_id).await {
                warn!(%agent_id, error = %e, "cleanup: failed to kill agent");
            }
        }
    }

    // ---- crash recovery ---------------------------------------------

    /// One-shot reconciliation at startup for this run (§4.1.5).
    pub async fn recover(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        let _guard = self.lock.lock().await;
        let mut run = self.store.get(&self.run_id)?;

        if run.status == RunStatus::CleaningUp {
            let reason = run.prior_status.unwrap_or(RunStatus::Done);
            drop(_guard);
            return self.run_cleanup(reason).await;
        }

        if run.status != RunStatus::Running {
            return Ok(());
        }

        let step_ids: Vec<StepId> = run.steps.keys().cloned().collect();
        let mut to_clear_children: Vec<StepId> = Vec::new();

        for step_id in &step_ids {
            let Some(step) = run.steps.get(step_id) else {
                continue;
            };
            if step.status != StepStatus::Running && step.status != StepStatus::Completing {
                continue;
            }
            match &step.executor {
                StepExecutor::Shell { .. } | StepExecutor::Branch { .. } | StepExecutor::Expand { .. } => {
                    if matches!(step.executor, StepExecutor::Expand { .. }) {
                        to_clear_children.push(step_id.clone());
                    }
                    let Some(step) = run.steps.get_mut(step_id) else {
                        continue;
                    };
                    step.status = StepStatus::Pending;
                    step.started_at = None;
                    step.interrupted_at = None;
                }
                StepExecutor::Agent { agent_id, .. } => {
                    let alive = self.agents.is_alive(agent_id).await;
                    let Some(step) = run.steps.get_mut(step_id) else {
                        continue;
                    };
                    if alive {
                        if step.status == StepStatus::Completing {
                            step.status = StepStatus::Running;
                        }
                    } else {
                        step.status = StepStatus::Pending;
                        step.started_at = None;
                        step.interrupted_at = None;
                    }
                }
                StepExecutor::Spawn { .. } | StepExecutor::Kill { .. } => {
                    let Some(step) = run.steps.get_mut(step_id) else {
                        continue;
                    };
                    step.status = StepStatus::Pending;
                    step.started_at = None;
                }
            }
        }

        // Branch steps also expand children synchronously in their
        // completion handler (not in dispatch), but their
        // `expanded_into` rollback is handled identically to expand:
        // any in-flight expand/branch rollback removes its children.
        for step_id in &step_ids {
            if let Some(step) = run.steps.get(step_id) {
                if matches!(step.executor, StepExecutor::Branch { .. })
                    && step.status == StepStatus::Pending
                    && !step.expanded_into.is_empty()
                {
                    to_clear_children.push(step_id.clone());
                }
            }
        }

        for parent_id in to_clear_children {
            let children = run
                .steps
                .get(&parent_id)
                .map(|s| s.expanded_into.clone())
                .unwrap_or_default();
            for child in &children {
                run.steps.shift_remove(child);
            }
            if let Some(step) = run.steps.get_mut(&parent_id) {
                step.expanded_into.clear();
            }
        }

        self.store.save(&run)?;
        Ok(())
    }
}

fn apply_shell_outcome(
    step: &mut Step,
    outcome: &ShellOutcome,
    on_error: meow_core::OnError,
    now_ms: u64,
) {
    step.outputs
        .insert("stdout".to_string(), serde_json::json!(outcome.stdout));
    step.outputs
        .insert("stderr".to_string(), serde_json::json!(outcome.stderr));
    if let Some(code) = outcome.exit_code {
        step.outputs
            .insert("exit_code".to_string(), serde_json::json!(code));
    }

    if outcome.timed_out {
        step.status = StepStatus::Failed;
        step.error = Some(StepError::timeout("shell command timed out"));
        return;
    }

    if outcome.success() {
        step.status = StepStatus::Done;
        step.done_at = Some(now_ms);
        return;
    }

    match on_error {
        meow_core::OnError::Fail => {
            step.status = StepStatus::Failed;
            step.error = Some(StepError::new(format!(
                "command exited with status {:?}",
                outcome.exit_code
            )));
        }
        meow_core::OnError::Continue => {
            step.status = StepStatus::Done;
            step.done_at = Some(now_ms);
            step.outputs.insert(
                "error".to_string(),
                serde_json::json!(format!("exit code {:?}", outcome.exit_code)),
            );
        }
    }
}

fn branch_outcome_str(outcome: meow_core::BranchOutcome) -> &'static str {
    match outcome {
        meow_core::BranchOutcome::True => "true",
        meow_core::BranchOutcome::False => "false",
        meow_core::BranchOutcome::Timeout => "timeout",
    }
}

/// Scope-walk resolver (§4.4): resolves `{{sibling.outputs.key}}`
/// placeholders against already-materialized ancestor/sibling steps.
/// `name` is expected in the form `<step-ref>.outputs.<key>`; anything
/// else is left unresolved.
fn resolve_scoped_output(run: &Run, from: &StepId, name: &str) -> Option<String> {
    let (step_ref, rest) = name.split_once(".outputs.")?;
    let step = run.resolve_scoped(from, step_ref)?;
    let value = step.outputs.get(rest)?;
    Some(match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// The dotted segment identifying which `foreach` iteration `step_id`
/// belongs to, given the expand step's own id `parent_id` (e.g.
/// `parent.3` for `parent.3.child.0`).
fn iteration_prefix(parent_id: &StepId, step_id: &StepId) -> Option<StepId> {
    let parent_str = parent_id.as_str();
    let step_str = step_id.as_str();
    let rest = step_str.strip_prefix(parent_str)?.strip_prefix('.')?;
    let (iter, _) = rest.split_once('.')?;
    Some(StepId::new(format!("{parent_str}.{iter}")))
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
