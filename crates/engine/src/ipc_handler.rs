// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Translates inbound [`IpcMessage`]s into calls against the
//! appropriate run's [`Orchestrator`], under that orchestrator's own
//! mutex (§4.3 of `spec.md`). Never mutates a `Run` directly — every
//! mutating message is delegated.
//!
//! Also filters *spurious* `agent-stopped` events: the Stop hook fires
//! naturally whenever a step finishes or acknowledges, and without
//! filtering that natural echo would otherwise be indistinguishable
//! from a genuine crash/kill signal. Two independent timestamp maps
//! bound the grace window: `recent_completions` (set by `step_done`)
//! and `step_acknowledgments` (set by `step_start`).

use crate::event_router::{EventEnvelope, EventRouter};
use crate::orchestrator::Orchestrator;
use meow_adapters::AgentManager;
use meow_adapters::ShellRunner;
use meow_core::{AgentId, Clock, IpcMessage, IpcResponse, RunId, StepId};
use meow_storage::RunStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Window after a `step_start` ack or a `step_done` completion during
/// which an `agent-stopped` event for that agent is treated as the
/// Stop-hook's natural echo and dropped rather than routed (§4.3, §7).
/// Modeled as a constant distinct from
/// [`crate::orchestrator::INTERRUPT_GRACE`] even though both are
/// currently 10s — `spec.md`'s open questions call these out as
/// independent tunables in some source variants.
pub const AGENT_STOPPED_GRACE: Duration = Duration::from_secs(10);

/// Looks up the [`Orchestrator`] that owns a given run, or the run that
/// currently has a given agent registered. Kept as a narrow trait so
/// the handler doesn't need to own a process-wide run registry itself
/// — the embedder (daemon lifecycle) decides how runs are tracked.
pub trait OrchestratorLookup<S, A, R, C>: Send + Sync
where
    S: RunStore + 'static,
    A: AgentManager + 'static,
    R: ShellRunner + 'static,
    C: Clock + 'static,
{
    fn by_run(&self, run_id: &RunId) -> Option<Arc<Orchestrator<S, A, R, C>>>;
    fn by_agent(&self, agent_id: &AgentId) -> Option<Arc<Orchestrator<S, A, R, C>>>;
}

/// An in-memory [`OrchestratorLookup`] keyed by run ID, with agent
/// lookup falling back to a linear scan. Adequate for a single daemon
/// process holding a handful of concurrently active runs; embedders
/// with different scaling needs can supply their own.
pub struct OrchestratorRegistry<S, A, R, C> {
    by_run: Mutex<HashMap<RunId, Arc<Orchestrator<S, A, R, C>>>>,
}

impl<S, A, R, C> OrchestratorRegistry<S, A, R, C>
where
    S: RunStore + 'static,
    A: AgentManager + 'static,
    R: ShellRunner + 'static,
    C: Clock + 'static,
{
    pub fn new() -> Self {
        Self {
            by_run: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, run_id: RunId, orch: Arc<Orchestrator<S, A, R, C>>) {
        self.by_run.lock().insert(run_id, orch);
    }

    pub fn remove(&self, run_id: &RunId) {
        self.by_run.lock().remove(run_id);
    }
}

impl<S, A, R, C> OrchestratorLookup<S, A, R, C> for OrchestratorRegistry<S, A, R, C>
where
    S: RunStore + 'static,
    A: AgentManager + 'static,
    R: ShellRunner + 'static,
    C: Clock + 'static,
{
    fn by_run(&self, run_id: &RunId) -> Option<Arc<Orchestrator<S, A, R, C>>> {
        self.by_run.lock().get(run_id).cloned()
    }

    fn by_agent(&self, agent_id: &AgentId) -> Option<Arc<Orchestrator<S, A, R, C>>> {
        self.by_run
            .lock()
            .values()
            .find(|orch| orch.has_agent(agent_id))
            .cloned()
    }
}

/// Translates IPC messages to orchestrator calls and filters spurious
/// signals. One handler serves every run in the process; the per-run
/// mutex discipline lives in [`Orchestrator`] itself.
pub struct IpcHandler<S, A, R, C> {
    registry: Arc<dyn OrchestratorLookup<S, A, R, C>>,
    events: Arc<EventRouter>,
    recent_completions: Mutex<HashMap<String, Instant>>,
    step_acknowledgments: Mutex<HashMap<String, Instant>>,
}

impl<S, A, R, C> IpcHandler<S, A, R, C>
where
    S: RunStore + 'static,
    A: AgentManager + 'static,
    R: ShellRunner + 'static,
    C: Clock + 'static,
{
    pub fn new(registry: Arc<dyn OrchestratorLookup<S, A, R, C>>, events: Arc<EventRouter>) -> Self {
        Self {
            registry,
            events,
            recent_completions: Mutex::new(HashMap::new()),
            step_acknowledgments: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound message. `now`/`now_ms` are threaded in
    /// (rather than read from the system clock) so tests can control
    /// grace-window timing precisely.
    pub async fn handle(&self, msg: IpcMessage, now: Instant, now_ms: u64) -> IpcResponse {
        match msg {
            IpcMessage::StepStart { agent, .. } => {
                self.step_acknowledgments.lock().insert(agent, now);
                IpcResponse::Ack
            }

            IpcMessage::StepDone {
                workflow,
                agent,
                step,
                outputs,
            } => {
                let Some(orch) = self.registry.by_run(&workflow) else {
                    return IpcResponse::Error {
                        message: format!("unknown run {workflow}"),
                    };
                };
                let agent_id = AgentId::new(agent.clone());
                let step_id = StepId::new(step);
                match orch.handle_step_done(&agent_id, &step_id, outputs).await {
                    Ok(()) => {
                        self.recent_completions.lock().insert(agent, now);
                        IpcResponse::Ack
                    }
                    Err(message) => IpcResponse::Error { message },
                }
            }

            IpcMessage::Event {
                event_type,
                workflow,
                agent,
                data,
            } => {
                if event_type == "agent-stopped" && self.is_expected_stop(&agent, now) {
                    return IpcResponse::Ack;
                }
                let envelope = EventEnvelope {
                    agent,
                    workflow: workflow.as_str().to_string(),
                    data,
                };
                self.events.route(&event_type, &envelope, now, now_ms);
                IpcResponse::Ack
            }

            IpcMessage::AwaitEvent {
                event_type,
                filter,
                timeout_ms,
            } => {
                let rx = self
                    .events
                    .register(event_type, filter, Duration::from_millis(timeout_ms), now);
                match rx.await {
                    Ok(event) => IpcResponse::EventMatch {
                        event_type: event.event_type,
                        data: event.data,
                        timestamp_ms: event.timestamp_ms,
                    },
                    Err(_) => IpcResponse::Error {
                        message: "timeout".to_string(),
                    },
                }
            }

            IpcMessage::GetStepStatus { workflow, step_id } => {
                let Some(orch) = self.registry.by_run(&workflow) else {
                    return IpcResponse::Error {
                        message: format!("unknown run {workflow}"),
                    };
                };
                let step_id = StepId::new(step_id);
                match orch.get_step_status(&step_id).await {
                    Ok(status) => IpcResponse::StepStatus {
                        step_id: step_id.as_str().to_string(),
                        status,
                    },
                    Err(message) => IpcResponse::Error { message },
                }
            }

            IpcMessage::GetSessionId { agent } => {
                let agent_id = AgentId::new(agent);
                let Some(orch) = self.registry.by_agent(&agent_id) else {
                    return IpcResponse::Error {
                        message: format!("agent {agent_id} is not registered on any run"),
                    };
                };
                match orch.get_session_id(&agent_id).await {
                    Ok(session_id) => IpcResponse::SessionId { session_id },
                    Err(message) => IpcResponse::Error { message },
                }
            }

            IpcMessage::GetPrompt { agent } => {
                let agent_id = AgentId::new(agent);
                let Some(orch) = self.registry.by_agent(&agent_id) else {
                    return IpcResponse::Prompt {
                        prompt: String::new(),
                    };
                };
                match orch.get_prompt(&agent_id).await {
                    Ok(prompt) => IpcResponse::Prompt { prompt },
                    Err(_) => IpcResponse::Prompt {
                        prompt: String::new(),
                    },
                }
            }
        }
    }

    /// True if `agent-stopped` arrived within [`AGENT_STOPPED_GRACE`] of
    /// either a recorded `step_start` ack or `step_done` completion for
    /// this agent — the natural Stop-hook echo, not a genuine crash.
    fn is_expected_stop(&self, agent: &str, now: Instant) -> bool {
        let within = |ts: &Instant| now.saturating_duration_since(*ts) <= AGENT_STOPPED_GRACE;
        self.recent_completions
            .lock()
            .get(agent)
            .is_some_and(within)
            || self
                .step_acknowledgments
                .lock()
                .get(agent)
                .is_some_and(within)
    }

    /// Drop `recent_completions`/`step_acknowledgments` entries older
    /// than [`AGENT_STOPPED_GRACE`] (§5: both maps are "concurrent,
    /// lazily cleaned by timers"). Meant to be driven by the same
    /// background sweeper that drives [`EventRouter::sweep_expired`];
    /// cheap and idempotent to call opportunistically otherwise.
    pub fn prune_expired(&self, now: Instant) {
        let expired = |ts: &Instant| now.saturating_duration_since(*ts) > AGENT_STOPPED_GRACE;
        self.recent_completions.lock().retain(|_, ts| !expired(ts));
        self.step_acknowledgments
            .lock()
            .retain(|_, ts| !expired(ts));
    }
}

#[cfg(test)]
#[path = "ipc_handler_tests.rs"]
mod tests;
