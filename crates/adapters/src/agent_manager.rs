// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A narrow view of [`crate::agent::AgentAdapter`] shaped to exactly
//! what the orchestrator needs (§4.1 of `spec.md`): spawn/stop agent
//! sessions, inject prompts, and probe whether a session is still
//! alive. Kept separate from `AgentAdapter` itself so the orchestrator
//! doesn't depend on workspace-preparation or session-log-parsing
//! concerns that belong to the adapter layer.

use crate::agent::{AgentAdapter, AgentError, AgentHandle, AgentSpawnConfig};
use async_trait::async_trait;
use meow_core::{AgentId, AgentState, Event};
use std::marker::PhantomData;
use tokio::sync::mpsc;

/// Control sequence sent to request an agent interrupt the step it is
/// currently working, used by the two-phase timeout protocol (§4.1.1).
/// Matches the byte a terminal sends for Ctrl-C.
pub const INTERRUPT_SEQUENCE: &str = "\u{3}";

#[async_trait]
pub trait AgentManager: Send + Sync + 'static {
    async fn spawn(
        &self,
        config: AgentSpawnConfig,
        event_tx: mpsc::Sender<Event>,
    ) -> Result<AgentHandle, AgentError>;

    async fn inject_prompt(&self, agent_id: &AgentId, prompt: &str) -> Result<(), AgentError>;

    async fn interrupt(&self, agent_id: &AgentId) -> Result<(), AgentError>;

    async fn kill(&self, agent_id: &AgentId) -> Result<(), AgentError>;

    /// Whether the agent's underlying session is still alive. Probed on
    /// dispatch failure (§4.1.2) and during crash recovery (§4.1.5) to
    /// decide between a transient retry and a hard failure.
    async fn is_alive(&self, agent_id: &AgentId) -> bool;
}

/// Blanket [`AgentManager`] for any [`AgentAdapter`].
pub struct AdapterAgentManager<A: AgentAdapter> {
    inner: A,
    _marker: PhantomData<A>,
}

impl<A: AgentAdapter> AdapterAgentManager<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<A: AgentAdapter> AgentManager for AdapterAgentManager<A> {
    async fn spawn(
        &self,
        config: AgentSpawnConfig,
        event_tx: mpsc::Sender<Event>,
    ) -> Result<AgentHandle, AgentError> {
        self.inner.spawn(config, event_tx).await
    }

    async fn inject_prompt(&self, agent_id: &AgentId, prompt: &str) -> Result<(), AgentError> {
        self.inner.send(agent_id, prompt).await
    }

    async fn interrupt(&self, agent_id: &AgentId) -> Result<(), AgentError> {
        self.inner.send(agent_id, INTERRUPT_SEQUENCE).await
    }

    async fn kill(&self, agent_id: &AgentId) -> Result<(), AgentError> {
        self.inner.kill(agent_id).await
    }

    async fn is_alive(&self, agent_id: &AgentId) -> bool {
        match self.inner.get_state(agent_id).await {
            Ok(AgentState::SessionGone) | Ok(AgentState::Exited { .. }) => false,
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    pub enum ManagerCall {
        Spawn(AgentId),
        InjectPrompt(AgentId, String),
        Interrupt(AgentId),
        Kill(AgentId),
        IsAlive(AgentId),
    }

    /// In-memory [`AgentManager`] for orchestrator tests: every agent is
    /// "alive" unless explicitly marked dead, prompt injection always
    /// succeeds unless scripted to fail.
    #[derive(Clone, Default)]
    pub struct FakeAgentManager {
        inner: Arc<Mutex<FakeState>>,
    }

    #[derive(Default)]
    struct FakeState {
        calls: Vec<ManagerCall>,
        dead: HashMap<AgentId, bool>,
        inject_should_fail: HashMap<AgentId, bool>,
    }

    impl FakeAgentManager {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn mark_dead(&self, agent_id: &AgentId) {
            self.inner.lock().dead.insert(agent_id.clone(), true);
        }

        pub fn fail_injection(&self, agent_id: &AgentId) {
            self.inner
                .lock()
                .inject_should_fail
                .insert(agent_id.clone(), true);
        }

        pub fn calls(&self) -> Vec<ManagerCall> {
            self.inner.lock().calls.clone()
        }
    }

    #[async_trait]
    impl AgentManager for FakeAgentManager {
        async fn spawn(
            &self,
            config: AgentSpawnConfig,
            _event_tx: mpsc::Sender<Event>,
        ) -> Result<AgentHandle, AgentError> {
            self.inner
                .lock()
                .calls
                .push(ManagerCall::Spawn(config.agent_id.clone()));
            Ok(AgentHandle::new(
                config.agent_id,
                "fake-session".into(),
                config.workspace_path,
            ))
        }

        async fn inject_prompt(&self, agent_id: &AgentId, prompt: &str) -> Result<(), AgentError> {
            let mut state = self.inner.lock();
            state
                .calls
                .push(ManagerCall::InjectPrompt(agent_id.clone(), prompt.to_string()));
            if *state.inject_should_fail.get(agent_id).unwrap_or(&false) {
                return Err(AgentError::SendFailed("scripted failure".into()));
            }
            Ok(())
        }

        async fn interrupt(&self, agent_id: &AgentId) -> Result<(), AgentError> {
            self.inner
                .lock()
                .calls
                .push(ManagerCall::Interrupt(agent_id.clone()));
            Ok(())
        }

        async fn kill(&self, agent_id: &AgentId) -> Result<(), AgentError> {
            self.inner
                .lock()
                .calls
                .push(ManagerCall::Kill(agent_id.clone()));
            Ok(())
        }

        async fn is_alive(&self, agent_id: &AgentId) -> bool {
            let mut state = self.inner.lock();
            state.calls.push(ManagerCall::IsAlive(agent_id.clone()));
            !*state.dead.get(agent_id).unwrap_or(&false)
        }
    }
}
