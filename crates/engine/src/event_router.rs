// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory multi-producer / multi-consumer event-matching registry
//! (§4.2 of `spec.md`).
//!
//! A waiter registers `(event_type, filter, timeout)` and gets back a
//! one-shot receiver. An arriving event visits waiters for its type in
//! registration order; the first whose filter matches every present key
//! takes it and is removed. On timeout the waiter's sender is dropped,
//! closing the channel to signal expiry without a value.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// An event delivered to a matched waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub event_type: String,
    pub data: HashMap<String, serde_json::Value>,
    pub timestamp_ms: u64,
}

/// The envelope fields of an arriving event: `agent` and `workflow` are
/// drawn from the IPC envelope rather than the event's `data` map, so a
/// waiter filter of `{"agent": "a1"}` matches against this field, not
/// `data["agent"]`.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub agent: String,
    pub workflow: String,
    pub data: HashMap<String, serde_json::Value>,
}

struct Waiter {
    filter: HashMap<String, String>,
    tx: Option<oneshot::Sender<RoutedEvent>>,
    expires_at: Instant,
}

#[derive(Default)]
struct Registry {
    waiters: HashMap<String, Vec<Waiter>>,
}

/// The event router. Cheap to clone (internally `Arc`-free; wrap in
/// `Arc` at the embedding site as other shared engine components do).
#[derive(Default)]
pub struct EventRouter {
    inner: Mutex<Registry>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot waiter. Returns a receiver that resolves with
    /// the matched event, or closes (without a value) after `timeout`.
    pub fn register(
        &self,
        event_type: impl Into<String>,
        filter: HashMap<String, String>,
        timeout: Duration,
        now: Instant,
    ) -> oneshot::Receiver<RoutedEvent> {
        let (tx, rx) = oneshot::channel();
        let event_type = event_type.into();
        self.inner
            .lock()
            .waiters
            .entry(event_type)
            .or_default()
            .push(Waiter {
                filter,
                tx: Some(tx),
                expires_at: now + timeout,
            });
        rx
    }

    /// Route an arriving event to the first matching, unexpired waiter
    /// for its type. Returns whether a waiter took it.
    pub fn route(&self, event_type: &str, envelope: &EventEnvelope, now: Instant, now_ms: u64) -> bool {
        let mut inner = self.inner.lock();
        let Some(list) = inner.waiters.get_mut(event_type) else {
            return false;
        };
        let mut taken = false;
        let mut match_idx = None;
        for (i, w) in list.iter().enumerate() {
            if w.expires_at <= now {
                continue;
            }
            if filter_matches(&w.filter, envelope) {
                match_idx = Some(i);
                break;
            }
        }
        if let Some(i) = match_idx {
            let mut w = list.remove(i);
            if let Some(tx) = w.tx.take() {
                let _ = tx.send(RoutedEvent {
                    event_type: event_type.to_string(),
                    data: envelope.data.clone(),
                    timestamp_ms: now_ms,
                });
                taken = true;
            }
        }
        taken
    }

    /// Remove waiters whose timeout has elapsed, dropping their sender
    /// so the receiver observes channel closure. Intended to be driven
    /// by a background sweeper at a fixed interval; also safe to call
    /// opportunistically (e.g. before `route`).
    pub fn sweep_expired(&self, now: Instant) {
        let mut inner = self.inner.lock();
        for list in inner.waiters.values_mut() {
            list.retain(|w| w.expires_at > now);
        }
        inner.waiters.retain(|_, list| !list.is_empty());
    }

    #[cfg(test)]
    fn waiter_count(&self, event_type: &str) -> usize {
        self.inner
            .lock()
            .waiters
            .get(event_type)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

fn filter_matches(filter: &HashMap<String, String>, envelope: &EventEnvelope) -> bool {
    filter.iter().all(|(k, v)| match k.as_str() {
        "agent" => &envelope.agent == v,
        "workflow" => &envelope.workflow == v,
        _ => envelope
            .data
            .get(k)
            .is_some_and(|value| value_matches_str(value, v)),
    })
}

fn value_matches_str(value: &serde_json::Value, expected: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}

#[cfg(test)]
#[path = "event_router_tests.rs"]
mod tests;
