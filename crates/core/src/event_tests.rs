// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::agent::AgentError;

#[test]
fn event_agent_working_roundtrip() {
    let event = Event::AgentWorking {
        agent_id: AgentId::new("a1"),
    };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "agent:working");
    assert_eq!(json["agent_id"], "a1");

    let json_str = serde_json::to_string(&event).unwrap();
    let parsed: Event = serde_json::from_str(&json_str).unwrap();
    assert_eq!(event, parsed);
}

#[test]
fn event_agent_failed_roundtrip() {
    let event = Event::AgentFailed {
        agent_id: AgentId::new("a2"),
        error: AgentError::RateLimited,
    };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "agent:failed");
    assert_eq!(json["agent_id"], "a2");

    let json_str = serde_json::to_string(&event).unwrap();
    let parsed: Event = serde_json::from_str(&json_str).unwrap();
    assert_eq!(event, parsed);
}

#[test]
fn event_agent_exited_roundtrip() {
    let event = Event::AgentExited {
        agent_id: AgentId::new("a3"),
        exit_code: Some(42),
    };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "agent:exited");
    assert_eq!(json["exit_code"], 42);

    let json_str = serde_json::to_string(&event).unwrap();
    let parsed: Event = serde_json::from_str(&json_str).unwrap();
    assert_eq!(event, parsed);
}

#[test]
fn event_agent_exited_no_code_roundtrip() {
    let event = Event::AgentExited {
        agent_id: AgentId::new("a4"),
        exit_code: None,
    };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "agent:exited");
    assert!(json["exit_code"].is_null());

    let json_str = serde_json::to_string(&event).unwrap();
    let parsed: Event = serde_json::from_str(&json_str).unwrap();
    assert_eq!(event, parsed);
}

#[test]
fn event_agent_gone_roundtrip() {
    let event = Event::AgentGone {
        agent_id: AgentId::new("a5"),
    };
    let json_str = serde_json::to_string(&event).unwrap();
    let parsed: Event = serde_json::from_str(&json_str).unwrap();
    assert_eq!(event, parsed);
    let json: serde_json::Value = serde_json::from_str(&json_str).unwrap();
    assert_eq!(json["type"], "agent:gone");
}

#[test]
fn event_agent_idle_roundtrip() {
    let event = Event::AgentIdle {
        agent_id: AgentId::new("a6"),
    };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "agent:idle");
    assert_eq!(json["agent_id"], "a6");

    let json_str = serde_json::to_string(&event).unwrap();
    let parsed: Event = serde_json::from_str(&json_str).unwrap();
    assert_eq!(event, parsed);
}

#[test]
fn event_unknown_type_becomes_custom() {
    let json = r#"{"type":"unknown:event","foo":"bar"}"#;
    let parsed: Event = serde_json::from_str(json).unwrap();
    assert_eq!(parsed, Event::Custom);
}

#[test]
fn event_from_agent_state_maps_each_variant() {
    let agent_id = AgentId::new("test");

    assert!(matches!(
        Event::from_agent_state(agent_id.clone(), AgentState::Working),
        Event::AgentWorking { .. }
    ));
    assert!(matches!(
        Event::from_agent_state(agent_id.clone(), AgentState::WaitingForInput),
        Event::AgentWaiting { .. }
    ));
    assert!(matches!(
        Event::from_agent_state(agent_id.clone(), AgentState::SessionGone),
        Event::AgentGone { .. }
    ));
    assert!(matches!(
        Event::from_agent_state(agent_id.clone(), AgentState::Exited { exit_code: Some(1) }),
        Event::AgentExited { exit_code: Some(1), .. }
    ));
    assert!(matches!(
        Event::from_agent_state(agent_id, AgentState::Failed(AgentError::RateLimited)),
        Event::AgentFailed { .. }
    ));
}

#[test]
fn event_as_agent_state_round_trips_through_from_agent_state() {
    let agent_id = AgentId::new("test");
    let event = Event::from_agent_state(agent_id.clone(), AgentState::Working);

    let (id, state) = event.as_agent_state().unwrap();
    assert_eq!(id, &agent_id);
    assert!(matches!(state, AgentState::Working));
}

#[test]
fn event_as_agent_state_none_for_idle_and_custom() {
    let event = Event::AgentIdle {
        agent_id: AgentId::new("a1"),
    };
    assert!(event.as_agent_state().is_none());
    assert!(Event::Custom.as_agent_state().is_none());
}

#[test]
fn event_name_matches_wire_tag() {
    assert_eq!(
        Event::AgentWorking { agent_id: AgentId::new("a") }.name(),
        "agent:working"
    );
    assert_eq!(
        Event::AgentIdle { agent_id: AgentId::new("a") }.name(),
        "agent:idle"
    );
    assert_eq!(Event::Custom.name(), "custom");
}

#[test]
fn event_log_summary_includes_agent_id() {
    let event = Event::AgentGone {
        agent_id: AgentId::new("a1"),
    };
    assert_eq!(event.log_summary(), "agent:gone agent=a1");
}
