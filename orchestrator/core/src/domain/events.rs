// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Events
//!
//! Immutable facts appended to the Event Log. Every event carries the causal
//! pair `(correlation_id, depth)`: a root event has `depth = 0` and a
//! `correlation_id` equal to its own `event_id`; an event produced by a turn
//! inherits the trigger event's `correlation_id` and sits one hop deeper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwarmId(String);

impl SwarmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one causal chain (cascade).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl From<EventId> for CorrelationId {
    fn from(id: EventId) -> Self {
        Self(id.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Discriminant of [`EventPayload`], used by subscription patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ContentChanged,
    AgentMessage,
    HumanInputRequest,
    HumanInputResponse,
    AgentStart,
    AgentComplete,
    AgentError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ContentChanged => "content_changed",
            EventKind::AgentMessage => "agent_message",
            EventKind::HumanInputRequest => "human_input_request",
            EventKind::HumanInputResponse => "human_input_response",
            EventKind::AgentStart => "agent_start",
            EventKind::AgentComplete => "agent_complete",
            EventKind::AgentError => "agent_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    ContentChanged {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
    },
    AgentMessage {
        from_agent: AgentId,
        to_agent: AgentId,
        content: String,
        #[serde(default)]
        tags: BTreeSet<String>,
    },
    HumanInputRequest {
        agent_id: AgentId,
        request_id: Uuid,
        question: String,
        #[serde(default)]
        options: Vec<String>,
    },
    HumanInputResponse {
        agent_id: AgentId,
        request_id: Uuid,
        response: String,
    },
    AgentStart {
        agent_id: AgentId,
        trigger_event_id: EventId,
    },
    AgentComplete {
        agent_id: AgentId,
        trigger_event_id: EventId,
        summary: String,
    },
    AgentError {
        agent_id: AgentId,
        trigger_event_id: EventId,
        error: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ContentChanged { .. } => EventKind::ContentChanged,
            EventPayload::AgentMessage { .. } => EventKind::AgentMessage,
            EventPayload::HumanInputRequest { .. } => EventKind::HumanInputRequest,
            EventPayload::HumanInputResponse { .. } => EventKind::HumanInputResponse,
            EventPayload::AgentStart { .. } => EventKind::AgentStart,
            EventPayload::AgentComplete { .. } => EventKind::AgentComplete,
            EventPayload::AgentError { .. } => EventKind::AgentError,
        }
    }

    /// Agent that produced the event, matched against `from_agents`.
    pub fn source_agent(&self) -> Option<&AgentId> {
        match self {
            EventPayload::AgentMessage { from_agent, .. } => Some(from_agent),
            EventPayload::HumanInputRequest { agent_id, .. }
            | EventPayload::AgentStart { agent_id, .. }
            | EventPayload::AgentComplete { agent_id, .. }
            | EventPayload::AgentError { agent_id, .. } => Some(agent_id),
            EventPayload::ContentChanged { .. } | EventPayload::HumanInputResponse { .. } => None,
        }
    }

    /// Agent the event is addressed to, matched against `to_agent`.
    pub fn target_agent(&self) -> Option<&AgentId> {
        match self {
            EventPayload::AgentMessage { to_agent, .. } => Some(to_agent),
            EventPayload::HumanInputResponse { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            EventPayload::ContentChanged { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn tags(&self) -> Option<&BTreeSet<String>> {
        match self {
            EventPayload::AgentMessage { tags, .. } => Some(tags),
            _ => None,
        }
    }
}

/// Position of an event in its causal chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalContext {
    pub correlation_id: CorrelationId,
    pub depth: u32,
}

impl CausalContext {
    /// Context for events produced while handling `event`.
    pub fn child_of(event: &Event) -> Self {
        Self {
            correlation_id: event.correlation_id,
            depth: event.depth.saturating_add(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub swarm_id: SwarmId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    /// Hop count along the causal chain; triggers derived from this event carry it.
    #[serde(default)]
    pub depth: u32,
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn is_root(&self) -> bool {
        self.correlation_id == CorrelationId::from(self.event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EventPayload {
        EventPayload::AgentMessage {
            from_agent: AgentId::new("a"),
            to_agent: AgentId::new("b"),
            content: "hi".to_string(),
            tags: BTreeSet::from(["review".to_string()]),
        }
    }

    #[test]
    fn test_payload_accessors() {
        let payload = message();
        assert_eq!(payload.kind(), EventKind::AgentMessage);
        assert_eq!(payload.source_agent(), Some(&AgentId::new("a")));
        assert_eq!(payload.target_agent(), Some(&AgentId::new("b")));
        assert_eq!(payload.path(), None);
        assert!(payload.tags().is_some_and(|t| t.contains("review")));

        let changed = EventPayload::ContentChanged { path: "a.py".to_string(), diff: None };
        assert_eq!(changed.path(), Some("a.py"));
        assert_eq!(changed.source_agent(), None);
        assert_eq!(changed.target_agent(), None);
    }

    #[test]
    fn test_payload_serializes_with_kind_tag() {
        let json = serde_json::to_value(message()).unwrap();
        assert_eq!(json["kind"], "agent_message");
        assert_eq!(json["to_agent"], "b");

        let parsed: EventPayload = serde_json::from_value(serde_json::json!({
            "kind": "content_changed",
            "path": "src/lib.rs"
        }))
        .unwrap();
        assert_eq!(parsed, EventPayload::ContentChanged { path: "src/lib.rs".to_string(), diff: None });
    }

    #[test]
    fn test_child_context_increments_depth() {
        let event_id = EventId::new();
        let event = Event {
            event_id,
            swarm_id: SwarmId::new("test"),
            sequence: 1,
            timestamp: Utc::now(),
            correlation_id: event_id.into(),
            depth: 0,
            payload: message(),
        };
        assert!(event.is_root());

        let child = CausalContext::child_of(&event);
        assert_eq!(child.depth, 1);
        assert_eq!(child.correlation_id, event.correlation_id);
    }

    #[test]
    fn test_kind_names_match_serde() {
        for kind in [EventKind::ContentChanged, EventKind::AgentError, EventKind::HumanInputResponse] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }
}
