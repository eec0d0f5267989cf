// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregates
//!
//! An agent is a persistent worker bound to exactly one discovered source node.
//! Two records describe it:
//!
//! - [`AgentMetadata`]: the Swarm Registry entry (identity + `active`/`orphaned` status).
//! - [`AgentState`]: the runtime aggregate loaded before and saved after every turn.
//!
//! [`AgentId`] is a content hash of the node's location, so rediscovering an
//! unchanged node always yields the same agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::discovery::CstNode;
use crate::domain::events::EventId;
use crate::domain::subscription::SubscriptionId;

/// Deterministic agent identifier (hex-encoded, 128-bit prefix of a SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Hash of `(file_path, node_type, name, range)`.
    pub fn for_node(file_path: &str, node_type: &str, name: &str, range: &SourceRange) -> Self {
        let mut hasher = Sha256::new();
        for part in [file_path, node_type, name] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(range.start_line.to_be_bytes());
        hasher.update(range.end_line.to_be_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character directory shard used by the on-disk state layout.
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }

    /// True when the id can be used as a single path component.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Line span of a node inside its source file (1-based, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub start_line: u32,
    pub end_line: u32,
}

impl SourceRange {
    pub fn new(start_line: u32, end_line: u32) -> Self {
        Self { start_line, end_line }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Orphaned,
}

/// Swarm Registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub agent_id: AgentId,
    pub node_type: String,
    pub name: String,
    pub full_name: String,
    pub file_path: String,
    pub parent_id: Option<AgentId>,
    pub range: SourceRange,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
}

impl AgentMetadata {
    pub fn from_node(node: &CstNode, parent_id: Option<AgentId>) -> Self {
        Self {
            agent_id: node.agent_id(),
            node_type: node.node_type.clone(),
            name: node.name.clone(),
            full_name: node.full_name.clone(),
            file_path: node.file_path.clone(),
            parent_id,
            range: node.range,
            status: AgentStatus::Active,
            registered_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// Result of a single turn as recorded in the agent's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Succeeded,
    Failed { reason: String },
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TurnOutcome::Succeeded)
    }
}

/// One entry of the bounded chat history: the input an agent was given and
/// what it answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub trigger_event_id: EventId,
    pub prompt: String,
    pub response: String,
    pub tool_calls: usize,
    pub outcome: TurnOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Runtime state of an agent.
///
/// Persisted as an append-only log whose last record is authoritative. Never
/// shared across turns: each turn loads its own copy, mutates it, and appends
/// the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,
    pub node_type: String,
    pub name: String,
    pub full_name: String,
    pub file_path: String,
    pub parent_id: Option<AgentId>,
    pub range: SourceRange,
    /// Named relationships to other agents (e.g. `parent`).
    #[serde(default)]
    pub connections: BTreeMap<String, AgentId>,
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
    #[serde(default)]
    pub custom_subscriptions: Vec<SubscriptionId>,
    #[serde(default)]
    pub last_outcome: Option<TurnOutcome>,
    #[serde(default)]
    pub turn_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl AgentState {
    pub fn from_metadata(metadata: &AgentMetadata) -> Self {
        let mut connections = BTreeMap::new();
        if let Some(parent) = &metadata.parent_id {
            connections.insert("parent".to_string(), parent.clone());
        }

        Self {
            agent_id: metadata.agent_id.clone(),
            node_type: metadata.node_type.clone(),
            name: metadata.name.clone(),
            full_name: metadata.full_name.clone(),
            file_path: metadata.file_path.clone(),
            parent_id: metadata.parent_id.clone(),
            range: metadata.range,
            connections,
            chat_history: Vec::new(),
            custom_subscriptions: Vec::new(),
            last_outcome: None,
            turn_count: 0,
            last_updated: Utc::now(),
        }
    }

    /// Append a turn, dropping the oldest entries beyond `limit`.
    pub fn record_turn(&mut self, turn: ChatTurn, limit: usize) {
        self.last_outcome = Some(turn.outcome.clone());
        self.chat_history.push(turn);
        if self.chat_history.len() > limit {
            let excess = self.chat_history.len() - limit;
            self.chat_history.drain(..excess);
        }
        self.turn_count += 1;
        self.last_updated = Utc::now();
    }

    /// The most recent `k` turns, oldest first.
    pub fn recent_turns(&self, k: usize) -> &[ChatTurn] {
        let start = self.chat_history.len().saturating_sub(k);
        &self.chat_history[start..]
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}
