// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Subscriptions
//!
//! A [`SubscriptionPattern`] decides whether an event is relevant to an agent.
//!
//! ## Matching rule
//!
//! | Field | Event attribute | Matches when |
//! |-------|-----------------|--------------|
//! | `event_kinds` | [`EventPayload::kind`] | kind is a member |
//! | `from_agents` | [`EventPayload::source_agent`] | source is a member |
//! | `to_agent` | [`EventPayload::target_agent`] | target is equal |
//! | `path_glob` | [`EventPayload::path`] | path matches the glob |
//! | `tags` | [`EventPayload::tags`] | at least one tag is shared |
//!
//! Set fields are AND-ed together; an unset field (or an empty set) matches
//! anything. An event that lacks the attribute a set field inspects does not
//! match.

use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::events::{Event, EventKind, EventPayload};

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Invalid path glob '{glob}': {reason}")]
    InvalidGlob { glob: String, reason: String },

    #[error("Subscription not found: {0}")]
    NotFound(SubscriptionId),

    #[error("Agent {0} is not active")]
    InactiveAgent(AgentId),

    #[error("Repository error: {0}")]
    Repository(#[from] crate::domain::repository::RepositoryError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_kinds: Option<BTreeSet<EventKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_agents: Option<BTreeSet<AgentId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_agent: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_glob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
}

impl SubscriptionPattern {
    /// Default pattern: messages addressed to `agent_id`.
    pub fn direct_message(agent_id: &AgentId) -> Self {
        Self {
            to_agent: Some(agent_id.clone()),
            ..Self::default()
        }
    }

    /// Default pattern: content changes of exactly `file_path`.
    pub fn file_changed(file_path: &str) -> Self {
        Self {
            event_kinds: Some(BTreeSet::from([EventKind::ContentChanged])),
            path_glob: Some(Pattern::escape(&normalize_path(file_path))),
            ..Self::default()
        }
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.event_kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Compile the glob once; fails if the pattern is malformed.
    pub fn compile(&self) -> Result<Option<Pattern>, SubscriptionError> {
        self.path_glob
            .as_deref()
            .map(|glob| {
                Pattern::new(glob).map_err(|e| SubscriptionError::InvalidGlob {
                    glob: glob.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self.compile() {
            Ok(glob) => self.matches_compiled(&event.payload, glob.as_ref()),
            Err(_) => false,
        }
    }

    /// Matching with a pre-compiled glob (the router's hot path).
    pub fn matches_compiled(&self, payload: &EventPayload, glob: Option<&Pattern>) -> bool {
        if let Some(kinds) = non_empty(&self.event_kinds) {
            if !kinds.contains(&payload.kind()) {
                return false;
            }
        }

        if let Some(from) = non_empty(&self.from_agents) {
            match payload.source_agent() {
                Some(source) if from.contains(source) => {}
                _ => return false,
            }
        }

        if let Some(to) = &self.to_agent {
            if payload.target_agent() != Some(to) {
                return false;
            }
        }

        if self.path_glob.is_some() {
            let Some(glob) = glob else { return false };
            match payload.path() {
                Some(path) if glob.matches_with(&normalize_path(path), GLOB_OPTIONS) => {}
                _ => return false,
            }
        }

        if let Some(wanted) = non_empty(&self.tags) {
            match payload.tags() {
                Some(tags) if !wanted.is_disjoint(tags) => {}
                _ => return false,
            }
        }

        true
    }
}

fn non_empty<T>(set: &Option<BTreeSet<T>>) -> Option<&BTreeSet<T>> {
    set.as_ref().filter(|s| !s.is_empty())
}

fn normalize_path(path: &str) -> String {
    path.strip_prefix("./").unwrap_or(path).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionOrigin {
    /// Installed by the reconciler when the agent was created.
    Default,
    /// Registered by the agent's own turn.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: SubscriptionId,
    pub agent_id: AgentId,
    pub pattern: SubscriptionPattern,
    pub origin: SubscriptionOrigin,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(agent_id: AgentId, pattern: SubscriptionPattern, origin: SubscriptionOrigin) -> Self {
        Self {
            subscription_id: SubscriptionId::new(),
            agent_id,
            pattern,
            origin,
            created_at: Utc::now(),
        }
    }
}

/// Agents whose subscriptions match `event`. Pure: depends only on its inputs.
pub fn matching_agents<'a>(
    subscriptions: impl IntoIterator<Item = &'a Subscription>,
    event: &Event,
) -> BTreeSet<AgentId> {
    subscriptions
        .into_iter()
        .filter(|s| s.pattern.matches(event))
        .map(|s| s.agent_id.clone())
        .collect()
}
