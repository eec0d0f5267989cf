// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts, one per aggregate, defined in the domain layer and
//! implemented in `crate::infrastructure`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `EventStore` | `Event` | `InMemoryEventStore`, `JsonlEventStore` (`events.log`) |
//! | `SubscriptionRepository` | `Subscription` | `InMemorySubscriptionRepository`, `FileSubscriptionRepository` (`subscriptions.store`) |
//! | `SwarmRegistry` | `AgentMetadata` | `InMemorySwarmRegistry`, `FileSwarmRegistry` (`swarm.registry`) |
//! | `AgentStateRepository` | `AgentState` | `InMemoryAgentStateRepository`, `FileAgentStateRepository` (`agents/<shard>/<id>/state.log`) |
//! | `CheckpointStore` | dispatch checkpoint | `InMemoryCheckpointStore`, `FileCheckpointStore` (`dispatch.checkpoint`) |
//!
//! Every write either completes durably or returns an error; callers treat a
//! failed write to the event store as fatal.

use async_trait::async_trait;

use crate::domain::agent::{AgentId, AgentMetadata, AgentState, AgentStatus};
use crate::domain::events::{CorrelationId, Event};
use crate::domain::subscription::{Subscription, SubscriptionId};

/// Append-only, sequence-ordered event storage.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Durably persist `event`. Sequence assignment is the caller's job.
    async fn append(&self, event: &Event) -> Result<(), RepositoryError>;

    /// Events with `sequence > after_sequence`, ascending, optionally capped.
    async fn read_from(&self, after_sequence: u64, limit: Option<usize>) -> Result<Vec<Event>, RepositoryError>;

    /// All events of one causal chain, ascending.
    async fn find_by_correlation(&self, correlation_id: CorrelationId) -> Result<Vec<Event>, RepositoryError>;

    /// Highest persisted sequence (0 when empty).
    async fn last_sequence(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn save(&self, subscription: &Subscription) -> Result<(), RepositoryError>;

    /// Returns whether a subscription was removed.
    async fn delete(&self, id: SubscriptionId) -> Result<bool, RepositoryError>;

    /// Remove every subscription owned by `agent_id`, returning the removed ids.
    async fn delete_by_agent(&self, agent_id: &AgentId) -> Result<Vec<SubscriptionId>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Subscription>, RepositoryError>;
}

/// Authoritative set of known agents.
#[async_trait]
pub trait SwarmRegistry: Send + Sync {
    /// Insert or replace.
    async fn save(&self, metadata: &AgentMetadata) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentMetadata>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<AgentMetadata>, RepositoryError>;

    async fn list_active(&self) -> Result<Vec<AgentMetadata>, RepositoryError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|m| m.status == AgentStatus::Active)
            .collect())
    }

    /// Returns `false` when the agent is unknown.
    async fn set_status(&self, id: &AgentId, status: AgentStatus) -> Result<bool, RepositoryError>;
}

/// Event-sourced per-agent runtime state.
#[async_trait]
pub trait AgentStateRepository: Send + Sync {
    /// Append a new record; it becomes the current state.
    async fn save(&self, state: &AgentState) -> Result<(), RepositoryError>;

    /// Latest record, if any.
    async fn load(&self, id: &AgentId) -> Result<Option<AgentState>, RepositoryError>;
}

/// Highest event sequence whose triggers have all been settled.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<u64, RepositoryError>;

    async fn save(&self, sequence: u64) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
