// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the persistence contracts defined in
//! the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve swarm state
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## File Repositories
//!
//! Durable implementations rooted in the swarm's state directory:
//! - **FileSubscriptionRepository** - `subscriptions.store` snapshot
//! - **FileSwarmRegistry** - `swarm.registry` snapshot
//! - **FileAgentStateRepository** - `agents/<shard>/<id>/state.log` append-only logs
//! - **FileCheckpointStore** - `dispatch.checkpoint`
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for testing and embedding.

pub mod file_agent_state;
pub mod file_checkpoint;
pub mod file_registry;
pub mod file_subscription;
mod snapshot;

pub use file_agent_state::FileAgentStateRepository;
pub use file_checkpoint::FileCheckpointStore;
pub use file_registry::FileSwarmRegistry;
pub use file_subscription::FileSubscriptionRepository;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::agent::{AgentId, AgentMetadata, AgentState, AgentStatus};
use crate::domain::repository::{
    AgentStateRepository, CheckpointStore, RepositoryError, SubscriptionRepository, SwarmRegistry,
};
use crate::domain::subscription::{Subscription, SubscriptionId};

#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    subscriptions: RwLock<BTreeMap<SubscriptionId, Subscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn save(&self, subscription: &Subscription) -> Result<(), RepositoryError> {
        self.subscriptions
            .write()
            .insert(subscription.subscription_id, subscription.clone());
        Ok(())
    }

    async fn delete(&self, id: SubscriptionId) -> Result<bool, RepositoryError> {
        Ok(self.subscriptions.write().remove(&id).is_some())
    }

    async fn delete_by_agent(&self, agent_id: &AgentId) -> Result<Vec<SubscriptionId>, RepositoryError> {
        let mut subscriptions = self.subscriptions.write();
        let ids: Vec<SubscriptionId> = subscriptions
            .values()
            .filter(|s| &s.agent_id == agent_id)
            .map(|s| s.subscription_id)
            .collect();
        for id in &ids {
            subscriptions.remove(id);
        }
        Ok(ids)
    }

    async fn list_all(&self) -> Result<Vec<Subscription>, RepositoryError> {
        Ok(self.subscriptions.read().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemorySwarmRegistry {
    agents: RwLock<BTreeMap<AgentId, AgentMetadata>>,
}

impl InMemorySwarmRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwarmRegistry for InMemorySwarmRegistry {
    async fn save(&self, metadata: &AgentMetadata) -> Result<(), RepositoryError> {
        self.agents
            .write()
            .insert(metadata.agent_id.clone(), metadata.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentMetadata>, RepositoryError> {
        Ok(self.agents.read().get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<AgentMetadata>, RepositoryError> {
        Ok(self.agents.read().values().cloned().collect())
    }

    async fn set_status(&self, id: &AgentId, status: AgentStatus) -> Result<bool, RepositoryError> {
        match self.agents.write().get_mut(id) {
            Some(metadata) => {
                metadata.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Keeps every saved record so tests can inspect an agent's full history.
#[derive(Default)]
pub struct InMemoryAgentStateRepository {
    logs: RwLock<HashMap<AgentId, Vec<AgentState>>>,
}

impl InMemoryAgentStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records saved for `id`, oldest first.
    pub fn history(&self, id: &AgentId) -> Vec<AgentState> {
        self.logs.read().get(id).cloned().unwrap_or_default()
    }

    pub fn agent_count(&self) -> usize {
        self.logs.read().len()
    }
}

#[async_trait]
impl AgentStateRepository for InMemoryAgentStateRepository {
    async fn save(&self, state: &AgentState) -> Result<(), RepositoryError> {
        self.logs
            .write()
            .entry(state.agent_id.clone())
            .or_default()
            .push(state.clone());
        Ok(())
    }

    async fn load(&self, id: &AgentId) -> Result<Option<AgentState>, RepositoryError> {
        Ok(self.logs.read().get(id).and_then(|log| log.last().cloned()))
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    sequence: AtomicU64,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self) -> Result<u64, RepositoryError> {
        Ok(self.sequence.load(Ordering::SeqCst))
    }

    async fn save(&self, sequence: u64) -> Result<(), RepositoryError> {
        self.sequence.store(sequence, Ordering::SeqCst);
        Ok(())
    }
}
