// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Subscription Router
//!
//! Holds the active subscriptions as an immutable snapshot that readers
//! clone out of a short read lock; writers persist first, then swap in a new
//! snapshot. Globs are compiled once at insertion.
//!
//! An agent whose subscriptions were removed is retired: registrations for it
//! are refused until its defaults are installed again, so a turn still in
//! flight cannot resubscribe an orphaned agent.

use glob::Pattern;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::events::Event;
use crate::domain::repository::SubscriptionRepository;
use crate::domain::subscription::{
    Subscription, SubscriptionError, SubscriptionId, SubscriptionOrigin, SubscriptionPattern,
};

#[derive(Clone)]
struct ActiveSubscription {
    subscription: Subscription,
    glob: Option<Pattern>,
}

impl ActiveSubscription {
    fn compile(subscription: Subscription) -> Result<Self, SubscriptionError> {
        let glob = subscription.pattern.compile()?;
        Ok(Self { subscription, glob })
    }

    fn matches(&self, event: &Event) -> bool {
        self.subscription
            .pattern
            .matches_compiled(&event.payload, self.glob.as_ref())
    }
}

pub struct SubscriptionRouter {
    repository: Arc<dyn SubscriptionRepository>,
    snapshot: RwLock<Arc<Vec<ActiveSubscription>>>,
    /// Agents whose subscriptions were removed. Guarded by `writer`.
    retired: Mutex<BTreeSet<AgentId>>,
    writer: tokio::sync::Mutex<()>,
}

impl SubscriptionRouter {
    /// Load persisted subscriptions. Entries whose glob no longer compiles are
    /// skipped with a warning.
    pub async fn load(repository: Arc<dyn SubscriptionRepository>) -> Result<Self, SubscriptionError> {
        let mut active = Vec::new();
        for subscription in repository.list_all().await? {
            let id = subscription.subscription_id;
            match ActiveSubscription::compile(subscription) {
                Ok(entry) => active.push(entry),
                Err(e) => warn!(subscription_id = %id, error = %e, "Skipping unusable subscription"),
            }
        }
        info!(count = active.len(), "Loaded subscriptions");

        Ok(Self {
            repository,
            snapshot: RwLock::new(Arc::new(active)),
            retired: Mutex::new(BTreeSet::new()),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    fn current(&self) -> Arc<Vec<ActiveSubscription>> {
        self.snapshot.read().clone()
    }

    /// Agents with at least one subscription matching `event`.
    pub fn matching_agents(&self, event: &Event) -> BTreeSet<AgentId> {
        self.current()
            .iter()
            .filter(|entry| entry.matches(event))
            .map(|entry| entry.subscription.agent_id.clone())
            .collect()
    }

    /// Register a custom subscription for `agent_id`.
    pub async fn register(
        &self,
        agent_id: AgentId,
        pattern: SubscriptionPattern,
    ) -> Result<SubscriptionId, SubscriptionError> {
        let _guard = self.writer.lock().await;
        if self.retired.lock().contains(&agent_id) {
            return Err(SubscriptionError::InactiveAgent(agent_id));
        }
        let entry = ActiveSubscription::compile(Subscription::new(agent_id, pattern, SubscriptionOrigin::Custom))?;
        let id = entry.subscription.subscription_id;
        self.commit(vec![entry]).await?;
        Ok(id)
    }

    /// Install the direct-message and own-file-changed subscriptions and lift
    /// any retirement. Returns the existing ids when the agent already has its
    /// defaults.
    pub async fn install_defaults(
        &self,
        agent_id: &AgentId,
        file_path: &str,
    ) -> Result<Vec<SubscriptionId>, SubscriptionError> {
        let _guard = self.writer.lock().await;
        self.retired.lock().remove(agent_id);
        let existing: Vec<SubscriptionId> = self
            .subscriptions_for(agent_id)
            .into_iter()
            .filter(|s| s.origin == SubscriptionOrigin::Default)
            .map(|s| s.subscription_id)
            .collect();
        if !existing.is_empty() {
            return Ok(existing);
        }

        let entries = vec![
            ActiveSubscription::compile(Subscription::new(
                agent_id.clone(),
                SubscriptionPattern::direct_message(agent_id),
                SubscriptionOrigin::Default,
            ))?,
            ActiveSubscription::compile(Subscription::new(
                agent_id.clone(),
                SubscriptionPattern::file_changed(file_path),
                SubscriptionOrigin::Default,
            ))?,
        ];
        let ids = entries.iter().map(|e| e.subscription.subscription_id).collect();
        self.commit(entries).await?;
        debug!(agent_id = %agent_id, file_path, "Installed default subscriptions");
        Ok(ids)
    }

    /// Persist and publish `entries`. The caller holds `writer`.
    async fn commit(&self, entries: Vec<ActiveSubscription>) -> Result<(), SubscriptionError> {
        for entry in &entries {
            self.repository.save(&entry.subscription).await?;
        }
        let mut next = (*self.current()).clone();
        next.extend(entries);
        *self.snapshot.write() = Arc::new(next);
        Ok(())
    }

    /// Remove one subscription. Returns false when it did not exist.
    pub async fn unregister(&self, id: SubscriptionId) -> Result<bool, SubscriptionError> {
        let _guard = self.writer.lock().await;
        let removed = self.repository.delete(id).await?;
        let mut next = (*self.current()).clone();
        next.retain(|entry| entry.subscription.subscription_id != id);
        *self.snapshot.write() = Arc::new(next);
        Ok(removed)
    }

    /// Remove every subscription owned by `agent_id` and retire the agent.
    pub async fn remove_agent(&self, agent_id: &AgentId) -> Result<Vec<SubscriptionId>, SubscriptionError> {
        let _guard = self.writer.lock().await;
        self.retired.lock().insert(agent_id.clone());
        let removed = self.repository.delete_by_agent(agent_id).await?;
        let mut next = (*self.current()).clone();
        next.retain(|entry| &entry.subscription.agent_id != agent_id);
        *self.snapshot.write() = Arc::new(next);
        Ok(removed)
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<Subscription> {
        self.current()
            .iter()
            .find(|entry| entry.subscription.subscription_id == id)
            .map(|entry| entry.subscription.clone())
    }

    pub fn subscriptions_for(&self, agent_id: &AgentId) -> Vec<Subscription> {
        self.current()
            .iter()
            .filter(|entry| &entry.subscription.agent_id == agent_id)
            .map(|entry| entry.subscription.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
