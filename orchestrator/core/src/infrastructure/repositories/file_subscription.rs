// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::snapshot::{read_snapshot, write_snapshot};
use crate::domain::agent::AgentId;
use crate::domain::repository::{RepositoryError, SubscriptionRepository};
use crate::domain::subscription::{Subscription, SubscriptionId};

/// `subscriptions.store`: every change rewrites the full snapshot before the
/// in-memory copy is updated.
pub struct FileSubscriptionRepository {
    path: PathBuf,
    subscriptions: RwLock<BTreeMap<SubscriptionId, Subscription>>,
    writer: Mutex<()>,
}

impl FileSubscriptionRepository {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        let stored: Vec<Subscription> = read_snapshot(&path).await?.unwrap_or_default();
        let subscriptions = stored.into_iter().map(|s| (s.subscription_id, s)).collect();
        Ok(Self {
            path,
            subscriptions: RwLock::new(subscriptions),
            writer: Mutex::new(()),
        })
    }

    async fn commit(&self, next: BTreeMap<SubscriptionId, Subscription>) -> Result<(), RepositoryError> {
        let snapshot: Vec<&Subscription> = next.values().collect();
        write_snapshot(&self.path, &snapshot).await?;
        *self.subscriptions.write() = next;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for FileSubscriptionRepository {
    async fn save(&self, subscription: &Subscription) -> Result<(), RepositoryError> {
        let _guard = self.writer.lock().await;
        let mut next = self.subscriptions.read().clone();
        next.insert(subscription.subscription_id, subscription.clone());
        self.commit(next).await
    }

    async fn delete(&self, id: SubscriptionId) -> Result<bool, RepositoryError> {
        let _guard = self.writer.lock().await;
        let mut next = self.subscriptions.read().clone();
        if next.remove(&id).is_none() {
            return Ok(false);
        }
        self.commit(next).await?;
        Ok(true)
    }

    async fn delete_by_agent(&self, agent_id: &AgentId) -> Result<Vec<SubscriptionId>, RepositoryError> {
        let _guard = self.writer.lock().await;
        let mut next = self.subscriptions.read().clone();
        let removed: Vec<SubscriptionId> = next
            .values()
            .filter(|s| &s.agent_id == agent_id)
            .map(|s| s.subscription_id)
            .collect();
        if removed.is_empty() {
            return Ok(removed);
        }
        next.retain(|_, s| &s.agent_id != agent_id);
        self.commit(next).await?;
        Ok(removed)
    }

    async fn list_all(&self) -> Result<Vec<Subscription>, RepositoryError> {
        Ok(self.subscriptions.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::{SubscriptionOrigin, SubscriptionPattern};

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.store");
        let agent = AgentId::new("aa01");
        let keep = Subscription::new(agent.clone(), SubscriptionPattern::direct_message(&agent), SubscriptionOrigin::Default);
        let drop_me = Subscription::new(agent.clone(), SubscriptionPattern::file_changed("a.py"), SubscriptionOrigin::Default);
        {
            let repo = FileSubscriptionRepository::open(&path).await.unwrap();
            repo.save(&keep).await.unwrap();
            repo.save(&drop_me).await.unwrap();
            assert!(repo.delete(drop_me.subscription_id).await.unwrap());
        }

        let repo = FileSubscriptionRepository::open(&path).await.unwrap();
        assert_eq!(repo.list_all().await.unwrap(), vec![keep]);
        assert_eq!(repo.delete_by_agent(&agent).await.unwrap().len(), 1);
        assert!(!path.with_file_name("subscriptions.store.tmp").exists());
    }
}
