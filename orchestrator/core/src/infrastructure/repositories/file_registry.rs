// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::snapshot::{read_snapshot, write_snapshot};
use crate::domain::agent::{AgentId, AgentMetadata, AgentStatus};
use crate::domain::repository::{RepositoryError, SwarmRegistry};

/// `swarm.registry`: snapshot of every known agent, active or orphaned.
pub struct FileSwarmRegistry {
    path: PathBuf,
    agents: RwLock<BTreeMap<AgentId, AgentMetadata>>,
    writer: Mutex<()>,
}

impl FileSwarmRegistry {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        let stored: Vec<AgentMetadata> = read_snapshot(&path).await?.unwrap_or_default();
        let agents = stored.into_iter().map(|m| (m.agent_id.clone(), m)).collect();
        Ok(Self {
            path,
            agents: RwLock::new(agents),
            writer: Mutex::new(()),
        })
    }

    async fn commit(&self, next: BTreeMap<AgentId, AgentMetadata>) -> Result<(), RepositoryError> {
        let snapshot: Vec<&AgentMetadata> = next.values().collect();
        write_snapshot(&self.path, &snapshot).await?;
        *self.agents.write() = next;
        Ok(())
    }
}

#[async_trait]
impl SwarmRegistry for FileSwarmRegistry {
    async fn save(&self, metadata: &AgentMetadata) -> Result<(), RepositoryError> {
        let _guard = self.writer.lock().await;
        let mut next = self.agents.read().clone();
        next.insert(metadata.agent_id.clone(), metadata.clone());
        self.commit(next).await
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentMetadata>, RepositoryError> {
        Ok(self.agents.read().get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<AgentMetadata>, RepositoryError> {
        Ok(self.agents.read().values().cloned().collect())
    }

    async fn set_status(&self, id: &AgentId, status: AgentStatus) -> Result<bool, RepositoryError> {
        let _guard = self.writer.lock().await;
        let mut next = self.agents.read().clone();
        match next.get_mut(id) {
            Some(metadata) if metadata.status == status => return Ok(true),
            Some(metadata) => metadata.status = status,
            None => return Ok(false),
        }
        self.commit(next).await?;
        Ok(true)
    }
}
