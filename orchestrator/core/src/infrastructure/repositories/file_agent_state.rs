// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-agent append-only state logs under `agents/<shard>/<agent_id>/state.log`.
//!
//! Each save appends one JSON record; the last record that parses is the
//! current state. Loaded states are cached so repeated loads skip the disk.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::domain::agent::{AgentId, AgentState};
use crate::domain::repository::{AgentStateRepository, RepositoryError};

pub struct FileAgentStateRepository {
    root: PathBuf,
    cache: DashMap<AgentId, AgentState>,
}

impl FileAgentStateRepository {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cache: DashMap::new(),
        }
    }

    fn log_path(&self, id: &AgentId) -> Result<PathBuf, RepositoryError> {
        if !id.is_path_safe() {
            return Err(RepositoryError::InvalidKey(id.to_string()));
        }
        Ok(self.root.join(id.shard()).join(id.as_str()).join("state.log"))
    }

    async fn read_latest(path: &Path) -> Result<Option<AgentState>, RepositoryError> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        for line in text.lines().rev().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<AgentState>(line) {
                Ok(state) => return Ok(Some(state)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable state record"),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl AgentStateRepository for FileAgentStateRepository {
    async fn save(&self, state: &AgentState) -> Result<(), RepositoryError> {
        let path = self.log_path(&state.agent_id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut record = serde_json::to_string(state)?;
        record.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        // A crash mid-write leaves an unterminated record; start on a fresh line.
        let len = file.metadata().await?.len();
        if len > 0 && !ends_with_newline(&path, len).await? {
            record.insert(0, '\n');
        }
        file.write_all(record.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        self.cache.insert(state.agent_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, id: &AgentId) -> Result<Option<AgentState>, RepositoryError> {
        if let Some(state) = self.cache.get(id) {
            return Ok(Some(state.clone()));
        }
        let path = self.log_path(id)?;
        let state = Self::read_latest(&path).await?;
        if let Some(state) = &state {
            self.cache.insert(id.clone(), state.clone());
        }
        Ok(state)
    }
}

async fn ends_with_newline(path: &Path, len: u64) -> Result<bool, RepositoryError> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}
