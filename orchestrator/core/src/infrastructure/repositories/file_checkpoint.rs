// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::snapshot::{read_snapshot, write_snapshot};
use crate::domain::repository::{CheckpointStore, RepositoryError};

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    sequence: u64,
}

/// `dispatch.checkpoint`
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<u64, RepositoryError> {
        Ok(read_snapshot::<Checkpoint>(&self.path)
            .await?
            .map(|c| c.sequence)
            .unwrap_or(0))
    }

    async fn save(&self, sequence: u64) -> Result<(), RepositoryError> {
        write_snapshot(&self.path, &Checkpoint { sequence }).await
    }
}
