// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workspace Service - Anti-Corruption Layer for agent file access
//!
//! Each agent works through a workspace handle opened for it. The storage
//! behind the handle (copy-on-write overlays, sandboxes) is external; the
//! scheduler only reads the agent's target file through it and passes the
//! handle to tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: EntryType,
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Path escapes workspace root: {0}")]
    PathTraversal(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// File access for one agent.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String, WorkspaceError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), WorkspaceError>;

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, WorkspaceError>;
}

#[async_trait]
pub trait WorkspaceService: Send + Sync {
    async fn open(&self, agent_id: &AgentId) -> Result<Arc<dyn Workspace>, WorkspaceError>;
}
