// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::agent::{AgentId, SourceRange};

/// A unit of source structure produced by the CST discoverer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CstNode {
    /// Discoverer-assigned identifier, only used to resolve `parent_node_id`.
    pub node_id: String,
    pub node_type: String,
    pub name: String,
    pub full_name: String,
    pub file_path: String,
    pub range: SourceRange,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub parent_node_id: Option<String>,
}

impl CstNode {
    pub fn agent_id(&self) -> AgentId {
        AgentId::for_node(&self.file_path, &self.node_type, &self.name, &self.range)
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// External CST extraction.
#[async_trait]
pub trait CstDiscoverer: Send + Sync {
    async fn discover(&self, paths: &[PathBuf]) -> Result<Vec<CstNode>, DiscoveryError>;
}
