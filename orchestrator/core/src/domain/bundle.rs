// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque reference to the bundle (prompts + tools) that handles a node type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleHandle {
    pub name: String,
    /// Resolver-specific location (directory, registry key, ...).
    pub location: String,
}

impl BundleHandle {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self { name: name.into(), location: location.into() }
    }
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("No bundle mapped for node type '{0}'")]
    Unmapped(String),

    #[error("Bundle resolution failed for node type '{node_type}': {reason}")]
    Resolution { node_type: String, reason: String },
}

/// External node-type → bundle mapping.
#[async_trait]
pub trait BundleResolver: Send + Sync {
    async fn resolve(&self, node_type: &str) -> Result<BundleHandle, BundleError>;
}
