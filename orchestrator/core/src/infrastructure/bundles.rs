// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::bundle::{BundleError, BundleHandle, BundleResolver};

/// Fixed node type → bundle table.
#[derive(Debug, Clone, Default)]
pub struct StaticBundleResolver {
    bundles: HashMap<String, BundleHandle>,
}

impl StaticBundleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node_type: impl Into<String>, handle: BundleHandle) -> Self {
        self.bundles.insert(node_type.into(), handle);
        self
    }
}

#[async_trait]
impl BundleResolver for StaticBundleResolver {
    async fn resolve(&self, node_type: &str) -> Result<BundleHandle, BundleError> {
        self.bundles
            .get(node_type)
            .cloned()
            .ok_or_else(|| BundleError::Unmapped(node_type.to_string()))
    }
}

/// Resolves `<root>/<node_type>/` when that directory exists.
#[derive(Debug, Clone)]
pub struct DirectoryBundleResolver {
    root: PathBuf,
}

impl DirectoryBundleResolver {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
}

#[async_trait]
impl BundleResolver for DirectoryBundleResolver {
    async fn resolve(&self, node_type: &str) -> Result<BundleHandle, BundleError> {
        if node_type.is_empty() || node_type.contains(['/', '\\']) || node_type == ".." {
            return Err(BundleError::Resolution {
                node_type: node_type.to_string(),
                reason: "not a valid bundle directory name".to_string(),
            });
        }
        let dir = self.root.join(node_type);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(BundleHandle::new(node_type, dir.display().to_string())),
            Ok(_) => Err(BundleError::Resolution {
                node_type: node_type.to_string(),
                reason: format!("{} is not a directory", dir.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BundleError::Unmapped(node_type.to_string())),
            Err(e) => Err(BundleError::Resolution {
                node_type: node_type.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
