// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;
use tracing::info;

use crate::domain::bundle::{BundleError, BundleHandle, BundleResolver};

/// Node type → bundle mapping, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    bundles: BTreeMap<String, BundleHandle>,
}

impl BundleRegistry {
    /// Resolve every node type up front. Any unresolvable type fails the load.
    pub async fn load(resolver: &dyn BundleResolver, node_types: &[String]) -> Result<Self, BundleError> {
        let mut bundles = BTreeMap::new();
        for node_type in node_types {
            let handle = resolver.resolve(node_type).await?;
            bundles.insert(node_type.clone(), handle);
        }
        info!(node_types = bundles.len(), "Bundle registry loaded");
        Ok(Self { bundles })
    }

    pub fn resolve(&self, node_type: &str) -> Result<&BundleHandle, BundleError> {
        self.bundles
            .get(node_type)
            .ok_or_else(|| BundleError::Unmapped(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.bundles.contains_key(node_type)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}
