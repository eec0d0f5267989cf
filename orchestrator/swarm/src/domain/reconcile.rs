// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reconciliation Results
//!
//! - [`ReconcileReport`]: counts produced by one pass over the discovered nodes.
//! - [`ReconcileError`]: failures that abort a pass.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use treeswarm_core::application::EventLogError;
use treeswarm_core::domain::bundle::BundleError;
use treeswarm_core::domain::discovery::DiscoveryError;
use treeswarm_core::domain::repository::RepositoryError;
use treeswarm_core::domain::subscription::SubscriptionError;

/// Outcome of syncing the agent population with the discovered source nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Agents registered for the first time, or brought back from orphaned.
    pub created: usize,
    /// Active agents whose node disappeared.
    pub orphaned: usize,
    /// Agents whose source file changed since their last recorded activity.
    pub updated: usize,
    /// Distinct discovered nodes, i.e. the active population after the pass.
    pub total: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.orphaned == 0 && self.updated == 0
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A discovered node type has no bundle; the mapping is inconsistent.
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("Swarm registry failure: {0}")]
    Registry(#[source] RepositoryError),

    #[error("Agent state store failure: {0}")]
    State(#[source] RepositoryError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}
