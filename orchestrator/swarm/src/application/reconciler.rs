// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reconciler
//!
//! Syncs the swarm registry with the current set of discovered source nodes.
//! A pass over unchanged sources is a no-op.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Agent lifecycle (create, orphan, notify on change)

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use treeswarm_core::application::{BundleRegistry, EventLog, SubscriptionRouter};
use treeswarm_core::domain::agent::{AgentId, AgentMetadata, AgentState, AgentStatus};
use treeswarm_core::domain::discovery::CstNode;
use treeswarm_core::domain::events::EventPayload;
use treeswarm_core::domain::repository::{AgentStateRepository, SwarmRegistry};

use crate::domain::{ReconcileError, ReconcileReport};

pub struct Reconciler {
    project_root: PathBuf,
    registry: Arc<dyn SwarmRegistry>,
    states: Arc<dyn AgentStateRepository>,
    router: Arc<SubscriptionRouter>,
    event_log: Arc<EventLog>,
    bundles: Arc<BundleRegistry>,
}

impl Reconciler {
    pub fn new(
        project_root: impl Into<PathBuf>,
        registry: Arc<dyn SwarmRegistry>,
        states: Arc<dyn AgentStateRepository>,
        router: Arc<SubscriptionRouter>,
        event_log: Arc<EventLog>,
        bundles: Arc<BundleRegistry>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            registry,
            states,
            router,
            event_log,
            bundles,
        }
    }

    pub async fn reconcile_on_startup(&self, nodes: &[CstNode]) -> Result<ReconcileReport, ReconcileError> {
        // Refuse the whole pass before touching anything if a type is unmapped.
        for node in nodes {
            self.bundles.resolve(&node.node_type)?;
        }

        let parents: HashMap<&str, AgentId> = nodes.iter().map(|n| (n.node_id.as_str(), n.agent_id())).collect();
        let mut discovered: BTreeMap<AgentId, AgentMetadata> = BTreeMap::new();
        for node in nodes {
            let parent_id = node
                .parent_node_id
                .as_deref()
                .and_then(|parent| parents.get(parent))
                .cloned();
            let metadata = AgentMetadata::from_node(node, parent_id);
            discovered.entry(metadata.agent_id.clone()).or_insert(metadata);
        }

        let known: BTreeMap<AgentId, AgentMetadata> = self
            .registry
            .list_all()
            .await
            .map_err(ReconcileError::Registry)?
            .into_iter()
            .map(|m| (m.agent_id.clone(), m))
            .collect();

        let mut report = ReconcileReport {
            total: discovered.len(),
            ..ReconcileReport::default()
        };
        let mut unchanged = Vec::new();

        for (agent_id, metadata) in &discovered {
            match known.get(agent_id) {
                Some(existing) if existing.is_active() => unchanged.push(existing),
                Some(existing) => {
                    let mut revived = existing.clone();
                    revived.status = AgentStatus::Active;
                    self.activate(&revived).await?;
                    info!(agent_id = %agent_id, file_path = %revived.file_path, "Orphaned agent reactivated");
                    report.created += 1;
                }
                None => {
                    self.activate(metadata).await?;
                    debug!(agent_id = %agent_id, full_name = %metadata.full_name, "Agent created");
                    report.created += 1;
                }
            }
        }

        for (agent_id, existing) in &known {
            if existing.is_active() && !discovered.contains_key(agent_id) {
                self.registry
                    .set_status(agent_id, AgentStatus::Orphaned)
                    .await
                    .map_err(ReconcileError::Registry)?;
                let removed = self.router.remove_agent(agent_id).await?;
                info!(
                    agent_id = %agent_id,
                    file_path = %existing.file_path,
                    subscriptions = removed.len(),
                    "Agent orphaned"
                );
                report.orphaned += 1;
            }
        }

        report.updated = self.notify_changed(&unchanged).await?;

        info!(
            created = report.created,
            orphaned = report.orphaned,
            updated = report.updated,
            total = report.total,
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Register `metadata` as active, with an initial state unless one is
    /// already on record, and its default subscriptions.
    async fn activate(&self, metadata: &AgentMetadata) -> Result<(), ReconcileError> {
        self.registry.save(metadata).await.map_err(ReconcileError::Registry)?;
        let existing = self
            .states
            .load(&metadata.agent_id)
            .await
            .map_err(ReconcileError::State)?;
        if existing.is_none() {
            self.states
                .save(&AgentState::from_metadata(metadata))
                .await
                .map_err(ReconcileError::State)?;
        }
        self.router
            .install_defaults(&metadata.agent_id, &metadata.file_path)
            .await?;
        Ok(())
    }

    /// Append one `content_changed` event per file modified after an agent's
    /// last activity. Returns the number of agents concerned.
    async fn notify_changed(&self, agents: &[&AgentMetadata]) -> Result<usize, ReconcileError> {
        let mut stale: BTreeMap<String, Vec<AgentState>> = BTreeMap::new();
        for metadata in agents {
            let Some(modified) = modified_at(&self.project_root.join(&metadata.file_path)).await else {
                continue;
            };
            let state = match self
                .states
                .load(&metadata.agent_id)
                .await
                .map_err(ReconcileError::State)?
            {
                Some(state) => state,
                None => {
                    warn!(agent_id = %metadata.agent_id, "Active agent had no state; recreating it");
                    let state = AgentState::from_metadata(metadata);
                    self.states.save(&state).await.map_err(ReconcileError::State)?;
                    continue;
                }
            };
            if modified > state.last_updated {
                stale.entry(metadata.file_path.clone()).or_default().push(state);
            }
        }

        let mut updated = 0;
        if !stale.is_empty() {
            debug!(files = stale.len(), "Source files changed since last run");
        }
        for (file_path, states) in stale {
            self.event_log
                .append(EventPayload::ContentChanged { path: file_path.clone(), diff: None }, None)
                .await?;
            for mut state in states {
                state.touch();
                self.states.save(&state).await.map_err(ReconcileError::State)?;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

async fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(DateTime::<Utc>::from)
}
