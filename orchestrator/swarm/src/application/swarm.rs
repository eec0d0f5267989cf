// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Swarm
//!
//! Composition root of one swarm. `open` builds every store and service once
//! and hands them to the components that need them; nothing is global.
//! Triggers left unsettled by a previous process are re-routed during open.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Wiring and the operator surface (start, stop, append, status)

use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use treeswarm_core::application::{
    trigger_channel, BundleRegistry, DispatchLedger, EventLog, EventLogError, Scheduler, SchedulerError,
    SchedulerSettings, SchedulerStatus, SubscriptionRouter, TriggerReceiver, TurnExecutor, TurnServices,
    TurnSettings,
};
use treeswarm_core::domain::agent::{AgentId, AgentMetadata, AgentState};
use treeswarm_core::domain::bundle::BundleResolver;
use treeswarm_core::domain::discovery::{CstDiscoverer, CstNode};
use treeswarm_core::domain::events::{Event, EventPayload, SwarmId};
use treeswarm_core::domain::kernel::AgentKernel;
use treeswarm_core::domain::repository::{
    AgentStateRepository, CheckpointStore, EventStore, RepositoryError, SubscriptionRepository, SwarmRegistry,
};
use treeswarm_core::domain::subscription::Subscription;
use treeswarm_core::domain::swarm_config::SwarmConfig;
use treeswarm_core::domain::tools::ToolBackend;
use treeswarm_core::domain::workspace::WorkspaceService;
use treeswarm_core::infrastructure::event_bus::{EventBus, EventReceiver};
use treeswarm_core::infrastructure::event_store::{InMemoryEventStore, JsonlEventStore};
use treeswarm_core::infrastructure::repositories::{
    FileAgentStateRepository, FileCheckpointStore, FileSubscriptionRepository, FileSwarmRegistry,
    InMemoryAgentStateRepository, InMemoryCheckpointStore, InMemorySubscriptionRepository, InMemorySwarmRegistry,
};
use treeswarm_core::infrastructure::workspace::LocalWorkspaceService;

use crate::application::reconciler::Reconciler;
use crate::domain::{ReconcileError, ReconcileReport};

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("No CST discoverer configured")]
    NoDiscoverer,

    #[error("Swarm is already running")]
    AlreadyRunning,

    #[error("Swarm is not running")]
    NotRunning,

    #[error("Dispatch loop task failed: {0}")]
    Join(String),
}

/// External collaborators supplied by the embedder.
#[derive(Clone)]
pub struct SwarmCollaborators {
    pub kernel: Arc<dyn AgentKernel>,
    pub tools: Arc<dyn ToolBackend>,
    pub bundles: Arc<dyn BundleResolver>,
    /// Defaults to the project tree itself.
    pub workspaces: Option<Arc<dyn WorkspaceService>>,
    pub discoverer: Option<Arc<dyn CstDiscoverer>>,
}

struct SwarmStores {
    events: Arc<dyn EventStore>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    registry: Arc<dyn SwarmRegistry>,
    states: Arc<dyn AgentStateRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwarmStatus {
    pub swarm_id: SwarmId,
    pub last_sequence: u64,
    /// Highest sequence whose triggers have all settled.
    pub dispatch_checkpoint: u64,
    pub outstanding_triggers: usize,
    pub scheduler: SchedulerStatus,
}

type LoopHandle = JoinHandle<(TriggerReceiver, Result<(), SchedulerError>)>;

struct DispatchLoop {
    shutdown: CancellationToken,
    handle: LoopHandle,
}

struct Runtime {
    triggers: Option<TriggerReceiver>,
    active: Option<DispatchLoop>,
}

pub struct Swarm {
    config: SwarmConfig,
    event_log: Arc<EventLog>,
    router: Arc<SubscriptionRouter>,
    registry: Arc<dyn SwarmRegistry>,
    states: Arc<dyn AgentStateRepository>,
    ledger: Arc<DispatchLedger>,
    scheduler: Arc<Scheduler>,
    reconciler: Reconciler,
    discoverer: Option<Arc<dyn CstDiscoverer>>,
    runtime: Mutex<Runtime>,
}

impl Swarm {
    /// Open the swarm persisted under `config.state_dir`.
    pub async fn open(config: SwarmConfig, collaborators: SwarmCollaborators) -> anyhow::Result<Self> {
        let state_dir = config.state_dir.clone();
        tokio::fs::create_dir_all(&state_dir)
            .await
            .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;

        let stores = SwarmStores {
            events: Arc::new(
                JsonlEventStore::open(state_dir.join("events.log"))
                    .await
                    .context("Failed to open event log")?,
            ),
            subscriptions: Arc::new(
                FileSubscriptionRepository::open(state_dir.join("subscriptions.store"))
                    .await
                    .context("Failed to open subscription store")?,
            ),
            registry: Arc::new(
                FileSwarmRegistry::open(state_dir.join("swarm.registry"))
                    .await
                    .context("Failed to open swarm registry")?,
            ),
            states: Arc::new(FileAgentStateRepository::new(state_dir.join("agents"))),
            checkpoints: Arc::new(FileCheckpointStore::new(state_dir.join("dispatch.checkpoint"))),
        };
        Self::assemble(config, collaborators, stores).await
    }

    /// A swarm whose state lives only as long as the value.
    pub async fn open_in_memory(config: SwarmConfig, collaborators: SwarmCollaborators) -> anyhow::Result<Self> {
        let stores = SwarmStores {
            events: Arc::new(InMemoryEventStore::new()),
            subscriptions: Arc::new(InMemorySubscriptionRepository::new()),
            registry: Arc::new(InMemorySwarmRegistry::new()),
            states: Arc::new(InMemoryAgentStateRepository::new()),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
        };
        Self::assemble(config, collaborators, stores).await
    }

    async fn assemble(
        config: SwarmConfig,
        collaborators: SwarmCollaborators,
        stores: SwarmStores,
    ) -> anyhow::Result<Self> {
        config.validate().context("Invalid swarm configuration")?;

        let bundles = Arc::new(
            BundleRegistry::load(collaborators.bundles.as_ref(), &config.node_types)
                .await
                .context("Failed to resolve bundles for configured node types")?,
        );
        let router = Arc::new(SubscriptionRouter::load(stores.subscriptions).await?);
        let ledger = Arc::new(DispatchLedger::open(stores.checkpoints).await?);
        let (sender, receiver) = trigger_channel();
        let event_log = Arc::new(
            EventLog::open(
                config.swarm_id.clone(),
                stores.events,
                router.clone(),
                sender.clone(),
                ledger.clone(),
                EventBus::new(config.event_broadcast_capacity),
            )
            .await?,
        );

        let replayed = event_log.replay_from(ledger.checkpoint()).await?;
        if replayed > 0 {
            warn!(triggers = replayed, "Re-enqueued triggers left unsettled by the previous run");
        }

        let workspaces = collaborators
            .workspaces
            .unwrap_or_else(|| Arc::new(LocalWorkspaceService::new(config.project_root.clone())));
        let executor = Arc::new(TurnExecutor::new(
            TurnSettings::from_config(&config),
            TurnServices {
                event_log: event_log.clone(),
                router: router.clone(),
                registry: stores.registry.clone(),
                states: stores.states.clone(),
                bundles: bundles.clone(),
                workspaces,
                tools: collaborators.tools,
                kernel: collaborators.kernel,
            },
        ));
        let scheduler = Arc::new(Scheduler::new(
            SchedulerSettings::from_config(&config),
            executor,
            ledger.clone(),
            sender,
        ));
        let reconciler = Reconciler::new(
            config.project_root.clone(),
            stores.registry.clone(),
            stores.states.clone(),
            router.clone(),
            event_log.clone(),
            bundles,
        );

        info!(
            swarm_id = %config.swarm_id,
            state_dir = %config.state_dir.display(),
            last_sequence = event_log.last_sequence(),
            "Swarm opened"
        );
        Ok(Self {
            config,
            event_log,
            router,
            registry: stores.registry,
            states: stores.states,
            ledger,
            scheduler,
            reconciler,
            discoverer: collaborators.discoverer,
            runtime: Mutex::new(Runtime {
                triggers: Some(receiver),
                active: None,
            }),
        })
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub async fn reconcile(&self, nodes: &[CstNode]) -> Result<ReconcileReport, SwarmError> {
        Ok(self.reconciler.reconcile_on_startup(nodes).await?)
    }

    /// Discover nodes under `paths` (relative to the project root) and
    /// reconcile against them.
    pub async fn discover_and_reconcile(&self, paths: &[PathBuf]) -> Result<ReconcileReport, SwarmError> {
        let discoverer = self.discoverer.as_ref().ok_or(SwarmError::NoDiscoverer)?;
        let paths: Vec<PathBuf> = paths.iter().map(|p| self.config.project_root.join(p)).collect();
        let nodes = discoverer
            .discover(&paths)
            .await
            .map_err(ReconcileError::from)?;
        self.reconcile(&nodes).await
    }

    /// Spawn the dispatch loop.
    pub async fn start(&self) -> Result<(), SwarmError> {
        let mut runtime = self.runtime.lock().await;
        if runtime.active.is_some() {
            return Err(SwarmError::AlreadyRunning);
        }
        let triggers = runtime.triggers.take().ok_or(SwarmError::AlreadyRunning)?;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(self.scheduler.clone().run(triggers, shutdown.clone()));
        runtime.active = Some(DispatchLoop { shutdown, handle });
        info!(swarm_id = %self.config.swarm_id, "Swarm started");
        Ok(())
    }

    /// Stop dispatching and wait for in-flight turns. Returns the error that
    /// ended the loop, if it stopped on its own.
    pub async fn stop(&self) -> Result<(), SwarmError> {
        let mut runtime = self.runtime.lock().await;
        let active = runtime.active.take().ok_or(SwarmError::NotRunning)?;
        active.shutdown.cancel();
        let (triggers, result) = active.handle.await.map_err(|e| SwarmError::Join(e.to_string()))?;
        runtime.triggers = Some(triggers);
        info!(swarm_id = %self.config.swarm_id, "Swarm stopped");
        Ok(result?)
    }

    pub async fn is_running(&self) -> bool {
        self.runtime.lock().await.active.is_some() && self.scheduler.is_running()
    }

    /// Append a root event on behalf of an operator.
    pub async fn append(&self, payload: EventPayload) -> Result<Arc<Event>, SwarmError> {
        Ok(self.event_log.append(payload, None).await?)
    }

    pub async fn status(&self) -> SwarmStatus {
        SwarmStatus {
            swarm_id: self.config.swarm_id.clone(),
            last_sequence: self.event_log.last_sequence(),
            dispatch_checkpoint: self.ledger.checkpoint(),
            outstanding_triggers: self.ledger.outstanding(),
            scheduler: self.scheduler.status(),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_log.subscribe()
    }

    pub async fn events(&self, after_sequence: u64, limit: Option<usize>) -> Result<Vec<Event>, SwarmError> {
        Ok(self.event_log.read_from(after_sequence, limit).await?)
    }

    pub async fn agents(&self) -> Result<Vec<AgentMetadata>, SwarmError> {
        Ok(self.registry.list_all().await?)
    }

    pub async fn agent_state(&self, agent_id: &AgentId) -> Result<Option<AgentState>, SwarmError> {
        Ok(self.states.load(agent_id).await?)
    }

    pub fn subscriptions_for(&self, agent_id: &AgentId) -> Vec<Subscription> {
        self.router.subscriptions_for(agent_id)
    }
}
