// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Swarm operations handed to tools for the duration of one turn.
//!
//! Every event emitted here continues the trigger's causal chain. Storage
//! failures are reported to the tool and also latched so the turn executor
//! can escalate them once the kernel returns.

use async_trait::async_trait;
use glob::Pattern;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::application::event_log::EventLog;
use crate::application::subscription_router::SubscriptionRouter;
use crate::domain::agent::{AgentId, AgentMetadata};
use crate::domain::events::{CausalContext, EventId, EventPayload};
use crate::domain::repository::SwarmRegistry;
use crate::domain::subscription::{SubscriptionError, SubscriptionId, SubscriptionOrigin, SubscriptionPattern};
use crate::domain::tools::{BroadcastScope, ExternalsError, SwarmExternals};

pub struct TurnExternals {
    agent_id: AgentId,
    file_path: String,
    cause: CausalContext,
    event_log: Arc<EventLog>,
    router: Arc<SubscriptionRouter>,
    registry: Arc<dyn SwarmRegistry>,
    registered: Mutex<Vec<SubscriptionId>>,
    unregistered: Mutex<Vec<SubscriptionId>>,
    fatal: Mutex<Option<String>>,
}

impl TurnExternals {
    pub fn new(
        agent_id: AgentId,
        file_path: String,
        cause: CausalContext,
        event_log: Arc<EventLog>,
        router: Arc<SubscriptionRouter>,
        registry: Arc<dyn SwarmRegistry>,
    ) -> Self {
        Self {
            agent_id,
            file_path,
            cause,
            event_log,
            router,
            registry,
            registered: Mutex::new(Vec::new()),
            unregistered: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
        }
    }

    /// Subscriptions registered during the turn.
    pub fn registered(&self) -> Vec<SubscriptionId> {
        self.registered.lock().clone()
    }

    /// Subscriptions removed during the turn.
    pub fn unregistered(&self) -> Vec<SubscriptionId> {
        self.unregistered.lock().clone()
    }

    /// First event-log failure seen by a tool, if any.
    pub fn take_fatal(&self) -> Option<String> {
        self.fatal.lock().take()
    }

    async fn emit(&self, payload: EventPayload) -> Result<EventId, ExternalsError> {
        match self.event_log.append(payload, Some(self.cause)).await {
            Ok(event) => Ok(event.event_id),
            Err(e) => {
                error!(agent_id = %self.agent_id, error = %e, "Event emitted by tool could not be appended");
                let mut fatal = self.fatal.lock();
                if fatal.is_none() {
                    *fatal = Some(e.to_string());
                }
                Err(ExternalsError::Storage(e.to_string()))
            }
        }
    }

    async fn active_agents(&self) -> Result<Vec<AgentMetadata>, ExternalsError> {
        self.registry
            .list_active()
            .await
            .map_err(|e| ExternalsError::Registry(e.to_string()))
    }
}

#[async_trait]
impl SwarmExternals for TurnExternals {
    async fn emit_event(&self, payload: EventPayload) -> Result<EventId, ExternalsError> {
        self.emit(payload).await
    }

    async fn send_message(
        &self,
        to_agent: AgentId,
        content: String,
        tags: BTreeSet<String>,
    ) -> Result<EventId, ExternalsError> {
        debug!(from = %self.agent_id, to = %to_agent, "Agent message");
        self.emit(EventPayload::AgentMessage {
            from_agent: self.agent_id.clone(),
            to_agent,
            content,
            tags,
        })
        .await
    }

    async fn broadcast(&self, scope: BroadcastScope, content: String) -> Result<usize, ExternalsError> {
        let glob = match &scope {
            BroadcastScope::FileGlob(glob) => {
                Some(Pattern::new(glob).map_err(|e| ExternalsError::InvalidScope(format!("{glob}: {e}")))?)
            }
            _ => None,
        };

        let recipients: Vec<AgentId> = self
            .active_agents()
            .await?
            .into_iter()
            .filter(|agent| agent.agent_id != self.agent_id)
            .filter(|agent| match &scope {
                BroadcastScope::All => true,
                BroadcastScope::Siblings => agent.file_path == self.file_path,
                BroadcastScope::FileGlob(_) => glob.as_ref().is_some_and(|g| g.matches(&agent.file_path)),
            })
            .map(|agent| agent.agent_id)
            .collect();

        let tags = BTreeSet::from(["broadcast".to_string()]);
        for to_agent in &recipients {
            self.send_message(to_agent.clone(), content.clone(), tags.clone()).await?;
        }
        Ok(recipients.len())
    }

    async fn register_subscription(&self, pattern: SubscriptionPattern) -> Result<SubscriptionId, ExternalsError> {
        let active = self
            .registry
            .find_by_id(&self.agent_id)
            .await
            .map_err(|e| ExternalsError::Registry(e.to_string()))?
            .is_some_and(|agent| agent.is_active());
        if !active {
            return Err(ExternalsError::InactiveAgent(self.agent_id.clone()));
        }

        let id = self
            .router
            .register(self.agent_id.clone(), pattern)
            .await
            .map_err(|e| match e {
                SubscriptionError::InvalidGlob { .. } => ExternalsError::InvalidPattern(e.to_string()),
                SubscriptionError::InactiveAgent(agent_id) => ExternalsError::InactiveAgent(agent_id),
                other => ExternalsError::Registry(other.to_string()),
            })?;
        self.registered.lock().push(id);
        Ok(id)
    }

    async fn unregister_subscription(&self, id: SubscriptionId) -> Result<bool, ExternalsError> {
        let Some(subscription) = self.router.subscription(id) else {
            return Ok(false);
        };
        if subscription.agent_id != self.agent_id || subscription.origin != SubscriptionOrigin::Custom {
            return Err(ExternalsError::NotOwned(id));
        }

        let removed = self
            .router
            .unregister(id)
            .await
            .map_err(|e| ExternalsError::Registry(e.to_string()))?;
        if removed {
            self.unregistered.lock().push(id);
        }
        Ok(removed)
    }

    async fn query_agents(&self, node_type: Option<String>) -> Result<Vec<AgentMetadata>, ExternalsError> {
        let agents = self.active_agents().await?;
        Ok(match node_type {
            Some(node_type) => agents.into_iter().filter(|a| a.node_type == node_type).collect(),
            None => agents,
        })
    }

    async fn request_human_input(&self, question: String, options: Vec<String>) -> Result<Uuid, ExternalsError> {
        let request_id = Uuid::new_v4();
        self.emit(EventPayload::HumanInputRequest {
            agent_id: self.agent_id.clone(),
            request_id,
            question,
            options,
        })
        .await?;
        Ok(request_id)
    }
}
