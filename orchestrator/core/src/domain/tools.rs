// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Execution Interfaces
//!
//! - [`ToolBackend`]: external sandboxed tool runtime (discovery + execution).
//! - [`SwarmExternals`]: the swarm operations a tool may call back into,
//!   bound to one agent's turn.
//! - [`ToolContext`]: what the backend receives alongside each call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::{AgentId, AgentMetadata};
use crate::domain::bundle::BundleHandle;
use crate::domain::events::{EventId, EventPayload, SwarmId};
use crate::domain::subscription::{SubscriptionId, SubscriptionPattern};
use crate::domain::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub output: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { output: output.into(), is_error: false }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self { output: output.into(), is_error: true }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    Execution(String),

    #[error("Tool discovery failed for bundle {bundle}: {reason}")]
    Discovery { bundle: String, reason: String },

    #[error(transparent)]
    Externals(#[from] ExternalsError),
}

#[derive(Debug, Error)]
pub enum ExternalsError {
    /// The event log could not persist; the turn executor escalates this.
    #[error("Event log failure: {0}")]
    Storage(String),

    #[error("Invalid subscription pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid broadcast scope: {0}")]
    InvalidScope(String),

    #[error("Subscription {0} is not owned by this agent")]
    NotOwned(SubscriptionId),

    /// The agent was orphaned while its turn was running.
    #[error("Agent {0} is no longer active")]
    InactiveAgent(AgentId),

    #[error("Registry error: {0}")]
    Registry(String),
}

/// Recipients of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastScope {
    /// Every active agent except the sender (`*`).
    All,
    /// Active agents in the sender's file (`siblings`).
    Siblings,
    /// Active agents whose file matches the glob (`file:<glob>`).
    FileGlob(String),
}

impl FromStr for BroadcastScope {
    type Err = ExternalsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "*" | "all" => Ok(BroadcastScope::All),
            "siblings" => Ok(BroadcastScope::Siblings),
            other => match other.strip_prefix("file:") {
                Some(glob) if !glob.is_empty() => Ok(BroadcastScope::FileGlob(glob.to_string())),
                _ => Err(ExternalsError::InvalidScope(other.to_string())),
            },
        }
    }
}

/// Swarm operations exposed to tools during one agent's turn. Every event
/// emitted through this interface continues the trigger's causal chain.
#[async_trait]
pub trait SwarmExternals: Send + Sync {
    async fn emit_event(&self, payload: EventPayload) -> Result<EventId, ExternalsError>;

    async fn send_message(
        &self,
        to_agent: AgentId,
        content: String,
        tags: BTreeSet<String>,
    ) -> Result<EventId, ExternalsError>;

    /// Returns the number of recipients.
    async fn broadcast(&self, scope: BroadcastScope, content: String) -> Result<usize, ExternalsError>;

    async fn register_subscription(&self, pattern: SubscriptionPattern) -> Result<SubscriptionId, ExternalsError>;

    async fn unregister_subscription(&self, id: SubscriptionId) -> Result<bool, ExternalsError>;

    async fn query_agents(&self, node_type: Option<String>) -> Result<Vec<AgentMetadata>, ExternalsError>;

    async fn request_human_input(&self, question: String, options: Vec<String>) -> Result<Uuid, ExternalsError>;
}

/// Per-call context handed to the tool backend.
#[derive(Clone)]
pub struct ToolContext {
    pub swarm_id: SwarmId,
    pub agent_id: AgentId,
    pub bundle: BundleHandle,
    pub workspace: Arc<dyn Workspace>,
    pub externals: Arc<dyn SwarmExternals>,
}

#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn discover_tools(&self, bundle: &BundleHandle) -> Result<Vec<ToolSchema>, ToolError>;

    async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}
