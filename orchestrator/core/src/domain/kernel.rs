// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Kernel Interface
//!
//! The kernel is the external tool-calling loop that decides what an agent
//! does in a turn. The scheduler only needs to hand it messages and tool
//! schemas and collect the result; tool calls flow back through a
//! [`ToolDispatcher`] supplied by the turn executor so that tools can reach
//! the swarm.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::tools::ToolSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelMessage {
    pub role: MessageRole,
    pub content: String,
}

impl KernelMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub output: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    FinalMessage,
    MaxTurnsReached,
    NoToolCalls,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRequest {
    pub messages: Vec<KernelMessage>,
    pub tools: Vec<ToolSchema>,
    pub max_turns: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelResult {
    pub final_message: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    pub termination_reason: TerminationReason,
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Model request failed: {0}")]
    Model(String),

    #[error("Kernel aborted: {0}")]
    Aborted(String),
}

/// Executes tool calls on the kernel's behalf for the current turn.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, call: &ToolCall) -> ToolResult;
}

#[async_trait]
pub trait AgentKernel: Send + Sync {
    async fn run(&self, request: KernelRequest, tools: &dyn ToolDispatcher) -> Result<KernelResult, KernelError>;
}
