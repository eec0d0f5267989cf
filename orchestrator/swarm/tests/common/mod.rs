// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use treeswarm_core::domain::agent::SourceRange;
use treeswarm_core::domain::bundle::BundleHandle;
use treeswarm_core::domain::discovery::{CstDiscoverer, CstNode, DiscoveryError};
use treeswarm_core::domain::kernel::{
    AgentKernel, KernelError, KernelRequest, KernelResult, TerminationReason, ToolCall, ToolDispatcher,
};
use treeswarm_core::domain::swarm_config::SwarmConfig;
use treeswarm_core::domain::tools::{ToolBackend, ToolContext, ToolError, ToolOutput, ToolSchema};
use treeswarm_core::infrastructure::bundles::StaticBundleResolver;
use treeswarm_swarm::SwarmCollaborators;

pub fn node(id: &str, node_type: &str, name: &str, file_path: &str, start: u32) -> CstNode {
    CstNode {
        node_id: id.to_string(),
        node_type: node_type.to_string(),
        name: name.to_string(),
        full_name: format!("{}.{}", file_path.trim_end_matches(".py"), name),
        file_path: file_path.to_string(),
        range: SourceRange::new(start, start + 9),
        text: String::new(),
        parent_node_id: None,
    }
}

pub fn three_nodes() -> Vec<CstNode> {
    let mut method = node("n3", "function", "parse", "parser.py", 20);
    method.parent_node_id = Some("n2".to_string());
    vec![
        node("n1", "function", "main", "main.py", 1),
        node("n2", "class", "Parser", "parser.py", 10),
        method,
    ]
}

pub fn config(root: &Path) -> SwarmConfig {
    SwarmConfig {
        project_root: root.join("src"),
        state_dir: root.join("state"),
        node_types: vec!["function".to_string(), "class".to_string()],
        trigger_cooldown_ms: 0,
        shutdown_grace_secs: 1,
        ..SwarmConfig::default()
    }
}

/// Kernel that, when `echo` is set, asks the `message_self` tool to send the
/// agent a message on every run.
#[derive(Default)]
pub struct EchoKernel {
    pub echo: bool,
    pub delay: Duration,
    runs: AtomicUsize,
}

impl EchoKernel {
    pub fn echoing() -> Self {
        Self { echo: true, ..Self::default() }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentKernel for EchoKernel {
    async fn run(&self, _request: KernelRequest, tools: &dyn ToolDispatcher) -> Result<KernelResult, KernelError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();
        if self.echo {
            let call = ToolCall {
                call_id: "call-1".to_string(),
                name: "message_self".to_string(),
                arguments: serde_json::json!({"content": "again"}),
            };
            tool_results.push(tools.dispatch(&call).await);
            tool_calls.push(call);
        }
        Ok(KernelResult {
            final_message: "ok".to_string(),
            tool_calls,
            tool_results,
            termination_reason: TerminationReason::FinalMessage,
        })
    }
}

pub struct SelfMessageTools;

#[async_trait]
impl ToolBackend for SelfMessageTools {
    async fn discover_tools(&self, _bundle: &BundleHandle) -> Result<Vec<ToolSchema>, ToolError> {
        Ok(vec![ToolSchema {
            name: "message_self".to_string(),
            description: "Send yourself a message".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {"content": {"type": "string"}}}),
        }])
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        if tool_name != "message_self" {
            return Err(ToolError::UnknownTool(tool_name.to_string()));
        }
        let content = arguments["content"].as_str().unwrap_or_default().to_string();
        let id = context
            .externals
            .send_message(context.agent_id.clone(), content, Default::default())
            .await?;
        Ok(ToolOutput::ok(id.to_string()))
    }
}

pub struct FixedDiscoverer {
    pub nodes: Vec<CstNode>,
}

#[async_trait]
impl CstDiscoverer for FixedDiscoverer {
    async fn discover(&self, paths: &[PathBuf]) -> Result<Vec<CstNode>, DiscoveryError> {
        if paths.is_empty() {
            return Err(DiscoveryError::Read { path: String::new(), reason: "no paths".to_string() });
        }
        Ok(self.nodes.clone())
    }
}

pub fn collaborators(kernel: Arc<EchoKernel>) -> SwarmCollaborators {
    SwarmCollaborators {
        kernel,
        tools: Arc::new(SelfMessageTools),
        bundles: Arc::new(
            StaticBundleResolver::new()
                .with("function", BundleHandle::new("function", "bundles/function"))
                .with("class", BundleHandle::new("class", "bundles/class")),
        ),
        workspaces: None,
        discoverer: None,
    }
}

pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}
