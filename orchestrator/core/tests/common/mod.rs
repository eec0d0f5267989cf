// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the core integration tests: an in-memory swarm wired
//! the way the runtime wires it, and scripted stand-ins for the external
//! collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use treeswarm_core::application::{
    trigger_channel, DispatchLedger, EventLog, SubscriptionRouter, TriggerReceiver, TurnError, TurnRunner,
};
use treeswarm_core::domain::agent::{AgentId, AgentMetadata, AgentState, AgentStatus, SourceRange, TurnOutcome};
use treeswarm_core::domain::bundle::BundleHandle;
use treeswarm_core::domain::events::SwarmId;
use treeswarm_core::domain::kernel::{
    AgentKernel, KernelError, KernelRequest, KernelResult, TerminationReason, ToolCall, ToolDispatcher, ToolResult,
};
use treeswarm_core::domain::repository::{AgentStateRepository, SwarmRegistry};
use treeswarm_core::domain::subscription::SubscriptionPattern;
use treeswarm_core::domain::tools::{BroadcastScope, ToolBackend, ToolContext, ToolError, ToolOutput, ToolSchema};
use treeswarm_core::domain::trigger::Trigger;
use treeswarm_core::domain::workspace::{DirEntry, EntryType, Workspace, WorkspaceError, WorkspaceService};
use treeswarm_core::infrastructure::event_bus::EventBus;
use treeswarm_core::infrastructure::event_store::InMemoryEventStore;
use treeswarm_core::infrastructure::repositories::{
    InMemoryAgentStateRepository, InMemoryCheckpointStore, InMemorySubscriptionRepository, InMemorySwarmRegistry,
};

pub struct Harness {
    pub event_log: Arc<EventLog>,
    pub router: Arc<SubscriptionRouter>,
    pub registry: Arc<InMemorySwarmRegistry>,
    pub states: Arc<InMemoryAgentStateRepository>,
    pub ledger: Arc<DispatchLedger>,
    pub triggers: Option<TriggerReceiver>,
    pub sender: treeswarm_core::application::TriggerSender,
}

pub async fn harness() -> Harness {
    let router = Arc::new(
        SubscriptionRouter::load(Arc::new(InMemorySubscriptionRepository::new()))
            .await
            .unwrap(),
    );
    let ledger = Arc::new(DispatchLedger::open(Arc::new(InMemoryCheckpointStore::new())).await.unwrap());
    let (sender, receiver) = trigger_channel();
    let event_log = Arc::new(
        EventLog::open(
            SwarmId::new("test"),
            Arc::new(InMemoryEventStore::new()),
            router.clone(),
            sender.clone(),
            ledger.clone(),
            EventBus::new(64),
        )
        .await
        .unwrap(),
    );
    Harness {
        event_log,
        router,
        registry: Arc::new(InMemorySwarmRegistry::new()),
        states: Arc::new(InMemoryAgentStateRepository::new()),
        ledger,
        triggers: Some(receiver),
        sender,
    }
}

pub fn metadata(name: &str, file_path: &str, node_type: &str) -> AgentMetadata {
    let range = SourceRange::new(1, 10);
    AgentMetadata {
        agent_id: AgentId::for_node(file_path, node_type, name, &range),
        node_type: node_type.to_string(),
        name: name.to_string(),
        full_name: format!("{file_path}::{name}"),
        file_path: file_path.to_string(),
        parent_id: None,
        range,
        status: AgentStatus::Active,
        registered_at: Utc::now(),
    }
}

impl Harness {
    /// Register an active agent with its state and default subscriptions.
    pub async fn add_agent(&self, name: &str, file_path: &str) -> AgentId {
        let metadata = metadata(name, file_path, "function");
        self.registry.save(&metadata).await.unwrap();
        self.states.save(&AgentState::from_metadata(&metadata)).await.unwrap();
        self.router.install_defaults(&metadata.agent_id, file_path).await.unwrap();
        metadata.agent_id
    }

    pub fn take_triggers(&mut self) -> TriggerReceiver {
        self.triggers.take().unwrap()
    }
}

pub fn drain(receiver: &mut TriggerReceiver) -> Vec<Trigger> {
    let mut triggers = Vec::new();
    while let Some(trigger) = receiver.try_recv() {
        triggers.push(trigger);
    }
    triggers
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub agent_id: AgentId,
    pub sequence: u64,
    pub started: Instant,
    pub finished: Instant,
}

/// Turn runner that sleeps for a fixed time and records every turn.
pub struct RecordingRunner {
    pub delay: Duration,
    pub records: Mutex<Vec<TurnRecord>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
    active_agents: Mutex<BTreeSet<AgentId>>,
    pub overlaps: AtomicUsize,
    /// Wait for cancellation instead of sleeping.
    pub until_cancelled: bool,
    pub fail_with_missing_state: bool,
}

impl RecordingRunner {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            records: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            active_agents: Mutex::new(BTreeSet::new()),
            overlaps: AtomicUsize::new(0),
            until_cancelled: false,
            fail_with_missing_state: false,
        }
    }

    pub fn turns(&self) -> usize {
        self.records.lock().len()
    }

    pub fn records_for(&self, agent_id: &AgentId) -> Vec<TurnRecord> {
        self.records.lock().iter().filter(|r| &r.agent_id == agent_id).cloned().collect()
    }
}

#[async_trait]
impl TurnRunner for RecordingRunner {
    async fn run_turn(&self, trigger: &Trigger, cancel: CancellationToken) -> Result<TurnOutcome, TurnError> {
        if self.fail_with_missing_state {
            return Err(TurnError::MissingState(trigger.agent_id.clone()));
        }
        if !self.active_agents.lock().insert(trigger.agent_id.clone()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        let started = Instant::now();

        let outcome = if self.until_cancelled {
            cancel.cancelled().await;
            TurnOutcome::Failed { reason: "turn cancelled during shutdown".to_string() }
        } else {
            tokio::time::sleep(self.delay).await;
            TurnOutcome::Succeeded
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.active_agents.lock().remove(&trigger.agent_id);
        self.records.lock().push(TurnRecord {
            agent_id: trigger.agent_id.clone(),
            sequence: trigger.sequence(),
            started,
            finished: Instant::now(),
        });
        Ok(outcome)
    }
}

/// One scripted kernel run: tool calls issued in order, then the reply.
#[derive(Debug, Clone)]
pub struct KernelStep {
    pub tool_calls: Vec<ToolCall>,
    pub reply: Result<String, String>,
    pub hang: bool,
}

impl KernelStep {
    pub fn reply(text: &str) -> Self {
        Self { tool_calls: Vec::new(), reply: Ok(text.to_string()), hang: false }
    }

    pub fn fail(reason: &str) -> Self {
        Self { tool_calls: Vec::new(), reply: Err(reason.to_string()), hang: false }
    }

    pub fn hang() -> Self {
        Self { tool_calls: Vec::new(), reply: Ok(String::new()), hang: true }
    }

    pub fn call(mut self, name: &str, arguments: serde_json::Value) -> Self {
        let call_id = format!("call-{}", self.tool_calls.len() + 1);
        self.tool_calls.push(ToolCall { call_id, name: name.to_string(), arguments });
        self
    }
}

/// Kernel that replays a script; once the script runs out it keeps
/// repeating `fallback`.
pub struct ScriptedKernel {
    script: Mutex<VecDeque<KernelStep>>,
    fallback: KernelStep,
    pub requests: Mutex<Vec<KernelRequest>>,
    pub results: Mutex<Vec<Vec<ToolResult>>>,
}

impl ScriptedKernel {
    pub fn new(script: Vec<KernelStep>) -> Self {
        Self::with_fallback(script, KernelStep::reply("done"))
    }

    pub fn with_fallback(script: Vec<KernelStep>, fallback: KernelStep) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl AgentKernel for ScriptedKernel {
    async fn run(&self, request: KernelRequest, tools: &dyn ToolDispatcher) -> Result<KernelResult, KernelError> {
        self.requests.lock().push(request);
        let step = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
        if step.hang {
            std::future::pending::<()>().await;
        }

        let mut results = Vec::new();
        for call in &step.tool_calls {
            results.push(tools.dispatch(call).await);
        }
        self.results.lock().push(results.clone());

        match step.reply {
            Ok(final_message) => Ok(KernelResult {
                final_message,
                termination_reason: if step.tool_calls.is_empty() {
                    TerminationReason::NoToolCalls
                } else {
                    TerminationReason::FinalMessage
                },
                tool_calls: step.tool_calls,
                tool_results: results,
            }),
            Err(reason) => Err(KernelError::Model(reason)),
        }
    }
}

/// Tool backend exposing the swarm externals and the workspace as tools.
#[derive(Default)]
pub struct SwarmTools {
    pub fail_discovery: bool,
    pub hang_discovery: bool,
}

#[async_trait]
impl ToolBackend for SwarmTools {
    async fn discover_tools(&self, bundle: &BundleHandle) -> Result<Vec<ToolSchema>, ToolError> {
        if self.hang_discovery {
            std::future::pending::<()>().await;
        }
        if self.fail_discovery {
            return Err(ToolError::Discovery { bundle: bundle.name.clone(), reason: "bundle missing".to_string() });
        }
        Ok(["send_message", "broadcast", "subscribe", "write_file"]
            .into_iter()
            .map(|name| ToolSchema {
                name: name.to_string(),
                description: format!("{name} tool"),
                parameters: serde_json::json!({"type": "object"}),
            })
            .collect())
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let arg = |key: &str| {
            arguments
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidArguments { tool: tool_name.to_string(), reason: format!("missing {key}") })
        };
        match tool_name {
            "send_message" => {
                let id = context
                    .externals
                    .send_message(AgentId::new(arg("to")?), arg("content")?, BTreeSet::new())
                    .await?;
                Ok(ToolOutput::ok(id.to_string()))
            }
            "broadcast" => {
                let scope: BroadcastScope = arg("scope")?.parse()?;
                let count = context.externals.broadcast(scope, arg("content")?).await?;
                Ok(ToolOutput::ok(count.to_string()))
            }
            "subscribe" => {
                let pattern = SubscriptionPattern { path_glob: Some(arg("path_glob")?), ..Default::default() };
                let id = context.externals.register_subscription(pattern).await?;
                Ok(ToolOutput::ok(id.to_string()))
            }
            "write_file" => {
                context
                    .workspace
                    .write_file(&arg("path")?, &arg("content")?)
                    .await
                    .map_err(|e| ToolError::Execution(e.to_string()))?;
                Ok(ToolOutput::ok("written"))
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

/// Shared in-memory file tree.
#[derive(Default, Clone)]
pub struct MemoryWorkspace {
    pub files: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryWorkspace {
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files.lock().insert(path.to_string(), content.to_string());
        self
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    async fn read_file(&self, path: &str) -> Result<String, WorkspaceError> {
        self.files.lock().get(path).cloned().ok_or_else(|| WorkspaceError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), WorkspaceError> {
        self.files.lock().insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn list_dir(&self, _path: &str) -> Result<Vec<DirEntry>, WorkspaceError> {
        Ok(self
            .files
            .lock()
            .keys()
            .map(|name| DirEntry { name: name.clone(), entry_type: EntryType::File })
            .collect())
    }
}

#[async_trait]
impl WorkspaceService for MemoryWorkspace {
    async fn open(&self, _agent_id: &AgentId) -> Result<Arc<dyn Workspace>, WorkspaceError> {
        Ok(Arc::new(self.clone()))
    }
}
