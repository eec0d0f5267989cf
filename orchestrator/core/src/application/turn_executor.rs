// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Turn Executor
//!
//! Runs one agent turn: load state, resolve the bundle, open the workspace,
//! hand the kernel the turn input and tool schemas, then fold the result
//! back into the agent's state log and the event log.
//!
//! Kernel, tool, workspace, timeout and cancellation failures are recovered:
//! the turn is recorded as failed and an `agent_error` event is appended.
//! Storage failures and a missing agent state are returned as [`TurnError`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestration shell around the external agent kernel

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::bundle_registry::BundleRegistry;
use crate::application::event_log::{EventLog, EventLogError};
use crate::application::externals::TurnExternals;
use crate::application::scheduler::TurnRunner;
use crate::application::subscription_router::SubscriptionRouter;
use crate::domain::agent::{AgentId, AgentState, ChatTurn, TurnOutcome};
use crate::domain::bundle::{BundleError, BundleHandle};
use crate::domain::events::{CausalContext, EventPayload};
use crate::domain::kernel::{AgentKernel, KernelMessage, KernelRequest, KernelResult, ToolCall, ToolDispatcher, ToolResult};
use crate::domain::repository::{AgentStateRepository, RepositoryError, SwarmRegistry};
use crate::domain::swarm_config::SwarmConfig;
use crate::domain::tools::{SwarmExternals, ToolBackend, ToolContext};
use crate::domain::trigger::Trigger;
use crate::domain::workspace::WorkspaceService;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("No persisted state for agent {0}")]
    MissingState(AgentId),

    #[error("Agent state store failure: {0}")]
    State(#[source] RepositoryError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("Event log failure during tool execution: {0}")]
    ToolEventLog(String),
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub chat_history_limit: usize,
    pub context_history_turns: usize,
    pub max_kernel_turns: u32,
    pub turn_timeout: Duration,
}

impl TurnSettings {
    pub fn from_config(config: &SwarmConfig) -> Self {
        Self {
            chat_history_limit: config.chat_history_limit,
            context_history_turns: config.context_history_turns,
            max_kernel_turns: config.max_kernel_turns,
            turn_timeout: config.turn_timeout(),
        }
    }
}

/// Everything a turn reaches: the swarm's own components and the external
/// collaborators.
#[derive(Clone)]
pub struct TurnServices {
    pub event_log: Arc<EventLog>,
    pub router: Arc<SubscriptionRouter>,
    pub registry: Arc<dyn SwarmRegistry>,
    pub states: Arc<dyn AgentStateRepository>,
    pub bundles: Arc<BundleRegistry>,
    pub workspaces: Arc<dyn WorkspaceService>,
    pub tools: Arc<dyn ToolBackend>,
    pub kernel: Arc<dyn AgentKernel>,
}

pub struct TurnExecutor {
    settings: TurnSettings,
    services: TurnServices,
}

/// Kernel output reduced to what the history records.
struct TurnReport {
    prompt: String,
    response: String,
    tool_calls: usize,
    outcome: TurnOutcome,
}

impl TurnExecutor {
    pub fn new(settings: TurnSettings, services: TurnServices) -> Self {
        Self { settings, services }
    }

    pub async fn run_agent(&self, trigger: &Trigger, cancel: CancellationToken) -> Result<TurnOutcome, TurnError> {
        let agent_id = &trigger.agent_id;
        let mut state = self
            .services
            .states
            .load(agent_id)
            .await
            .map_err(TurnError::State)?
            .ok_or_else(|| TurnError::MissingState(agent_id.clone()))?;

        let cause = CausalContext::child_of(&trigger.event);
        let trigger_event_id = trigger.event.event_id;
        self.services
            .event_log
            .append(
                EventPayload::AgentStart {
                    agent_id: agent_id.clone(),
                    trigger_event_id,
                },
                Some(cause),
            )
            .await?;

        let bundle = self.services.bundles.resolve(&state.node_type)?.clone();
        let externals = Arc::new(TurnExternals::new(
            agent_id.clone(),
            state.file_path.clone(),
            cause,
            self.services.event_log.clone(),
            self.services.router.clone(),
            self.services.registry.clone(),
        ));

        let report = self.execute(trigger, &state, bundle, externals.clone(), cancel).await;
        if let TurnOutcome::Failed { reason } = &report.outcome {
            warn!(agent_id = %agent_id, sequence = trigger.sequence(), reason = %reason, "Turn failed");
        }

        state.custom_subscriptions.extend(externals.registered());
        let unregistered = externals.unregistered();
        state.custom_subscriptions.retain(|id| !unregistered.contains(id));
        state.record_turn(
            ChatTurn {
                trigger_event_id,
                prompt: report.prompt,
                response: report.response.clone(),
                tool_calls: report.tool_calls,
                outcome: report.outcome.clone(),
                recorded_at: Utc::now(),
            },
            self.settings.chat_history_limit,
        );
        self.services.states.save(&state).await.map_err(TurnError::State)?;

        if let Some(failure) = externals.take_fatal() {
            return Err(TurnError::ToolEventLog(failure));
        }

        let payload = match &report.outcome {
            TurnOutcome::Succeeded => EventPayload::AgentComplete {
                agent_id: agent_id.clone(),
                trigger_event_id,
                summary: report.response,
            },
            TurnOutcome::Failed { reason } => EventPayload::AgentError {
                agent_id: agent_id.clone(),
                trigger_event_id,
                error: reason.clone(),
            },
        };
        self.services.event_log.append(payload, Some(cause)).await?;

        info!(
            agent_id = %agent_id,
            success = report.outcome.is_success(),
            tool_calls = report.tool_calls,
            turn_count = state.turn_count,
            "Turn finished"
        );
        Ok(report.outcome)
    }

    /// The recoverable part of a turn. Never fails: errors become a failed
    /// report. The turn deadline and the shutdown token cover every external
    /// call, not only the kernel.
    async fn execute(
        &self,
        trigger: &Trigger,
        state: &AgentState,
        bundle: BundleHandle,
        externals: Arc<TurnExternals>,
        cancel: CancellationToken,
    ) -> TurnReport {
        let deadline = self.settings.turn_timeout;
        let mut prompt = String::new();
        let result: Result<KernelResult, String> = tokio::select! {
            _ = cancel.cancelled() => Err("turn cancelled during shutdown".to_string()),
            outcome = tokio::time::timeout(deadline, self.attempt(trigger, state, bundle, externals, &mut prompt)) => {
                outcome.unwrap_or_else(|_| Err(format!("turn timed out after {deadline:?}")))
            }
        };

        match result {
            Ok(result) => TurnReport {
                prompt,
                tool_calls: result.tool_calls.len(),
                response: result.final_message,
                outcome: TurnOutcome::Succeeded,
            },
            Err(reason) => TurnReport {
                prompt,
                response: String::new(),
                tool_calls: 0,
                outcome: TurnOutcome::Failed { reason },
            },
        }
    }

    /// Workspace, prompt, tool discovery and the kernel run. `prompt` is
    /// filled in as soon as it is rendered so a failed turn still records it.
    async fn attempt(
        &self,
        trigger: &Trigger,
        state: &AgentState,
        bundle: BundleHandle,
        externals: Arc<TurnExternals>,
        prompt: &mut String,
    ) -> Result<KernelResult, String> {
        let workspace = self
            .services
            .workspaces
            .open(&state.agent_id)
            .await
            .map_err(|e| format!("workspace unavailable: {e}"))?;

        let file_content = match workspace.read_file(&state.file_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(agent_id = %state.agent_id, file_path = %state.file_path, error = %e, "Could not read target file");
                String::new()
            }
        };
        *prompt = render_prompt(state, trigger, &file_content);

        let schemas = self
            .services
            .tools
            .discover_tools(&bundle)
            .await
            .map_err(|e| format!("tool discovery failed: {e}"))?;
        debug!(agent_id = %state.agent_id, bundle = %bundle.name, tools = schemas.len(), "Tools discovered");

        let request = KernelRequest {
            messages: self.build_messages(state, prompt),
            tools: schemas,
            max_turns: self.settings.max_kernel_turns,
        };
        let dispatcher = ToolBridge {
            backend: self.services.tools.clone(),
            context: ToolContext {
                swarm_id: self.services.event_log.swarm_id().clone(),
                agent_id: state.agent_id.clone(),
                bundle,
                workspace,
                externals: externals as Arc<dyn SwarmExternals>,
            },
        };

        self.services
            .kernel
            .run(request, &dispatcher)
            .await
            .map_err(|e| format!("kernel failed: {e}"))
    }

    fn build_messages(&self, state: &AgentState, prompt: &str) -> Vec<KernelMessage> {
        let mut messages = vec![KernelMessage::system(format!(
            "You are the agent responsible for the {} `{}` in {} (lines {}-{}). \
             Decide how to react to the triggering event using the available tools.",
            state.node_type, state.full_name, state.file_path, state.range.start_line, state.range.end_line
        ))];
        for turn in state.recent_turns(self.settings.context_history_turns) {
            messages.push(KernelMessage::user(turn.prompt.clone()));
            messages.push(KernelMessage::assistant(turn.response.clone()));
        }
        messages.push(KernelMessage::user(prompt.to_string()));
        messages
    }
}

fn render_prompt(state: &AgentState, trigger: &Trigger, file_content: &str) -> String {
    let event = serde_json::to_string_pretty(trigger.event.as_ref())
        .unwrap_or_else(|_| format!("{:?}", trigger.event.payload));
    format!(
        "## File: {}\n```\n{}\n```\n\n## Triggering event\n```json\n{}\n```",
        state.file_path, file_content, event
    )
}

#[async_trait]
impl TurnRunner for TurnExecutor {
    async fn run_turn(&self, trigger: &Trigger, cancel: CancellationToken) -> Result<TurnOutcome, TurnError> {
        self.run_agent(trigger, cancel).await
    }
}

/// Routes the kernel's tool calls to the tool backend with this turn's context.
struct ToolBridge {
    backend: Arc<dyn ToolBackend>,
    context: ToolContext,
}

#[async_trait]
impl ToolDispatcher for ToolBridge {
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        match self.backend.execute(&call.name, call.arguments.clone(), &self.context).await {
            Ok(output) => ToolResult {
                call_id: call.call_id.clone(),
                output: output.output,
                is_error: output.is_error,
            },
            Err(e) => ToolResult {
                call_id: call.call_id.clone(),
                output: e.to_string(),
                is_error: true,
            },
        }
    }
}
