// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Scheduler (Agent Runner)
//!
//! Single dispatch loop that drains the trigger queue and fans turns out to a
//! bounded pool. For each trigger, in order:
//!
//! 1. `depth > max_trigger_depth` → dropped, recorded as a cascade diagnostic.
//! 2. Agent still inside its cooldown → deferred for the remaining time.
//! 3. Pool slot, then the agent's execution lock → turn spawned. If the agent
//!    is already running, the trigger waits behind it and is released
//!    (through the cooldown) when the running turn completes.
//!
//! Turns of one agent never overlap. Triggers are settled in the
//! [`DispatchLedger`] once their turn finished or they were dropped; deferred
//! or waiting triggers at shutdown are parked and resumed by the next `run`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Concurrency, cascade-depth and cooldown enforcement

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, error, info, warn};

use crate::application::dispatch_ledger::DispatchLedger;
use crate::application::trigger_queue::{TriggerReceiver, TriggerSender};
use crate::application::turn_executor::TurnError;
use crate::domain::agent::{AgentId, TurnOutcome};
use crate::domain::events::{CorrelationId, EventId};
use crate::domain::repository::RepositoryError;
use crate::domain::swarm_config::SwarmConfig;
use crate::domain::trigger::Trigger;

const DIAGNOSTICS_CAPACITY: usize = 256;

/// Runs one agent turn. Implemented by the turn executor; tests substitute
/// their own.
///
/// Recoverable failures come back as `Ok(TurnOutcome::Failed)`. An `Err` is
/// fatal and stops the dispatch loop.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_turn(&self, trigger: &Trigger, cancel: CancellationToken) -> Result<TurnOutcome, TurnError>;
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrency: usize,
    pub max_trigger_depth: u32,
    pub trigger_cooldown: Duration,
    pub shutdown_grace: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &SwarmConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            max_trigger_depth: config.max_trigger_depth,
            trigger_cooldown: config.trigger_cooldown(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Fatal error in turn of agent {agent_id}: {source}")]
    Turn {
        agent_id: AgentId,
        #[source]
        source: TurnError,
    },

    #[error("Failed to update dispatch checkpoint: {0}")]
    Ledger(#[source] RepositoryError),

    #[error("Scheduler is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticKind {
    CascadeLimitReached { depth: u32, max_depth: u32 },
    /// `attempt` counts how many times this trigger has been pushed back.
    CooldownDeferred { remaining_ms: u64, attempt: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub agent_id: AgentId,
    pub event_id: EventId,
    pub correlation_id: CorrelationId,
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCooldown {
    pub agent_id: AgentId,
    pub remaining_ms: u64,
}

/// Live view for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub queue_depth: usize,
    /// Triggers waiting on a cooldown or behind a running turn of their agent.
    pub deferred: usize,
    pub in_flight: usize,
    pub max_concurrency: usize,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub deferrals: u64,
    pub cooldowns: Vec<AgentCooldown>,
    pub recent_diagnostics: Vec<Diagnostic>,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    deferrals: AtomicU64,
}

pub struct Scheduler {
    settings: SchedulerSettings,
    runner: Arc<dyn TurnRunner>,
    ledger: Arc<DispatchLedger>,
    queue: TriggerSender,
    pool: Arc<Semaphore>,
    agent_locks: DashMap<AgentId, Arc<tokio::sync::Mutex<()>>>,
    last_dispatch: DashMap<AgentId, Instant>,
    running: AtomicBool,
    in_flight: AtomicUsize,
    deferred: AtomicUsize,
    counters: Counters,
    diagnostics: Mutex<VecDeque<Diagnostic>>,
    parked: Mutex<Vec<Trigger>>,
}

enum Step {
    Shutdown,
    Closed,
    Joined(Result<(TaskId, Result<TurnOutcome, TurnError>), JoinError>),
    Expired(u64),
    Received(Trigger),
}

/// Per-run bookkeeping owned by the dispatch loop.
struct DispatchState {
    delayed: DelayQueue<u64>,
    delayed_triggers: HashMap<u64, Trigger>,
    next_slot: u64,
    waiting: HashMap<AgentId, VecDeque<Trigger>>,
    turns: JoinSet<Result<TurnOutcome, TurnError>>,
    tasks: HashMap<TaskId, (AgentId, u64)>,
    force_cancel: CancellationToken,
}

impl DispatchState {
    fn defer(&mut self, trigger: Trigger, delay: Duration) {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.delayed.insert(slot, delay);
        self.delayed_triggers.insert(slot, trigger);
    }

    fn deferred_len(&self) -> usize {
        self.delayed_triggers.len() + self.waiting.values().map(VecDeque::len).sum::<usize>()
    }
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        runner: Arc<dyn TurnRunner>,
        ledger: Arc<DispatchLedger>,
        queue: TriggerSender,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        Self {
            settings,
            runner,
            ledger,
            queue,
            pool,
            agent_locks: DashMap::new(),
            last_dispatch: DashMap::new(),
            running: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            deferred: AtomicUsize::new(0),
            counters: Counters::default(),
            diagnostics: Mutex::new(VecDeque::with_capacity(DIAGNOSTICS_CAPACITY)),
            parked: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Run the dispatch loop until `shutdown` is cancelled or a fatal error
    /// occurs. The receiver is handed back so the loop can be restarted.
    pub async fn run(
        self: Arc<Self>,
        mut triggers: TriggerReceiver,
        shutdown: CancellationToken,
    ) -> (TriggerReceiver, Result<(), SchedulerError>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return (triggers, Err(SchedulerError::AlreadyRunning));
        }
        info!(
            max_concurrency = self.settings.max_concurrency,
            max_trigger_depth = self.settings.max_trigger_depth,
            cooldown_ms = self.settings.trigger_cooldown.as_millis() as u64,
            "Scheduler started"
        );

        let mut state = DispatchState {
            delayed: DelayQueue::new(),
            delayed_triggers: HashMap::new(),
            next_slot: 0,
            waiting: HashMap::new(),
            turns: JoinSet::new(),
            tasks: HashMap::new(),
            force_cancel: CancellationToken::new(),
        };
        let parked = std::mem::take(&mut *self.parked.lock());
        for trigger in parked {
            let delay = self.cooldown_remaining(&trigger.agent_id).unwrap_or(Duration::ZERO);
            state.defer(trigger, delay);
        }

        let mut outcome = Ok(());
        loop {
            self.deferred.store(state.deferred_len(), Ordering::SeqCst);

            let step = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Step::Shutdown,
                Some(joined) = state.turns.join_next_with_id(), if !state.turns.is_empty() => Step::Joined(joined),
                Some(expired) = state.delayed.next(), if !state.delayed.is_empty() => {
                    Step::Expired(expired.into_inner())
                }
                received = triggers.recv() => match received {
                    Some(trigger) => Step::Received(trigger),
                    None => Step::Closed,
                },
            };

            let result = match step {
                Step::Shutdown => break,
                Step::Closed => {
                    debug!("Trigger queue closed");
                    break;
                }
                Step::Joined(joined) => self.on_joined(&mut state, joined).await,
                Step::Expired(slot) => match state.delayed_triggers.remove(&slot) {
                    Some(trigger) => self.dispatch(&mut state, trigger, &shutdown).await,
                    None => Ok(()),
                },
                Step::Received(trigger) => self.dispatch(&mut state, trigger, &shutdown).await,
            };

            if let Err(e) = result {
                error!(error = %e, "Scheduler stopping on fatal error");
                state.force_cancel.cancel();
                outcome = Err(e);
                break;
            }
        }

        let drained = self.drain(&mut state).await;
        if outcome.is_ok() {
            outcome = drained;
        }
        self.park(&mut state);
        self.deferred.store(self.parked.lock().len(), Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
        (triggers, outcome)
    }

    async fn dispatch(
        self: &Arc<Self>,
        state: &mut DispatchState,
        trigger: Trigger,
        shutdown: &CancellationToken,
    ) -> Result<(), SchedulerError> {
        if trigger.depth > self.settings.max_trigger_depth {
            warn!(
                agent_id = %trigger.agent_id,
                depth = trigger.depth,
                max_depth = self.settings.max_trigger_depth,
                correlation_id = %trigger.event.correlation_id,
                "Cascade limit reached; dropping trigger"
            );
            self.record(&trigger, DiagnosticKind::CascadeLimitReached {
                depth: trigger.depth,
                max_depth: self.settings.max_trigger_depth,
            });
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("treeswarm_triggers_dropped_total", "reason" => "cascade_limit").increment(1);
            return self.ledger.settle(trigger.sequence()).await.map_err(SchedulerError::Ledger);
        }

        if let Some(remaining) = self.cooldown_remaining(&trigger.agent_id) {
            debug!(
                agent_id = %trigger.agent_id,
                remaining_ms = remaining.as_millis() as u64,
                "Agent cooling down; deferring trigger"
            );
            let mut trigger = trigger;
            trigger.deferrals += 1;
            self.record(&trigger, DiagnosticKind::CooldownDeferred {
                remaining_ms: remaining.as_millis() as u64,
                attempt: trigger.deferrals,
            });
            self.counters.deferrals.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("treeswarm_triggers_deferred_total").increment(1);
            state.defer(trigger, remaining);
            return Ok(());
        }

        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                state.defer(trigger, Duration::ZERO);
                return Ok(());
            }
            permit = self.pool.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    state.defer(trigger, Duration::ZERO);
                    return Ok(());
                }
            },
        };

        let lock = self
            .agent_locks
            .entry(trigger.agent_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = match lock.try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(agent_id = %trigger.agent_id, "Agent busy; trigger waits for its turn to finish");
                state
                    .waiting
                    .entry(trigger.agent_id.clone())
                    .or_default()
                    .push_back(trigger);
                return Ok(());
            }
        };

        self.spawn_turn(state, trigger, permit, guard);
        Ok(())
    }

    fn spawn_turn(
        self: &Arc<Self>,
        state: &mut DispatchState,
        trigger: Trigger,
        permit: OwnedSemaphorePermit,
        guard: OwnedMutexGuard<()>,
    ) {
        let agent_id = trigger.agent_id.clone();
        let sequence = trigger.sequence();
        info!(
            agent_id = %agent_id,
            sequence,
            depth = trigger.depth,
            correlation_id = %trigger.event.correlation_id,
            "Dispatching turn"
        );
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("treeswarm_turns_dispatched_total").increment(1);

        let scheduler = self.clone();
        let cancel = state.force_cancel.child_token();
        let handle = state.turns.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            scheduler.in_flight.fetch_add(1, Ordering::SeqCst);
            metrics::gauge!("treeswarm_turns_in_flight").increment(1.0);

            let result = scheduler.runner.run_turn(&trigger, cancel).await;

            scheduler.last_dispatch.insert(trigger.agent_id.clone(), Instant::now());
            scheduler.in_flight.fetch_sub(1, Ordering::SeqCst);
            metrics::gauge!("treeswarm_turns_in_flight").decrement(1.0);
            result
        });
        state.tasks.insert(handle.id(), (agent_id, sequence));
    }

    async fn on_joined(
        &self,
        state: &mut DispatchState,
        joined: Result<(TaskId, Result<TurnOutcome, TurnError>), JoinError>,
    ) -> Result<(), SchedulerError> {
        let (task_id, result) = match joined {
            Ok((task_id, result)) => (task_id, Ok(result)),
            Err(join_error) => (join_error.id(), Err(join_error)),
        };
        let Some((agent_id, sequence)) = state.tasks.remove(&task_id) else {
            return Ok(());
        };
        self.release_waiting(state, &agent_id);

        match result {
            Ok(Ok(TurnOutcome::Succeeded)) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ok(TurnOutcome::Failed { reason })) => {
                warn!(agent_id = %agent_id, sequence, reason = %reason, "Turn failed");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("treeswarm_turns_failed_total").increment(1);
            }
            Ok(Err(source)) => return Err(SchedulerError::Turn { agent_id, source }),
            // Aborted turns stay unsettled and are replayed on the next open.
            Err(join_error) if join_error.is_cancelled() => {
                error!(agent_id = %agent_id, sequence, "Turn aborted");
                return Ok(());
            }
            Err(join_error) => {
                error!(agent_id = %agent_id, sequence, error = %join_error, "Turn task panicked");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("treeswarm_turns_failed_total").increment(1);
            }
        }

        self.ledger.settle(sequence).await.map_err(SchedulerError::Ledger)
    }

    /// The next trigger queued behind `agent_id` goes through the cooldown.
    fn release_waiting(&self, state: &mut DispatchState, agent_id: &AgentId) {
        let next = match state.waiting.get_mut(agent_id) {
            Some(queue) => queue.pop_front(),
            None => None,
        };
        if state.waiting.get(agent_id).is_some_and(VecDeque::is_empty) {
            state.waiting.remove(agent_id);
        }
        if let Some(trigger) = next {
            state.defer(trigger, self.settings.trigger_cooldown);
        }
    }

    /// Wait for in-flight turns: the grace period, then cooperative
    /// cancellation, then another grace period before aborting.
    async fn drain(&self, state: &mut DispatchState) -> Result<(), SchedulerError> {
        let mut outcome = Ok(());
        if state.turns.is_empty() {
            return outcome;
        }
        info!(in_flight = state.turns.len(), "Waiting for in-flight turns");

        let mut deadline = Instant::now() + self.settings.shutdown_grace;
        let mut aborted = false;
        while !state.turns.is_empty() {
            tokio::select! {
                Some(joined) = state.turns.join_next_with_id() => {
                    if let Err(e) = self.on_joined(state, joined).await {
                        error!(error = %e, "Fatal error while draining turns");
                        if outcome.is_ok() {
                            outcome = Err(e);
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if !state.force_cancel.is_cancelled() {
                        warn!(in_flight = state.turns.len(), "Grace period elapsed; cancelling in-flight turns");
                        state.force_cancel.cancel();
                        deadline = Instant::now() + self.settings.shutdown_grace;
                    } else if !aborted {
                        error!(in_flight = state.turns.len(), "Turns ignored cancellation; aborting");
                        state.turns.abort_all();
                        aborted = true;
                    }
                }
            }
        }
        outcome
    }

    fn park(&self, state: &mut DispatchState) {
        let mut parked = self.parked.lock();
        state.delayed.clear();
        let mut delayed: Vec<(u64, Trigger)> = state.delayed_triggers.drain().collect();
        delayed.sort_by_key(|(slot, _)| *slot);
        parked.extend(delayed.into_iter().map(|(_, trigger)| trigger));
        for (_, queue) in state.waiting.drain() {
            parked.extend(queue);
        }
        if !parked.is_empty() {
            info!(parked = parked.len(), "Parked deferred triggers until next start");
        }
    }

    fn cooldown_remaining(&self, agent_id: &AgentId) -> Option<Duration> {
        let last = *self.last_dispatch.get(agent_id)?;
        self.remaining_since(last)
    }

    fn remaining_since(&self, last: Instant) -> Option<Duration> {
        let cooldown = self.settings.trigger_cooldown;
        let elapsed = last.elapsed();
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    fn record(&self, trigger: &Trigger, kind: DiagnosticKind) {
        let mut diagnostics = self.diagnostics.lock();
        if diagnostics.len() == DIAGNOSTICS_CAPACITY {
            diagnostics.pop_front();
        }
        diagnostics.push_back(Diagnostic {
            kind,
            agent_id: trigger.agent_id.clone(),
            event_id: trigger.event.event_id,
            correlation_id: trigger.event.correlation_id,
            sequence: trigger.sequence(),
            recorded_at: Utc::now(),
        });
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().iter().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        let mut cooldowns: Vec<AgentCooldown> = self
            .last_dispatch
            .iter()
            .filter_map(|entry| {
                self.remaining_since(*entry.value()).map(|remaining| AgentCooldown {
                    agent_id: entry.key().clone(),
                    remaining_ms: remaining.as_millis() as u64,
                })
            })
            .collect();
        cooldowns.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        SchedulerStatus {
            running: self.is_running(),
            queue_depth: self.queue.depth(),
            deferred: self.deferred.load(Ordering::SeqCst),
            in_flight: self.in_flight(),
            max_concurrency: self.settings.max_concurrency,
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            deferrals: self.counters.deferrals.load(Ordering::Relaxed),
            cooldowns,
            recent_diagnostics: self.diagnostics(),
        }
    }
}
