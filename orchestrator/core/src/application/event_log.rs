// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event Log
//!
//! The single writer in front of the swarm's [`EventStore`]. An append
//! assigns the next sequence, persists the record, routes it to matching
//! agents and only then publishes it to observers, all while holding the
//! sequence lock so that triggers leave in sequence order.
//!
//! A persistence failure is fatal: the event is neither routed nor
//! published, and the caller receives [`EventLogError::Persist`].

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::application::dispatch_ledger::DispatchLedger;
use crate::application::subscription_router::SubscriptionRouter;
use crate::application::trigger_queue::{TriggerQueueClosed, TriggerSender};
use crate::domain::events::{CausalContext, CorrelationId, Event, EventId, EventPayload, SwarmId};
use crate::domain::repository::{EventStore, RepositoryError};
use crate::domain::trigger::Trigger;
use crate::infrastructure::event_bus::{EventBus, EventReceiver};

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Failed to persist event #{sequence}: {source}")]
    Persist {
        sequence: u64,
        #[source]
        source: RepositoryError,
    },

    #[error("Failed to read event log: {0}")]
    Read(#[source] RepositoryError),

    #[error("Failed to update dispatch checkpoint: {0}")]
    Ledger(#[source] RepositoryError),

    #[error(transparent)]
    QueueClosed(#[from] TriggerQueueClosed),
}

pub struct EventLog {
    swarm_id: SwarmId,
    store: Arc<dyn EventStore>,
    router: Arc<SubscriptionRouter>,
    triggers: TriggerSender,
    ledger: Arc<DispatchLedger>,
    bus: EventBus,
    sequence: Mutex<u64>,
    /// Last persisted sequence, readable without the writer lock.
    committed: AtomicU64,
}

impl EventLog {
    /// Open the log, resuming sequence numbering after the last stored event.
    pub async fn open(
        swarm_id: SwarmId,
        store: Arc<dyn EventStore>,
        router: Arc<SubscriptionRouter>,
        triggers: TriggerSender,
        ledger: Arc<DispatchLedger>,
        bus: EventBus,
    ) -> Result<Self, EventLogError> {
        let last = store.last_sequence().await.map_err(EventLogError::Read)?;
        info!(swarm_id = %swarm_id, last_sequence = last, "Opened event log");
        Ok(Self {
            swarm_id,
            store,
            router,
            triggers,
            ledger,
            bus,
            sequence: Mutex::new(last),
            committed: AtomicU64::new(last),
        })
    }

    pub fn swarm_id(&self) -> &SwarmId {
        &self.swarm_id
    }

    /// Append an event. With no `cause` the event starts a new causal chain
    /// (`correlation_id = event_id`, depth 0); otherwise it continues `cause`.
    pub async fn append(
        &self,
        payload: EventPayload,
        cause: Option<CausalContext>,
    ) -> Result<Arc<Event>, EventLogError> {
        let mut sequence = self.sequence.lock().await;

        let event_id = EventId::new();
        let (correlation_id, depth) = match cause {
            Some(cause) => (cause.correlation_id, cause.depth),
            None => (CorrelationId::from(event_id), 0),
        };
        let event = Event {
            event_id,
            swarm_id: self.swarm_id.clone(),
            sequence: *sequence + 1,
            timestamp: Utc::now(),
            correlation_id,
            depth,
            payload,
        };

        if let Err(source) = self.store.append(&event).await {
            error!(
                swarm_id = %self.swarm_id,
                sequence = event.sequence,
                kind = event.kind().as_str(),
                error = %source,
                "Event log append failed"
            );
            return Err(EventLogError::Persist {
                sequence: event.sequence,
                source,
            });
        }
        *sequence = event.sequence;
        self.committed.store(event.sequence, Ordering::Release);

        let event = Arc::new(event);
        let routed = self.route(&event).await?;
        debug!(
            sequence = event.sequence,
            kind = event.kind().as_str(),
            correlation_id = %event.correlation_id,
            depth = event.depth,
            triggers = routed,
            "Appended event"
        );
        metrics::counter!("treeswarm_events_appended_total", "kind" => event.kind().as_str()).increment(1);

        self.bus.publish(event.clone());
        Ok(event)
    }

    async fn route(&self, event: &Arc<Event>) -> Result<usize, EventLogError> {
        let agents = self.router.matching_agents(event);
        self.ledger
            .register(event.sequence, agents.len())
            .await
            .map_err(EventLogError::Ledger)?;
        for agent_id in &agents {
            self.triggers.send(Trigger::new(agent_id.clone(), event.clone()))?;
        }
        Ok(agents.len())
    }

    /// Re-route every stored event after `after_sequence` without persisting
    /// it again. Returns the number of triggers enqueued.
    pub async fn replay_from(&self, after_sequence: u64) -> Result<usize, EventLogError> {
        let _sequence = self.sequence.lock().await;
        let events = self
            .store
            .read_from(after_sequence, None)
            .await
            .map_err(EventLogError::Read)?;

        let mut enqueued = 0;
        for event in events {
            enqueued += self.route(&Arc::new(event)).await?;
        }
        if enqueued > 0 {
            info!(after_sequence, triggers = enqueued, "Replayed undelivered events");
        }
        Ok(enqueued)
    }

    pub async fn read_from(&self, after_sequence: u64, limit: Option<usize>) -> Result<Vec<Event>, EventLogError> {
        self.store
            .read_from(after_sequence, limit)
            .await
            .map_err(EventLogError::Read)
    }

    pub async fn find_by_correlation(&self, correlation_id: CorrelationId) -> Result<Vec<Event>, EventLogError> {
        self.store
            .find_by_correlation(correlation_id)
            .await
            .map_err(EventLogError::Read)
    }

    pub fn last_sequence(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::trigger_queue::{trigger_channel, TriggerReceiver};
    use crate::domain::agent::AgentId;
    use crate::infrastructure::event_store::InMemoryEventStore;
    use crate::infrastructure::repositories::{InMemoryCheckpointStore, InMemorySubscriptionRepository};
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    struct FailingStore;

    #[async_trait]
    impl EventStore for FailingStore {
        async fn append(&self, _event: &Event) -> Result<(), RepositoryError> {
            Err(RepositoryError::Io("disk full".to_string()))
        }
        async fn read_from(&self, _after: u64, _limit: Option<usize>) -> Result<Vec<Event>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn find_by_correlation(&self, _id: CorrelationId) -> Result<Vec<Event>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn last_sequence(&self) -> Result<u64, RepositoryError> {
            Ok(0)
        }
    }

    async fn log_with(store: Arc<dyn EventStore>) -> (EventLog, Arc<SubscriptionRouter>, TriggerReceiver, Arc<DispatchLedger>) {
        let router = Arc::new(
            SubscriptionRouter::load(Arc::new(InMemorySubscriptionRepository::new()))
                .await
                .unwrap(),
        );
        let (tx, rx) = trigger_channel();
        let ledger = Arc::new(
            DispatchLedger::open(Arc::new(InMemoryCheckpointStore::new()))
                .await
                .unwrap(),
        );
        let log = EventLog::open(SwarmId::new("log"), store, router.clone(), tx, ledger.clone(), EventBus::new(16))
            .await
            .unwrap();
        (log, router, rx, ledger)
    }

    fn changed(path: &str) -> EventPayload {
        EventPayload::ContentChanged { path: path.to_string(), diff: None }
    }

    #[tokio::test]
    async fn test_root_events_start_their_own_chain() {
        let (log, _, _rx, _) = log_with(Arc::new(InMemoryEventStore::new())).await;
        let first = log.append(changed("a.py"), None).await.unwrap();
        let second = log.append(changed("b.py"), None).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(first.is_root());
        assert_eq!(first.depth, 0);
        assert_ne!(first.correlation_id, second.correlation_id);
    }

    #[tokio::test]
    async fn test_child_events_inherit_correlation() {
        let (log, _, _rx, _) = log_with(Arc::new(InMemoryEventStore::new())).await;
        let root = log.append(changed("a.py"), None).await.unwrap();
        let child = log
            .append(changed("b.py"), Some(CausalContext::child_of(&root)))
            .await
            .unwrap();

        assert_eq!(child.correlation_id, root.correlation_id);
        assert_eq!(child.depth, 1);
        assert!(!child.is_root());

        let chain = log.find_by_correlation(root.correlation_id).await.unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn test_append_routes_and_publishes() {
        let (log, router, mut rx, ledger) = log_with(Arc::new(InMemoryEventStore::new())).await;
        let agent = AgentId::new("aa01");
        router.install_defaults(&agent, "a.py").await.unwrap();
        let mut observer = log.subscribe();

        let event = log.append(changed("a.py"), None).await.unwrap();

        let trigger = rx.try_recv().unwrap();
        assert_eq!(trigger.agent_id, agent);
        assert_eq!(trigger.depth, 0);
        assert_eq!(trigger.event.event_id, event.event_id);
        assert!(rx.try_recv().is_none());
        assert_eq!(ledger.outstanding(), 1);

        assert_eq!(observer.recv().await.unwrap().event_id, event.event_id);
    }

    #[tokio::test]
    async fn test_persist_failure_is_not_routed_or_published() {
        let (log, router, mut rx, _) = log_with(Arc::new(FailingStore)).await;
        router.install_defaults(&AgentId::new("aa01"), "a.py").await.unwrap();
        let mut observer = log.subscribe();

        let result = log.append(changed("a.py"), None).await;
        assert!(matches!(result, Err(EventLogError::Persist { sequence: 1, .. })));
        assert!(rx.try_recv().is_none());
        assert!(observer.try_recv().is_err());
        assert_eq!(log.last_sequence(), 0);
    }

    #[tokio::test]
    async fn test_last_sequence_reads_past_an_append_in_progress() {
        let (log, _, _rx, _) = log_with(Arc::new(InMemoryEventStore::new())).await;
        log.append(changed("a.py"), None).await.unwrap();

        let _writer = log.sequence.lock().await;
        assert_eq!(log.last_sequence(), 1);
    }

    #[tokio::test]
    async fn test_replay_reroutes_without_repersisting() {
        let store = Arc::new(InMemoryEventStore::new());
        let (log, router, mut rx, _) = log_with(store.clone()).await;
        let agent = AgentId::new("aa01");
        router.install_defaults(&agent, "a.py").await.unwrap();

        log.append(changed("a.py"), None).await.unwrap();
        log.append(changed("other.py"), None).await.unwrap();
        while rx.try_recv().is_some() {}

        let enqueued = log.replay_from(0).await.unwrap();
        assert_eq!(enqueued, 1);
        assert_eq!(rx.try_recv().unwrap().agent_id, agent);
        assert_eq!(store.last_sequence().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sequence_resumes_after_reopen() {
        let store = Arc::new(InMemoryEventStore::new());
        {
            let (log, _, _rx, _) = log_with(store.clone()).await;
            log.append(changed("a.py"), None).await.unwrap();
            log.append(changed("a.py"), None).await.unwrap();
        }
        let (log, _, _rx, _) = log_with(store).await;
        let next = log.append(changed("a.py"), None).await.unwrap();
        assert_eq!(next.sequence, 3);
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_sequences() {
        let (log, _, _rx, _) = log_with(Arc::new(InMemoryEventStore::new())).await;
        let log = Arc::new(log);
        let mut handles = Vec::new();
        for i in 0..20 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(changed(&format!("{i}.py")), None).await.unwrap().sequence
            }));
        }
        let mut sequences = BTreeSet::new();
        for handle in handles {
            sequences.insert(handle.await.unwrap());
        }
        assert_eq!(sequences, (1..=20).collect::<BTreeSet<u64>>());

        let stored: Vec<u64> = log.read_from(0, None).await.unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(stored, (1..=20).collect::<Vec<u64>>());
    }
}
