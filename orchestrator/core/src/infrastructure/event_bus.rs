// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Fan-out of persisted swarm events
//
// The Event Log publishes every event here after it has been persisted and
// routed. Observers (dashboards, tests, the CLI) subscribe without touching
// the log itself. Slow receivers lose the oldest events and are told how many.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::agent::AgentId;
use crate::domain::events::{CorrelationId, Event, EventKind};

/// Event bus for publishing and subscribing to persisted events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Arc<Event>>>,
}

impl EventBus {
    /// Capacity determines how many events are buffered per receiver before
    /// the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    pub fn publish(&self, event: Arc<Event>) {
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of one cascade only
    pub fn subscribe_correlation(&self, correlation_id: CorrelationId) -> FilteredEventReceiver {
        FilteredEventReceiver {
            receiver: self.sender.subscribe(),
            filter: EventFilter::Correlation(correlation_id),
        }
    }

    /// Subscribe to start/complete/error events of one agent
    pub fn subscribe_agent(&self, agent_id: AgentId) -> FilteredEventReceiver {
        FilteredEventReceiver {
            receiver: self.sender.subscribe(),
            filter: EventFilter::Agent(agent_id),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all events
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<Event>>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<Arc<Event>, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Arc<Event>, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

enum EventFilter {
    Correlation(CorrelationId),
    Agent(AgentId),
}

impl EventFilter {
    fn accepts(&self, event: &Event) -> bool {
        match self {
            EventFilter::Correlation(id) => event.correlation_id == *id,
            EventFilter::Agent(agent_id) => {
                matches!(
                    event.kind(),
                    EventKind::AgentStart | EventKind::AgentComplete | EventKind::AgentError
                ) && event.payload.source_agent() == Some(agent_id)
            }
        }
    }
}

/// Receiver that skips events outside its filter
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<Arc<Event>>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub async fn recv(&mut self) -> Result<Arc<Event>, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if self.filter.accepts(&event) {
                return Ok(event);
            }
        }
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
