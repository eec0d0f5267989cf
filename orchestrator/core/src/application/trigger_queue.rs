// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dispatch queue between the Event Log and the Scheduler.
//!
//! Unbounded so that routing never blocks an append; the depth is tracked
//! alongside the channel for status reporting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::trigger::Trigger;

#[derive(Debug, Error)]
#[error("Trigger queue closed; trigger for agent {0} not enqueued")]
pub struct TriggerQueueClosed(pub String);

pub fn trigger_channel() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        TriggerSender { tx, depth: depth.clone() },
        TriggerReceiver { rx, depth },
    )
}

#[derive(Clone)]
pub struct TriggerSender {
    tx: mpsc::UnboundedSender<Trigger>,
    depth: Arc<AtomicUsize>,
}

impl TriggerSender {
    pub fn send(&self, trigger: Trigger) -> Result<(), TriggerQueueClosed> {
        let agent_id = trigger.agent_id.to_string();
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(trigger).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(TriggerQueueClosed(agent_id));
        }
        metrics::counter!("treeswarm_triggers_enqueued_total").increment(1);
        metrics::gauge!("treeswarm_trigger_queue_depth").increment(1.0);
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

pub struct TriggerReceiver {
    rx: mpsc::UnboundedReceiver<Trigger>,
    depth: Arc<AtomicUsize>,
}

impl TriggerReceiver {
    /// Next trigger; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Trigger> {
        let trigger = self.rx.recv().await?;
        self.dequeued();
        Some(trigger)
    }

    pub fn try_recv(&mut self) -> Option<Trigger> {
        let trigger = self.rx.try_recv().ok()?;
        self.dequeued();
        Some(trigger)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    fn dequeued(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!("treeswarm_trigger_queue_depth").decrement(1.0);
    }
}
