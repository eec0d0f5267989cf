// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dispatch Ledger
//!
//! Tracks, per event sequence, how many of the triggers routed from it are
//! still outstanding. The persisted checkpoint is the highest sequence at or
//! below which every trigger has settled (run to completion or dropped);
//! events after it are re-routed on the next open, giving at-least-once
//! delivery across crashes.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::repository::{CheckpointStore, RepositoryError};

#[derive(Debug, Default)]
struct LedgerState {
    outstanding: BTreeMap<u64, usize>,
    highest_routed: u64,
}

impl LedgerState {
    fn checkpoint(&self) -> u64 {
        match self.outstanding.keys().next() {
            Some(lowest) => lowest.saturating_sub(1),
            None => self.highest_routed,
        }
    }
}

pub struct DispatchLedger {
    store: Arc<dyn CheckpointStore>,
    state: Mutex<LedgerState>,
    persisted: tokio::sync::Mutex<u64>,
}

impl DispatchLedger {
    pub async fn open(store: Arc<dyn CheckpointStore>) -> Result<Self, RepositoryError> {
        let checkpoint = store.load().await?;
        Ok(Self {
            store,
            state: Mutex::new(LedgerState {
                outstanding: BTreeMap::new(),
                highest_routed: checkpoint,
            }),
            persisted: tokio::sync::Mutex::new(checkpoint),
        })
    }

    /// Record that `count` triggers were routed from event `sequence`.
    /// Must be called in sequence order.
    pub async fn register(&self, sequence: u64, count: usize) -> Result<(), RepositoryError> {
        {
            let mut state = self.state.lock();
            if count > 0 {
                *state.outstanding.entry(sequence).or_insert(0) += count;
            }
            state.highest_routed = state.highest_routed.max(sequence);
        }
        self.flush().await
    }

    /// One trigger from event `sequence` is finished with.
    pub async fn settle(&self, sequence: u64) -> Result<(), RepositoryError> {
        {
            let mut state = self.state.lock();
            if let Some(remaining) = state.outstanding.get_mut(&sequence) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    state.outstanding.remove(&sequence);
                }
            }
        }
        self.flush().await
    }

    /// Highest sequence whose triggers have all settled (in memory).
    pub fn checkpoint(&self) -> u64 {
        self.state.lock().checkpoint()
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.values().sum()
    }

    /// Checkpoint as last written to the store.
    pub async fn persisted_checkpoint(&self) -> u64 {
        *self.persisted.lock().await
    }

    async fn flush(&self) -> Result<(), RepositoryError> {
        let mut persisted = self.persisted.lock().await;
        let candidate = self.checkpoint();
        if candidate > *persisted {
            self.store.save(candidate).await?;
            debug!(checkpoint = candidate, "Dispatch checkpoint advanced");
            *persisted = candidate;
        }
        Ok(())
    }
}
