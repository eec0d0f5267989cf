// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;

use crate::domain::agent::AgentId;
use crate::domain::events::Event;

/// Ephemeral unit of scheduled work: run `agent_id`'s turn in response to `event`.
///
/// Lives only in the dispatch queue. `depth` is the event's hop count along its
/// causal chain and is what the scheduler compares against the cascade limit.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub agent_id: AgentId,
    pub event: Arc<Event>,
    pub depth: u32,
    /// Times this trigger was pushed back by the cooldown.
    pub deferrals: u32,
}

impl Trigger {
    pub fn new(agent_id: AgentId, event: Arc<Event>) -> Self {
        let depth = event.depth;
        Self {
            agent_id,
            event,
            depth,
            deferrals: 0,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.event.sequence
    }
}
