// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod reconciler;
pub mod swarm;

pub use reconciler::Reconciler;
pub use swarm::{Swarm, SwarmCollaborators, SwarmError, SwarmStatus};
