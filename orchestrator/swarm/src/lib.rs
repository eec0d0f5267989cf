// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `treeswarm-swarm`: Agent Population and Swarm Runtime
//!
//! Binds one agent to every discovered source node and runs the reactive
//! dispatch loop over them.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `ReconcileReport`, `ReconcileError` |
//! | [`application`] | Application | `Reconciler`, `Swarm` |
//!
//! ## Key Concepts
//!
//! - **Reconciliation**: diff the discovered nodes against the swarm registry.
//!   New nodes get an agent, initial state and default subscriptions; vanished
//!   nodes orphan their agent; nodes whose file changed since the agent last
//!   acted get a `content_changed` event.
//! - **Swarm**: the composition root. Owns the stores under `state_dir`, the
//!   event log, the subscription router and the scheduler, and exposes the
//!   operator surface (start, stop, append, status).

pub mod application;
pub mod domain;

pub use application::{Reconciler, Swarm, SwarmCollaborators, SwarmError, SwarmStatus};
pub use domain::*;
