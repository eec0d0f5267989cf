// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! TreeSwarm Core
//!
//! Reactive event-driven agent scheduling: the append-only event log, the
//! subscription router, the bounded dispatch loop and the per-agent state
//! stores.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Shared by the swarm runtime and its embedders

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
