// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure result and error types of agent reconciliation. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`reconcile`] | `ReconcileReport`, `ReconcileError` |

pub mod reconcile;

pub use reconcile::*;
