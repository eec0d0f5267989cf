// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Entities, value objects and the contracts of every external collaborator.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and traits; no I/O

pub mod agent;
pub mod bundle;
pub mod discovery;
pub mod events;
pub mod kernel;
pub mod repository;
pub mod subscription;
pub mod swarm_config;
pub mod tools;
pub mod trigger;
pub mod workspace;
