// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workspace adapters.
//!
//! - [`local::LocalWorkspaceService`]: every agent reads and writes the
//!   project tree directly. Suitable for single-node use and tests; isolated
//!   overlays are provided by external workspace services.

pub mod local;

pub use local::{LocalWorkspace, LocalWorkspaceService};
