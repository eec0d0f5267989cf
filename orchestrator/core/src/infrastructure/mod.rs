// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod bundles;
pub mod event_bus;
pub mod event_store;
pub mod repositories;
pub mod telemetry;
pub mod workspace;

pub use bundles::{DirectoryBundleResolver, StaticBundleResolver};
pub use event_bus::{EventBus, EventBusError, EventReceiver, FilteredEventReceiver};
pub use event_store::{InMemoryEventStore, JsonlEventStore};
pub use telemetry::init_logging;
pub use workspace::LocalWorkspaceService;
