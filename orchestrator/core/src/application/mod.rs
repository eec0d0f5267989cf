// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod bundle_registry;
pub mod dispatch_ledger;
pub mod event_log;
pub mod externals;
pub mod scheduler;
pub mod subscription_router;
pub mod trigger_queue;
pub mod turn_executor;

// Re-export the services for convenience
pub use bundle_registry::BundleRegistry;
pub use dispatch_ledger::DispatchLedger;
pub use event_log::{EventLog, EventLogError};
pub use externals::TurnExternals;
pub use scheduler::{Scheduler, SchedulerError, SchedulerSettings, SchedulerStatus, TurnRunner};
pub use subscription_router::SubscriptionRouter;
pub use trigger_queue::{trigger_channel, TriggerReceiver, TriggerSender};
pub use turn_executor::{TurnError, TurnExecutor, TurnServices, TurnSettings};
