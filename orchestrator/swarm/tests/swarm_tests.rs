// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Swarm lifecycle: dispatch, cascade limiting and restart recovery.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{collaborators, config, three_nodes, wait_until, EchoKernel};
use treeswarm_core::application::scheduler::DiagnosticKind;
use treeswarm_core::domain::agent::AgentId;
use treeswarm_core::domain::events::{EventKind, EventPayload};
use treeswarm_swarm::{Swarm, SwarmError};

fn project(root: &Path) {
    let src = root.join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("main.py"), "def main():\n    pass\n").unwrap();
    std::fs::write(src.join("parser.py"), "class Parser:\n    def parse(self): ...\n").unwrap();
}

fn message(to: &AgentId, content: &str) -> EventPayload {
    EventPayload::AgentMessage {
        from_agent: AgentId::new("operator"),
        to_agent: to.clone(),
        content: content.to_string(),
        tags: Default::default(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_self_messaging_agent_stops_at_cascade_limit() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    let mut settings = config(dir.path());
    settings.max_trigger_depth = 2;
    let kernel = Arc::new(EchoKernel::echoing());
    let swarm = Swarm::open(settings, collaborators(kernel.clone())).await.unwrap();
    swarm.reconcile(&three_nodes()).await.unwrap();
    let main = three_nodes()[0].agent_id();

    swarm.start().await.unwrap();
    swarm.append(message(&main, "go")).await.unwrap();

    let stopped = wait_until(Duration::from_secs(5), || async {
        let status = swarm.status().await;
        status.scheduler.dropped == 1 && status.outstanding_triggers == 0
    })
    .await;
    assert!(stopped, "cascade never reached the depth limit");
    swarm.stop().await.unwrap();

    assert_eq!(kernel.runs(), 3);
    let status = swarm.status().await;
    assert_eq!(status.scheduler.completed, 3);
    let cascade: Vec<_> = status
        .scheduler
        .recent_diagnostics
        .iter()
        .filter(|d| matches!(d.kind, DiagnosticKind::CascadeLimitReached { .. }))
        .collect();
    assert_eq!(cascade.len(), 1);
    assert_eq!(cascade[0].kind, DiagnosticKind::CascadeLimitReached { depth: 3, max_depth: 2 });
    assert_eq!(cascade[0].agent_id, main);

    // The whole cascade shares the root event's correlation.
    let events = swarm.events(0, None).await.unwrap();
    let root = &events[0];
    assert!(events.iter().all(|e| e.correlation_id == root.correlation_id));
    let deepest = events.iter().map(|e| e.depth).max().unwrap();
    assert_eq!(deepest, 3);
    let completions = events.iter().filter(|e| e.kind() == EventKind::AgentComplete).count();
    assert_eq!(completions, 3);
}

#[tokio::test]
async fn test_unsettled_triggers_are_replayed_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    let main = three_nodes()[0].agent_id();

    {
        let swarm = Swarm::open(config(dir.path()), collaborators(Arc::new(EchoKernel::default())))
            .await
            .unwrap();
        swarm.reconcile(&three_nodes()).await.unwrap();
        swarm.append(message(&main, "while you were away")).await.unwrap();
        assert_eq!(swarm.status().await.outstanding_triggers, 1);
    }

    let kernel = Arc::new(EchoKernel::default());
    {
        let swarm = Swarm::open(config(dir.path()), collaborators(kernel.clone())).await.unwrap();
        assert_eq!(swarm.status().await.outstanding_triggers, 1);
        assert_eq!(swarm.agents().await.unwrap().len(), 3);

        swarm.start().await.unwrap();
        let settled = wait_until(Duration::from_secs(5), || async {
            swarm.status().await.outstanding_triggers == 0
        })
        .await;
        assert!(settled);
        swarm.stop().await.unwrap();

        let state = swarm.agent_state(&main).await.unwrap().unwrap();
        assert_eq!(state.turn_count, 1);
    }
    assert_eq!(kernel.runs(), 1);

    let swarm = Swarm::open(config(dir.path()), collaborators(Arc::new(EchoKernel::default())))
        .await
        .unwrap();
    let status = swarm.status().await;
    assert_eq!(status.outstanding_triggers, 0);
    assert_eq!(status.dispatch_checkpoint, status.last_sequence);
}

#[tokio::test]
async fn test_start_and_stop_guard_the_dispatch_loop() {
    let dir = tempfile::tempdir().unwrap();
    let swarm = Swarm::open_in_memory(config(dir.path()), collaborators(Arc::new(EchoKernel::default())))
        .await
        .unwrap();

    assert!(matches!(swarm.stop().await, Err(SwarmError::NotRunning)));
    swarm.start().await.unwrap();
    assert!(matches!(swarm.start().await, Err(SwarmError::AlreadyRunning)));
    assert!(wait_until(Duration::from_secs(1), || async { swarm.is_running().await }).await);

    swarm.stop().await.unwrap();
    assert!(!swarm.is_running().await);

    // The loop can be restarted with the same trigger channel.
    swarm.start().await.unwrap();
    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_observers_see_appended_events() {
    let dir = tempfile::tempdir().unwrap();
    let swarm = Swarm::open_in_memory(config(dir.path()), collaborators(Arc::new(EchoKernel::default())))
        .await
        .unwrap();
    let mut observer = swarm.subscribe();

    let appended = swarm
        .append(EventPayload::ContentChanged { path: "main.py".to_string(), diff: None })
        .await
        .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(1), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.event_id, appended.event_id);
    assert_eq!(seen.depth, 0);
    // Nobody is subscribed, so nothing is outstanding.
    let status = swarm.status().await;
    assert_eq!(status.outstanding_triggers, 0);
    assert_eq!(status.dispatch_checkpoint, 1);
}
