// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reconciliation against the swarm registry.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{collaborators, config, node, three_nodes, EchoKernel, FixedDiscoverer};
use treeswarm_core::domain::agent::AgentStatus;
use treeswarm_core::domain::bundle::BundleError;
use treeswarm_core::domain::events::EventPayload;
use treeswarm_core::domain::subscription::SubscriptionOrigin;
use treeswarm_swarm::{ReconcileError, ReconcileReport, Swarm, SwarmError};

async fn in_memory_swarm() -> (tempfile::TempDir, Swarm) {
    let dir = tempfile::tempdir().unwrap();
    let swarm = Swarm::open_in_memory(config(dir.path()), collaborators(Arc::new(EchoKernel::default())))
        .await
        .unwrap();
    (dir, swarm)
}

#[tokio::test]
async fn test_fresh_nodes_become_agents() {
    let (_dir, swarm) = in_memory_swarm().await;

    let report = swarm.reconcile(&three_nodes()).await.unwrap();
    assert_eq!(report, ReconcileReport { created: 3, orphaned: 0, updated: 0, total: 3 });

    let agents = swarm.agents().await.unwrap();
    assert_eq!(agents.len(), 3);
    let mut subscriptions = 0;
    for agent in &agents {
        let state = swarm.agent_state(&agent.agent_id).await.unwrap().unwrap();
        assert_eq!(state.turn_count, 0);
        assert_eq!(state.file_path, agent.file_path);
        let owned = swarm.subscriptions_for(&agent.agent_id);
        assert!(owned.iter().all(|s| s.origin == SubscriptionOrigin::Default));
        subscriptions += owned.len();
    }
    assert_eq!(subscriptions, 6);

    let parser = agents.iter().find(|a| a.name == "Parser").unwrap();
    let parse = agents.iter().find(|a| a.name == "parse").unwrap();
    assert_eq!(parse.parent_id.as_ref(), Some(&parser.agent_id));
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let (_dir, swarm) = in_memory_swarm().await;
    swarm.reconcile(&three_nodes()).await.unwrap();

    let again = swarm.reconcile(&three_nodes()).await.unwrap();
    assert!(again.is_noop());
    assert_eq!(again.total, 3);
    assert_eq!(swarm.agents().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_vanished_nodes_orphan_their_agents() {
    let (_dir, swarm) = in_memory_swarm().await;
    let nodes = three_nodes();
    swarm.reconcile(&nodes).await.unwrap();
    let gone = nodes[0].agent_id();

    let report = swarm.reconcile(&nodes[1..]).await.unwrap();
    assert_eq!(report, ReconcileReport { created: 0, orphaned: 1, updated: 0, total: 2 });

    let orphan = swarm
        .agents()
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.agent_id == gone)
        .unwrap();
    assert_eq!(orphan.status, AgentStatus::Orphaned);
    assert!(swarm.subscriptions_for(&gone).is_empty());
    assert!(swarm.agent_state(&gone).await.unwrap().is_some());

    // Orphans are not orphaned twice.
    assert!(swarm.reconcile(&nodes[1..]).await.unwrap().is_noop());

    // A returning node revives its agent.
    let report = swarm.reconcile(&nodes).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(swarm.subscriptions_for(&gone).len(), 2);
}

#[tokio::test]
async fn test_changed_source_file_emits_content_changed() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("main.py"), "def main(): pass\n").unwrap();
    let swarm = Swarm::open(config(dir.path()), collaborators(Arc::new(EchoKernel::default())))
        .await
        .unwrap();

    let nodes = vec![node("n1", "function", "main", "main.py", 1)];
    assert_eq!(swarm.reconcile(&nodes).await.unwrap().created, 1);
    assert!(swarm.reconcile(&nodes).await.unwrap().is_noop());

    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(src.join("main.py"), "def main():\n    return 0\n").unwrap();

    let report = swarm.reconcile(&nodes).await.unwrap();
    assert_eq!(report.updated, 1);
    let events = swarm.events(0, None).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, EventPayload::ContentChanged { path: "main.py".to_string(), diff: None });
    assert_eq!(swarm.status().await.outstanding_triggers, 1);

    assert!(swarm.reconcile(&nodes).await.unwrap().is_noop());
}

#[tokio::test]
async fn test_unmapped_node_type_aborts_the_pass() {
    let (_dir, swarm) = in_memory_swarm().await;
    let mut nodes = three_nodes();
    nodes.push(node("n4", "module", "pkg", "pkg/__init__.py", 1));

    let result = swarm.reconcile(&nodes).await;
    assert!(matches!(
        result,
        Err(SwarmError::Reconcile(ReconcileError::Bundle(BundleError::Unmapped(t)))) if t == "module"
    ));
    assert!(swarm.agents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_discover_and_reconcile_uses_the_discoverer() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = Arc::new(EchoKernel::default());

    let without = Swarm::open_in_memory(config(dir.path()), collaborators(kernel.clone())).await.unwrap();
    assert!(matches!(
        without.discover_and_reconcile(&[PathBuf::from(".")]).await,
        Err(SwarmError::NoDiscoverer)
    ));

    let mut with = collaborators(kernel);
    with.discoverer = Some(Arc::new(FixedDiscoverer { nodes: three_nodes() }));
    let swarm = Swarm::open_in_memory(config(dir.path()), with).await.unwrap();
    let report = swarm.discover_and_reconcile(&[PathBuf::from(".")]).await.unwrap();
    assert_eq!(report.created, 3);
}
