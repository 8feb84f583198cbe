use std::time::Duration;

use switchover::connector::ActiveDatabase;
use switchover::database::SwitchoverState;
use switchover::error::ErrorKind;
use switchover::log::MessageKind;
use switchover::test_utils::memory_database::MemoryDatabase;
use switchover::types::{ClusterState, NODE_STATUS_UNRESPONSIVE, NodeId};
use telemetry::tracing::init_test_tracing;
use uuid::Uuid;

use crate::common::{FakeBehavior, FakeNode, append_from, message_kinds, start_node};

#[tokio::test(start_paused = true)]
async fn two_exec_nodes_fail_before_any_pause() {
    init_test_tracing();
    let (old, new) = MemoryDatabase::pair();
    let (first, first_lifecycle) = start_node(&old, &new, true).await;
    let (second, second_lifecycle) = start_node(&old, &new, true).await;

    first.send_reset().await.unwrap();
    assert_eq!(first.status().state, ClusterState::Ready);
    assert_eq!(first.status().nodes.len(), 2);

    let err = first.send_execute().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Misconfigured);
    assert!(!message_kinds(old.log()).contains(&"pause"));
    assert_eq!(first_lifecycle.pauses(), 0);
    assert_eq!(second_lifecycle.pauses(), 0);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cluster_without_exec_node_is_misconfigured() {
    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_node(&old, &new, false).await;
    manager.send_reset().await.unwrap();

    let err = manager.send_execute().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Misconfigured);
    assert_eq!(lifecycle.pauses(), 0);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn execute_issued_anywhere_runs_on_the_exec_node() {
    init_test_tracing();
    let (old, new) = MemoryDatabase::pair();
    let (issuer, issuer_lifecycle) = start_node(&old, &new, false).await;
    let (executor, executor_lifecycle) = start_node(&old, &new, true).await;

    issuer.send_reset().await.unwrap();
    assert_eq!(issuer.status().state, ClusterState::Ready);

    issuer.send_execute().await.unwrap();

    for (manager, lifecycle) in [
        (&issuer, &issuer_lifecycle),
        (&executor, &executor_lifecycle),
    ] {
        assert_eq!(lifecycle.pauses(), 1);
        assert_eq!(lifecycle.resumes(), 1);
        assert_eq!(manager.db().active(), ActiveDatabase::New);
    }
    assert_eq!(issuer.status().state, ClusterState::Done);
    assert_eq!(old.switchover_state(), SwitchoverState::UseNextDb);

    // The executor sees the outcome through the log as well.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(executor.status().state, ClusterState::Done);

    issuer.shutdown().await;
    executor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_node_blocks_readiness_until_it_goes_stale() {
    let (old, new) = MemoryDatabase::pair();
    let (manager, _lifecycle) = start_node(&old, &new, true).await;
    let silent = FakeNode::spawn(&old, false, FakeBehavior::Silent).await;

    manager.send_reset().await.unwrap();

    let status = manager.status();
    assert_eq!(status.state, ClusterState::Resetting);
    let silent_entry = status
        .nodes
        .iter()
        .find(|node| node.id == silent.node.id)
        .unwrap();
    assert_eq!(silent_entry.status, NODE_STATUS_UNRESPONSIVE);

    let err = manager.send_execute().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);

    // Past the stale window the silent node no longer counts.
    tokio::time::sleep(Duration::from_secs(4)).await;
    manager.send_reset().await.unwrap();

    let status = manager.status();
    assert_eq!(status.state, ClusterState::Ready);
    assert_eq!(status.nodes.len(), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_pause_aborts_and_resumes() {
    init_test_tracing();
    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_node(&old, &new, true).await;
    let _stubborn = FakeNode::spawn(&old, false, FakeBehavior::IgnorePause).await;

    manager.send_reset().await.unwrap();
    assert_eq!(manager.status().state, ClusterState::Ready);
    assert_eq!(manager.status().nodes.len(), 2);

    let err = manager.send_execute().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AckTimeout);
    assert_eq!(manager.status().state, ClusterState::Error);
    assert_eq!(lifecycle.pauses(), 1);
    assert_eq!(lifecycle.resumes(), 1);
    assert!(!lifecycle.is_paused());
    assert_eq!(old.switchover_state(), SwitchoverState::Idle);
    assert!(old.lock_events().is_empty());
    assert_eq!(manager.db().active(), ActiveDatabase::Old);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn execute_without_outcome_fails_the_cluster() {
    init_test_tracing();
    let (old, new) = MemoryDatabase::pair();
    let executor = FakeNode::spawn(&old, true, FakeBehavior::IgnorePause).await;
    let (manager, lifecycle) = start_node(&old, &new, false).await;

    manager.send_reset().await.unwrap();
    assert_eq!(manager.status().state, ClusterState::Ready);

    let err = manager.send_execute().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AckTimeout);
    assert_eq!(manager.status().state, ClusterState::Error);
    assert!(message_kinds(old.log()).contains(&"error"));
    assert_eq!(lifecycle.pauses(), 0);

    // The failure sticks until the next reset.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(manager.status().state, ClusterState::Error);

    drop(executor);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn execute_read_before_own_reset_report_still_runs() {
    init_test_tracing();
    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_node(&old, &new, true).await;

    // Both land in the same poll, before the node's own reset report.
    let operator = NodeId::random();
    append_from(old.log(), operator, MessageKind::Reset).await;
    append_from(old.log(), operator, MessageKind::Execute).await;

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(manager.status().state, ClusterState::Done);
    assert_eq!(lifecycle.pauses(), 1);
    assert_eq!(lifecycle.resumes(), 1);
    assert_eq!(old.switchover_state(), SwitchoverState::UseNextDb);
    assert_eq!(manager.db().active(), ActiveDatabase::New);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pause_timeout_waits_for_a_running_cutover() {
    init_test_tracing();
    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_node(&old, &new, false).await;

    // A cutover elsewhere holds the execution lock while this node is paused.
    let cutover = old.hold_lock().await;
    append_from(
        old.log(),
        NodeId::random(),
        MessageKind::Pause {
            execute: Uuid::new_v4(),
        },
    )
    .await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(lifecycle.pauses(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(lifecycle.resumes(), 0);
    assert!(lifecycle.is_paused());

    // The cutover commits, then releases the lock.
    old.set_switchover_state(SwitchoverState::UseNextDb);
    drop(cutover);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(lifecycle.resumes(), 1);
    assert!(!lifecycle.is_paused());
    assert_eq!(manager.db().active(), ActiveDatabase::New);

    manager.shutdown().await;
}
