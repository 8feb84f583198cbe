use std::sync::Arc;

use switchover::connector::ActiveDatabase;
use switchover::database::SwitchoverState;
use switchover::error::ErrorKind;
use switchover::manager::Manager;
use switchover::test_utils::lifecycle::RecordingLifecycle;
use switchover::test_utils::memory_database::{LockAction, MemoryDatabase};
use switchover::test_utils::test_group_config;
use switchover::types::{ClusterState, NODE_STATUS_OK, NodeId};
use telemetry::tracing::init_test_tracing;

use crate::common::{message_kinds, start_node};

#[tokio::test(start_paused = true)]
async fn single_node_switchover_completes() {
    init_test_tracing();
    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_node(&old, &new, true).await;

    manager.send_reset().await.unwrap();
    assert_eq!(manager.status().state, ClusterState::Ready);

    manager.send_execute().await.unwrap();

    let status = manager.status();
    assert_eq!(status.state, ClusterState::Done);
    assert_eq!(status.nodes.len(), 1);
    assert_eq!(status.nodes[0].id, manager.node_id());
    assert_eq!(status.nodes[0].status, NODE_STATUS_OK);
    assert_eq!(lifecycle.pauses(), 1);
    assert_eq!(lifecycle.resumes(), 1);

    let locked = old
        .lock_events()
        .into_iter()
        .filter(|event| event.action == LockAction::Locked)
        .map(|event| event.database)
        .collect::<Vec<_>>();
    assert_eq!(locked, vec!["old", "new"]);
    assert_eq!(old.lock_holder(), None);
    assert_eq!(new.lock_holder(), None);

    assert_eq!(old.switchover_state(), SwitchoverState::UseNextDb);
    assert_eq!(new.switchover_state(), SwitchoverState::UseNextDb);
    assert_eq!(manager.db().active(), ActiveDatabase::New);
    assert_eq!(manager.db().acquire().await.unwrap().role(), "new");

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn execute_before_reset_is_rejected_without_side_effects() {
    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_node(&old, &new, true).await;

    let err = manager.send_execute().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert_eq!(manager.status().state, ClusterState::Idle);
    assert_eq!(lifecycle.pauses(), 0);
    assert_eq!(lifecycle.resumes(), 0);
    assert!(!message_kinds(old.log()).contains(&"execute"));
    assert!(old.lock_events().is_empty());

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unreachable_new_database_keeps_cluster_resetting() {
    let (old, new) = MemoryDatabase::pair();
    new.set_available(false);
    let (manager, lifecycle) = start_node(&old, &new, true).await;

    manager.send_reset().await.unwrap();

    let status = manager.status();
    assert_eq!(status.state, ClusterState::Resetting);
    assert!(status.nodes[0].old_valid);
    assert!(!status.nodes[0].new_valid);
    assert_eq!(status.nodes[0].status, "new database unreachable");

    let err = manager.send_execute().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert_eq!(lifecycle.pauses(), 0);

    // Once the database is back a fresh reset makes the cluster ready.
    new.set_available(true);
    manager.send_reset().await.unwrap();
    assert_eq!(manager.status().state, ClusterState::Ready);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ping_never_changes_cluster_state() {
    let (old, new) = MemoryDatabase::pair();
    let (manager, _lifecycle) = start_node(&old, &new, true).await;

    manager.send_ping().await.unwrap();
    manager.send_ping().await.unwrap();
    assert_eq!(manager.status().state, ClusterState::Idle);

    manager.send_reset().await.unwrap();
    let before = manager.status();
    assert_eq!(before.state, ClusterState::Ready);

    manager.send_ping().await.unwrap();
    manager.send_ping().await.unwrap();
    assert_eq!(manager.status(), before);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_lifecycle_fails_execute_and_reset_recovers() {
    let (old, new) = MemoryDatabase::pair();
    let manager = Manager::new(
        NodeId::random(),
        true,
        test_group_config(),
        old.clone(),
        new.clone(),
    )
    .await;

    manager.send_reset().await.unwrap();
    let err = manager.send_execute().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotInitialized);
    assert_eq!(manager.status().state, ClusterState::Error);
    assert_eq!(old.switchover_state(), SwitchoverState::Idle);
    assert_eq!(manager.db().active(), ActiveDatabase::Old);

    // A failed attempt needs a reset before the next one.
    let err = manager.send_execute().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);

    let lifecycle = Arc::new(RecordingLifecycle::new());
    manager.init(lifecycle.clone());
    manager.send_reset().await.unwrap();
    manager.send_execute().await.unwrap();

    assert_eq!(manager.status().state, ClusterState::Done);
    assert_eq!(lifecycle.pauses(), 1);
    assert_eq!(lifecycle.resumes(), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "can only be attached once")]
async fn second_init_panics() {
    let (old, new) = MemoryDatabase::pair();
    let (manager, _lifecycle) = start_node(&old, &new, true).await;

    manager.init(Arc::new(RecordingLifecycle::new()));
}

#[tokio::test(start_paused = true)]
async fn failed_pause_rolls_back_every_node() {
    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_node(&old, &new, true).await;
    manager.send_reset().await.unwrap();

    lifecycle.fail_pauses();
    let err = manager.send_execute().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
    assert_eq!(manager.status().state, ClusterState::Error);
    assert_eq!(lifecycle.resumes(), 1);
    assert_eq!(old.switchover_state(), SwitchoverState::Idle);
    assert!(old.lock_events().is_empty());

    // The rollback resume is broadcast before the failure.
    let kinds = message_kinds(old.log());
    let resume = kinds.iter().rposition(|kind| *kind == "resume").unwrap();
    let error = kinds.iter().rposition(|kind| *kind == "error").unwrap();
    assert!(resume < error);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn busy_execution_lock_fails_the_cutover() {
    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_node(&old, &new, true).await;
    manager.send_reset().await.unwrap();

    let held = new.hold_lock().await;
    let err = manager.send_execute().await.unwrap_err();
    drop(held);

    assert_eq!(err.kind(), ErrorKind::LockBusy);
    assert_eq!(manager.status().state, ClusterState::Error);
    assert_eq!(lifecycle.pauses(), 1);
    assert_eq!(lifecycle.resumes(), 1);
    assert_eq!(old.switchover_state(), SwitchoverState::Idle);
    assert_eq!(new.switchover_state(), SwitchoverState::Idle);
    assert_eq!(old.lock_holder(), None);
    assert_eq!(manager.db().active(), ActiveDatabase::Old);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_executes_on_one_node_run_once() {
    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_node(&old, &new, true).await;
    manager.send_reset().await.unwrap();

    let (first, second) = tokio::join!(manager.send_execute(), manager.send_execute());

    let mut results = [first, second];
    results.sort_by_key(|result| result.is_err());
    assert!(results[0].is_ok());
    assert_eq!(
        results[1].as_ref().unwrap_err().kind(),
        ErrorKind::NotReady
    );
    assert_eq!(lifecycle.pauses(), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reset_restores_an_interrupted_cutover() {
    let (old, new) = MemoryDatabase::pair();
    old.set_switchover_state(SwitchoverState::InProgress);
    let (manager, _lifecycle) = start_node(&old, &new, true).await;

    manager.send_reset().await.unwrap();

    assert_eq!(old.switchover_state(), SwitchoverState::Idle);
    assert_eq!(manager.db().active(), ActiveDatabase::Old);
    assert_eq!(manager.status().state, ClusterState::Ready);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn committed_switchover_routes_new_managers_to_the_new_database() {
    let (old, new) = MemoryDatabase::pair();
    old.set_switchover_state(SwitchoverState::UseNextDb);
    let (manager, _lifecycle) = start_node(&old, &new, true).await;

    assert_eq!(manager.db().active(), ActiveDatabase::New);

    // A second cutover on top of a committed one is refused under the lock.
    manager.send_reset().await.unwrap();
    let err = manager.send_execute().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(manager.db().active(), ActiveDatabase::New);

    manager.shutdown().await;
}
