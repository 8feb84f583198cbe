use std::sync::Arc;
use std::time::Duration;

use fail::FailScenario;
use switchover::connector::ActiveDatabase;
use switchover::database::SwitchoverState;
use switchover::error::ErrorKind;
use switchover::failpoints::{EXECUTE_AFTER_PAUSE, EXECUTE_BEFORE_RESUME};
use switchover::manager::Manager;
use switchover::test_utils::lifecycle::RecordingLifecycle;
use switchover::test_utils::memory_database::MemoryDatabase;
use switchover::test_utils::test_group_config;
use switchover::types::{ClusterState, NodeId};
use telemetry::tracing::init_test_tracing;

async fn start_ready_node(
    old: &MemoryDatabase,
    new: &MemoryDatabase,
) -> (Manager<MemoryDatabase>, Arc<RecordingLifecycle>) {
    let manager = Manager::new(
        NodeId::random(),
        true,
        test_group_config(),
        old.clone(),
        new.clone(),
    )
    .await;
    let lifecycle = Arc::new(RecordingLifecycle::new());
    manager.init(lifecycle.clone());
    manager.send_reset().await.unwrap();
    assert_eq!(manager.status().state, ClusterState::Ready);

    (manager, lifecycle)
}

#[tokio::test(start_paused = true)]
async fn failure_after_pause_rolls_back_without_cutover() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(EXECUTE_AFTER_PAUSE, "return").unwrap();

    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_ready_node(&old, &new).await;

    let err = manager.send_execute().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
    assert_eq!(manager.status().state, ClusterState::Error);
    assert_eq!(lifecycle.pauses(), 1);
    assert_eq!(lifecycle.resumes(), 1);
    assert!(old.lock_events().is_empty());
    assert_eq!(old.switchover_state(), SwitchoverState::Idle);
    assert_eq!(new.switchover_state(), SwitchoverState::Idle);
    assert_eq!(manager.db().active(), ActiveDatabase::Old);

    manager.shutdown().await;
    scenario.teardown();
}

#[tokio::test(start_paused = true)]
async fn failure_after_commit_leaves_nodes_to_resume_on_their_own() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(EXECUTE_BEFORE_RESUME, "return").unwrap();

    let (old, new) = MemoryDatabase::pair();
    let (manager, lifecycle) = start_ready_node(&old, &new).await;

    let err = manager.send_execute().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
    assert_eq!(manager.status().state, ClusterState::Error);
    assert_eq!(old.switchover_state(), SwitchoverState::UseNextDb);
    assert_eq!(new.switchover_state(), SwitchoverState::UseNextDb);
    assert_eq!(manager.db().active(), ActiveDatabase::New);
    assert_eq!(lifecycle.resumes(), 0);
    assert!(lifecycle.is_paused());

    // The pause watchdog resumes the node once the pause timeout elapsed.
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(lifecycle.resumes(), 1);
    assert!(!lifecycle.is_paused());
    assert_eq!(manager.db().active(), ActiveDatabase::New);

    manager.shutdown().await;
    scenario.teardown();
}
