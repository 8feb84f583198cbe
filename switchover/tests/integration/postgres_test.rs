use std::sync::Arc;

use config::shared::{PgConnectionConfig, PoolConfig, SwitchoverConfig};
use postgres::test_utils::{create_pg_database, drop_pg_database, local_pg_connection_config};
use switchover::concurrency::pause::create_pause_channel;
use switchover::connector::ActiveDatabase;
use switchover::database::postgres::PgSwitchoverDatabase;
use switchover::database::{SwitchoverDatabase, SwitchoverState};
use switchover::error::ErrorKind;
use switchover::lock::{LockableDatabase, with_locked_connection};
use switchover::log::{Message, MessageKind, MessageLog};
use switchover::manager::Manager;
use switchover::test_utils::test_group_config;
use switchover::types::{ClusterState, NodeId};
use telemetry::tracing::init_test_tracing;

async fn spawn_database(role: &'static str) -> (PgSwitchoverDatabase, PgConnectionConfig) {
    let config = local_pg_connection_config();
    let pool = create_pg_database(&config).await;
    let database = PgSwitchoverDatabase::new(role, pool);
    database.migrate().await.unwrap();

    (database, config)
}

#[tokio::test(flavor = "multi_thread")]
async fn execution_lock_is_exclusive_across_sessions() {
    init_test_tracing();
    let (database, config) = spawn_database("old").await;

    let mut holder = database.connect().await.unwrap();
    assert!(database.try_lock(&mut holder).await.unwrap());

    let err = with_locked_connection(&database, |_| Box::pin(async move { Ok(()) }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockBusy);

    // Closing the holder ends its session and frees the lock.
    database.close(holder).await.unwrap();
    with_locked_connection(&database, |connection| {
        Box::pin(async move {
            PgSwitchoverDatabase::write_state(connection, SwitchoverState::InProgress).await
        })
    })
    .await
    .unwrap();
    assert_eq!(
        database.current_state().await.unwrap(),
        SwitchoverState::InProgress
    );

    drop_pg_database(&config).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn message_log_round_trips_through_the_table() {
    let (database, config) = spawn_database("old").await;
    let log = database.message_log();
    let start = log.latest_position().await.unwrap();

    let message = Message::new(NodeId::random(), MessageKind::Reset);
    log.append(&message).await.unwrap();

    let batch = log.poll_since(start, 10).await.unwrap();
    assert_eq!(batch.entries.len(), 1);
    assert_eq!(batch.entries[0].message, message);
    assert_eq!(log.latest_position().await.unwrap(), batch.entries[0].position);

    drop_pg_database(&config).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn switchover_between_two_postgres_databases() {
    init_test_tracing();
    let (old, old_config) = spawn_database("old").await;
    let (new, new_config) = spawn_database("new").await;

    let manager = Manager::new(
        NodeId::random(),
        true,
        test_group_config(),
        old.clone(),
        new.clone(),
    )
    .await;
    let (pause_tx, pause_rx) = create_pause_channel();
    manager.init(Arc::new(pause_tx));

    manager.send_reset().await.unwrap();
    assert_eq!(manager.status().state, ClusterState::Ready);

    manager.send_execute().await.unwrap();

    assert_eq!(manager.status().state, ClusterState::Done);
    assert!(!pause_rx.is_paused());
    assert_eq!(manager.db().active(), ActiveDatabase::New);
    assert_eq!(old.current_state().await.unwrap(), SwitchoverState::UseNextDb);
    assert_eq!(new.current_state().await.unwrap(), SwitchoverState::UseNextDb);

    manager.shutdown().await;
    old.pool().close().await;
    new.pool().close().await;
    drop_pg_database(&old_config).await;
    drop_pg_database(&new_config).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn manager_connects_from_configuration() {
    let old_config = local_pg_connection_config();
    let new_config = local_pg_connection_config();
    create_pg_database(&old_config).await.close().await;
    create_pg_database(&new_config).await.close().await;

    let config = SwitchoverConfig {
        node_id: None,
        can_exec: true,
        old_database: old_config.clone(),
        new_database: new_config.clone(),
        group: test_group_config(),
        pool: PoolConfig::default(),
    };
    let manager = Manager::connect(&config).await.unwrap();

    manager.send_ping().await.unwrap();
    assert_eq!(manager.status().nodes.len(), 1);
    assert_eq!(manager.db().active(), ActiveDatabase::Old);

    manager.shutdown().await;
    manager.old_database().pool().close().await;
    manager.new_database().pool().close().await;
    drop_pg_database(&old_config).await;
    drop_pg_database(&new_config).await;
}
