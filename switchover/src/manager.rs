//! Node level entry point of the switchover.
//!
//! The [`Manager`] owns both databases and the [`DualConnector`] handed to the
//! application, attaches the application's [`PauseResume`] capability and
//! runs the cluster [`Group`]. The group calls back into the manager through
//! [`SwitchoverHandler`] to pause, resume, reset and execute locally.

use std::sync::{Arc, OnceLock};

use config::shared::{GroupConfig, SwitchoverConfig};
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::bail;
use crate::connector::{ActiveDatabase, DualConnector};
use crate::database::postgres::PgSwitchoverDatabase;
use crate::database::{SwitchoverDatabase, SwitchoverState};
use crate::error::{ErrorKind, SwoResult};
use crate::group::{Group, SwitchoverHandler};
use crate::lifecycle::PauseResume;
use crate::lock::{ExecLock, with_locked_connection, with_locked_connection_pair};
use crate::swo_error;
use crate::types::{NodeId, Status, Validity};

/// Local side of the switchover, shared with the group.
pub(crate) struct ManagerCore<D: SwitchoverDatabase> {
    old: D,
    new: D,
    connector: DualConnector<D::Pool>,
    lifecycle: OnceLock<Arc<dyn PauseResume>>,
}

impl<D: SwitchoverDatabase> ManagerCore<D> {
    fn lifecycle(&self) -> SwoResult<Arc<dyn PauseResume>> {
        self.lifecycle.get().cloned().ok_or_else(|| {
            swo_error!(
                ErrorKind::NotInitialized,
                "Switchover manager is not initialized",
                "no pause/resume capability was attached"
            )
        })
    }

    /// Routes application traffic according to the old database's state.
    ///
    /// Keeps the current route when the old database cannot be read.
    async fn refresh_routing(&self) {
        match self.old.current_state().await {
            Ok(SwitchoverState::UseNextDb) => {
                self.connector.route_to(ActiveDatabase::New);
            }
            Ok(_) => {
                self.connector.route_to(ActiveDatabase::Old);
            }
            Err(err) => {
                warn!(error = %err, "failed to read switchover state, keeping current route");
            }
        }
    }

    /// Moves an attempt interrupted mid-cutover back to idle.
    async fn restore_interrupted(&self) {
        match self.old.current_state().await {
            Ok(SwitchoverState::InProgress) => {}
            Ok(_) => return,
            Err(err) => {
                warn!(error = %err, "failed to read switchover state");
                return;
            }
        }

        let restored = with_locked_connection(&self.old, |connection| {
            Box::pin(async move {
                // Checked again under the lock, a running execution may have moved on.
                if D::read_state(connection).await? != SwitchoverState::InProgress {
                    return Ok(false);
                }
                D::write_state(connection, SwitchoverState::Idle).await?;

                Ok(true)
            })
        })
        .await;

        match restored {
            Ok(true) => info!("interrupted switchover restored to idle"),
            Ok(false) => {}
            Err(err) if err.kind() == ErrorKind::LockBusy => {
                debug!("execution lock busy, leaving in progress state untouched");
            }
            Err(err) => warn!(error = %err, "failed to restore interrupted switchover"),
        }
    }
}

impl<D: SwitchoverDatabase> SwitchoverHandler for ManagerCore<D> {
    async fn reset(&self) -> SwoResult<Validity> {
        let (old_check, new_check) = tokio::join!(self.old.check(), self.new.check());

        if let Err(err) = &old_check {
            warn!(database = self.old.role(), error = %err, "database check failed");
        }
        if let Err(err) = &new_check {
            warn!(database = self.new.role(), error = %err, "database check failed");
        }

        if old_check.is_ok() {
            self.restore_interrupted().await;
            self.refresh_routing().await;
        }

        Ok(Validity {
            old_valid: old_check.is_ok(),
            new_valid: new_check.is_ok(),
        })
    }

    async fn execute(&self) -> SwoResult<()> {
        with_locked_connection_pair(&self.old, &self.new, |old, new| {
            Box::pin(async move {
                if D::read_state(old).await? == SwitchoverState::UseNextDb {
                    bail!(
                        ErrorKind::InvalidState,
                        "Switchover already committed",
                        "the old database already routes to the new database"
                    );
                }

                // The old database is written last, its state commits the cutover.
                D::write_state(old, SwitchoverState::InProgress).await?;
                D::write_state(new, SwitchoverState::UseNextDb).await?;
                D::write_state(old, SwitchoverState::UseNextDb).await?;

                Ok(())
            })
        })
        .await?;

        self.connector.route_to(ActiveDatabase::New);
        info!("switchover committed, application traffic moves to the new database");

        Ok(())
    }

    async fn pause(&self) -> SwoResult<()> {
        self.lifecycle()?.pause().await
    }

    async fn resume(&self) -> SwoResult<()> {
        let lifecycle = self.lifecycle()?;
        // Connections taken after resume must go to the committed database.
        self.refresh_routing().await;

        lifecycle.resume().await
    }

    async fn resume_after_timeout(&self) -> SwoResult<()> {
        let lifecycle = self.lifecycle()?;

        // Holding the old database's execution lock guarantees no cutover
        // commits between reading the routing state and resuming.
        let mut lock = match ExecLock::acquire(&self.old).await {
            Ok(lock) => lock,
            Err(err) if err.kind() == ErrorKind::LockBusy => return Err(err),
            Err(err) => {
                // An unreachable old database cannot be committed to either.
                warn!(error = %err, "cannot take the execution lock, resuming on the current route");
                return lifecycle.resume().await;
            }
        };

        match D::read_state(lock.connection()).await {
            Ok(SwitchoverState::UseNextDb) => {
                self.connector.route_to(ActiveDatabase::New);
            }
            Ok(_) => {
                self.connector.route_to(ActiveDatabase::Old);
            }
            Err(err) => {
                warn!(error = %err, "failed to read switchover state, keeping current route");
            }
        }
        let result = lifecycle.resume().await;
        lock.release().await;

        result
    }
}

/// Switchover manager of one application node.
pub struct Manager<D: SwitchoverDatabase> {
    core: Arc<ManagerCore<D>>,
    group: Group<D::Log, ManagerCore<D>>,
}

impl Manager<PgSwitchoverDatabase> {
    /// Connects to both Postgres databases described by `config`, creates the
    /// switchover schema on each and starts the group.
    pub async fn connect(config: &SwitchoverConfig) -> SwoResult<Self> {
        config.validate()?;

        let old = PgSwitchoverDatabase::from_config("old", &config.old_database, &config.pool).await?;
        let new = PgSwitchoverDatabase::from_config("new", &config.new_database, &config.pool).await?;
        old.migrate().await?;
        new.migrate().await?;

        let node_id = config.node_id.map(NodeId::new).unwrap_or_else(NodeId::random);

        Ok(Self::new(node_id, config.can_exec, config.group.clone(), old, new).await)
    }
}

impl<D: SwitchoverDatabase> Manager<D> {
    /// Creates a manager over `old` and `new` and starts following the cluster.
    ///
    /// Application traffic is routed according to the old database's persisted
    /// state, to the old database when it cannot be read.
    pub async fn new(
        node_id: NodeId,
        can_exec: bool,
        group_config: GroupConfig,
        old: D,
        new: D,
    ) -> Self {
        let connector = DualConnector::new(old.pool().clone(), new.pool().clone());
        let old_log = old.message_log();
        let new_log = new.message_log();

        let core = Arc::new(ManagerCore {
            old,
            new,
            connector,
            lifecycle: OnceLock::new(),
        });
        core.refresh_routing().await;

        let group = Group::start(
            node_id,
            can_exec,
            group_config,
            old_log,
            new_log,
            core.clone(),
        )
        .await;

        Self { core, group }
    }

    /// Attaches the application's pause/resume capability.
    ///
    /// # Panics
    ///
    /// Panics when called a second time, which always is a wiring bug.
    pub fn init(&self, lifecycle: Arc<dyn PauseResume>) {
        if self.core.lifecycle.set(lifecycle).is_err() {
            panic!("the switchover lifecycle can only be attached once");
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.group.node_id()
    }

    /// Asks every node for a fresh status report.
    pub async fn send_ping(&self) -> SwoResult<()> {
        self.group.ping().await
    }

    /// Starts a new switchover attempt.
    pub async fn send_reset(&self) -> SwoResult<()> {
        self.group.reset().await
    }

    /// Performs the switchover, see [`Group::execute`].
    pub async fn send_execute(&self) -> SwoResult<()> {
        self.group.execute().await
    }

    /// Returns the latest cluster snapshot.
    pub fn status(&self) -> Status {
        self.group.status()
    }

    /// Returns the connection source the application must use.
    pub fn db(&self) -> &DualConnector<D::Pool> {
        &self.core.connector
    }

    pub fn old_database(&self) -> &D {
        &self.core.old
    }

    pub fn new_database(&self) -> &D {
        &self.core.new
    }

    /// Runs `operation` holding the execution locks of both databases.
    pub async fn with_locked_pair<F, T>(&self, operation: F) -> SwoResult<T>
    where
        F: for<'c> FnOnce(&'c mut D::Connection, &'c mut D::Connection) -> BoxFuture<'c, SwoResult<T>>
            + Send,
    {
        with_locked_connection_pair(&self.core.old, &self.core.new, operation).await
    }

    /// Stops following the cluster.
    pub async fn shutdown(&self) {
        self.group.shutdown().await;
    }
}
