use config::shared::{PgConnectionConfig, PoolConfig};
use postgres::lock::{try_exec_lock, unlock_all};
use postgres::pool::{check_connection, connect_pool};
use postgres::state as pg_state;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, PgPool, Postgres};

use crate::connector::ConnectionSource;
use crate::database::{SwitchoverDatabase, SwitchoverState};
use crate::error::SwoResult;
use crate::lock::LockableDatabase;
use crate::log::postgres::PgMessageLog;

/// A Postgres database taking part in the switchover.
#[derive(Debug, Clone)]
pub struct PgSwitchoverDatabase {
    role: &'static str,
    pool: PgPool,
}

impl PgSwitchoverDatabase {
    pub fn new(role: &'static str, pool: PgPool) -> Self {
        Self { role, pool }
    }

    /// Builds the application pool of `config` and wraps it.
    ///
    /// No connection is opened until first use.
    pub async fn from_config(
        role: &'static str,
        config: &PgConnectionConfig,
        pool_config: &PoolConfig,
    ) -> SwoResult<Self> {
        let pool = connect_pool(config, pool_config).await?;

        Ok(Self::new(role, pool))
    }

    /// Creates the switchover schema when missing.
    pub async fn migrate(&self) -> SwoResult<()> {
        postgres::migrate_switchover_schema(&self.pool).await?;

        Ok(())
    }
}

impl ConnectionSource for PgPool {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> SwoResult<Self::Connection> {
        Ok(PgPool::acquire(self).await?)
    }
}

impl LockableDatabase for PgSwitchoverDatabase {
    type Connection = PgConnection;

    fn role(&self) -> &'static str {
        self.role
    }

    async fn connect(&self) -> SwoResult<PgConnection> {
        // Detached connections are closed on drop instead of going back to the
        // pool, so a session holding the lock never outlives its user.
        let connection = self.pool.acquire().await?;

        Ok(connection.detach())
    }

    async fn try_lock(&self, connection: &mut PgConnection) -> SwoResult<bool> {
        Ok(try_exec_lock(connection).await?)
    }

    async fn unlock(&self, connection: &mut PgConnection) -> SwoResult<()> {
        Ok(unlock_all(connection).await?)
    }

    async fn close(&self, connection: PgConnection) -> SwoResult<()> {
        Ok(connection.close().await?)
    }
}

impl SwitchoverDatabase for PgSwitchoverDatabase {
    type Pool = PgPool;
    type Log = PgMessageLog;

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn message_log(&self) -> PgMessageLog {
        PgMessageLog::new(self.role, self.pool.clone())
    }

    async fn check(&self) -> SwoResult<()> {
        Ok(check_connection(&self.pool).await?)
    }

    async fn current_state(&self) -> SwoResult<SwitchoverState> {
        Ok(pg_state::read_state_pooled(&self.pool).await?)
    }

    async fn read_state(connection: &mut PgConnection) -> SwoResult<SwitchoverState> {
        Ok(pg_state::read_state(connection).await?)
    }

    async fn write_state(connection: &mut PgConnection, state: SwitchoverState) -> SwoResult<()> {
        Ok(pg_state::write_state(connection, state).await?)
    }
}
