//! Exclusive execution lock taken on a raw database connection.
//!
//! Every cutover sensitive operation runs while holding the execution lock of
//! the database it touches. The lock is session scoped: it is taken on a
//! connection detached from the pool and lives at most as long as that
//! connection. On every exit path the lock is released and then the connection
//! is closed. When the calling future is dropped mid-operation the connection
//! is dropped with it, which ends the session and frees the lock server side.
//!
//! Two databases are only ever locked through [`with_locked_connection_pair`],
//! which takes the old database first. No other acquisition order exists.

use std::future::Future;

use futures::future::BoxFuture;
use metrics::counter;
use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, SwoResult};
use crate::metrics::{DATABASE_LABEL, SWO_LOCK_BUSY_TOTAL};

/// A database that hands out raw connections able to hold the execution lock.
pub trait LockableDatabase: Send + Sync {
    /// A connection owning one database session.
    ///
    /// Dropping it must end the session.
    type Connection: Send;

    /// Role of the database in the switchover, `old` or `new`.
    fn role(&self) -> &'static str;

    /// Opens a connection dedicated to the caller.
    fn connect(&self) -> impl Future<Output = SwoResult<Self::Connection>> + Send;

    /// Tries to take the execution lock without waiting.
    fn try_lock(
        &self,
        connection: &mut Self::Connection,
    ) -> impl Future<Output = SwoResult<bool>> + Send;

    /// Releases the execution lock held by `connection`.
    fn unlock(
        &self,
        connection: &mut Self::Connection,
    ) -> impl Future<Output = SwoResult<()>> + Send;

    /// Closes `connection`, ending its session.
    fn close(&self, connection: Self::Connection) -> impl Future<Output = SwoResult<()>> + Send;
}

/// Execution lock held on one connection.
///
/// There is no `Drop` impl: dropping the guard drops the connection, which ends
/// the session and with it the lock.
pub(crate) struct ExecLock<'a, D: LockableDatabase> {
    database: &'a D,
    connection: D::Connection,
}

impl<'a, D: LockableDatabase> ExecLock<'a, D> {
    pub(crate) async fn acquire(database: &'a D) -> SwoResult<Self> {
        let mut connection = database.connect().await?;

        match database.try_lock(&mut connection).await {
            Ok(true) => {
                debug!(database = database.role(), "execution lock acquired");
                Ok(Self {
                    database,
                    connection,
                })
            }
            Ok(false) => {
                counter!(SWO_LOCK_BUSY_TOTAL, DATABASE_LABEL => database.role()).increment(1);
                close_quietly(database, connection).await;
                bail!(
                    ErrorKind::LockBusy,
                    "Execution lock is held by another session",
                    format!("the {} database is already locked", database.role())
                );
            }
            Err(err) => {
                close_quietly(database, connection).await;
                Err(err)
            }
        }
    }

    pub(crate) fn connection(&mut self) -> &mut D::Connection {
        &mut self.connection
    }

    /// Unlocks, then closes the connection.
    pub(crate) async fn release(self) {
        let ExecLock {
            database,
            mut connection,
        } = self;

        if let Err(err) = database.unlock(&mut connection).await {
            // Closing ends the session, which drops the lock anyway.
            warn!(database = database.role(), error = %err, "failed to release execution lock");
        }
        close_quietly(database, connection).await;

        debug!(database = database.role(), "execution lock released");
    }
}

async fn close_quietly<D: LockableDatabase>(database: &D, connection: D::Connection) {
    if let Err(err) = database.close(connection).await {
        warn!(database = database.role(), error = %err, "failed to close locked connection");
    }
}

/// Runs `operation` on a connection of `database` holding the execution lock.
///
/// Fails with [`ErrorKind::ConnectionFailed`] before any lock attempt when no
/// connection can be obtained, and with [`ErrorKind::LockBusy`] without running
/// `operation` when another session holds the lock.
pub async fn with_locked_connection<D, F, T>(database: &D, operation: F) -> SwoResult<T>
where
    D: LockableDatabase,
    F: for<'c> FnOnce(&'c mut D::Connection) -> BoxFuture<'c, SwoResult<T>> + Send,
{
    let mut lock = ExecLock::acquire(database).await?;

    let result = operation(lock.connection()).await;
    lock.release().await;

    result
}

/// Runs `operation` while holding the execution locks of both databases.
///
/// The old database is locked first and released last. If the new database
/// cannot be locked the old lock is released before the error is returned.
pub async fn with_locked_connection_pair<O, N, F, T>(
    old: &O,
    new: &N,
    operation: F,
) -> SwoResult<T>
where
    O: LockableDatabase,
    N: LockableDatabase,
    F: for<'c> FnOnce(&'c mut O::Connection, &'c mut N::Connection) -> BoxFuture<'c, SwoResult<T>>
        + Send,
{
    let mut old_lock = ExecLock::acquire(old).await?;
    let mut new_lock = match ExecLock::acquire(new).await {
        Ok(lock) => lock,
        Err(err) => {
            old_lock.release().await;
            return Err(err);
        }
    };

    let result = operation(old_lock.connection(), new_lock.connection()).await;

    new_lock.release().await;
    old_lock.release().await;

    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::{Barrier, Semaphore, mpsc};

    use super::*;
    use crate::swo_error;
    use crate::test_utils::memory_database::{LockAction, LockEvent, MemoryDatabase};

    #[tokio::test]
    async fn operation_runs_under_lock_and_lock_is_released() {
        let (old, _new) = MemoryDatabase::pair();

        let holder = with_locked_connection(&old, |connection| {
            Box::pin(async move { Ok(connection.session()) })
        })
        .await
        .unwrap();

        assert_eq!(
            old.lock_events(),
            vec![
                LockEvent::new("old", LockAction::Locked, holder),
                LockEvent::new("old", LockAction::Unlocked, holder),
            ]
        );
        assert_eq!(old.lock_holder(), None);
        assert_eq!(old.open_sessions(), 0);
    }

    #[tokio::test]
    async fn lock_is_released_when_operation_fails() {
        let (old, _new) = MemoryDatabase::pair();

        let err = with_locked_connection(&old, |_| {
            Box::pin(async move {
                Err::<(), _>(swo_error!(ErrorKind::QueryFailed, "operation failed"))
            })
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QueryFailed);
        assert_eq!(old.lock_holder(), None);
        assert_eq!(old.open_sessions(), 0);
    }

    #[tokio::test]
    async fn busy_lock_does_not_run_operation() {
        let (old, _new) = MemoryDatabase::pair();
        let _held = old.hold_lock().await;
        let ran = AtomicUsize::new(0);

        let err = with_locked_connection(&old, |_| {
            ran.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(()) })
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LockBusy);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_database_fails_before_locking() {
        let (old, _new) = MemoryDatabase::pair();
        old.set_available(false);

        let err = with_locked_connection(&old, |_| Box::pin(async move { Ok(()) }))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert!(old.lock_events().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attempts_have_a_single_winner() {
        let (old, _new) = MemoryDatabase::pair();
        let attempts = 8;
        let start = Arc::new(Barrier::new(attempts));
        let gate = Arc::new(Semaphore::new(0));
        let inside = Arc::new(AtomicUsize::new(0));
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();

        for _ in 0..attempts {
            let old = old.clone();
            let start = start.clone();
            let gate = gate.clone();
            let inside = inside.clone();
            let results_tx = results_tx.clone();
            tokio::spawn(async move {
                start.wait().await;
                let result = with_locked_connection(&old, |_| {
                    Box::pin(async move {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        // Hold the lock until every other attempt has failed.
                        let _permit = gate.acquire().await.unwrap();
                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
                .await;
                results_tx.send(result).unwrap();
            });
        }

        for _ in 0..attempts - 1 {
            let err = results_rx.recv().await.unwrap().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::LockBusy);
        }
        gate.add_permits(1);
        results_rx.recv().await.unwrap().unwrap();

        assert_eq!(old.lock_holder(), None);
        assert_eq!(old.open_sessions(), 0);
    }

    #[tokio::test]
    async fn pair_locks_old_before_new_and_releases_in_reverse() {
        let (old, new) = MemoryDatabase::pair();

        with_locked_connection_pair(&old, &new, |_, _| Box::pin(async move { Ok(()) }))
            .await
            .unwrap();

        let actions = old
            .lock_events()
            .into_iter()
            .map(|event| (event.database, event.action))
            .collect::<Vec<_>>();
        assert_eq!(
            actions,
            vec![
                ("old", LockAction::Locked),
                ("new", LockAction::Locked),
                ("new", LockAction::Unlocked),
                ("old", LockAction::Unlocked),
            ]
        );
    }

    #[tokio::test]
    async fn pair_releases_old_lock_when_new_is_busy() {
        let (old, new) = MemoryDatabase::pair();
        let _held = new.hold_lock().await;

        let err = with_locked_connection_pair(&old, &new, |_, _| Box::pin(async move { Ok(()) }))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LockBusy);
        assert_eq!(old.lock_holder(), None);
        assert_eq!(old.open_sessions(), 0);
    }

    #[tokio::test]
    async fn dropped_operation_releases_lock_with_its_session() {
        let (old, _new) = MemoryDatabase::pair();

        let pending = with_locked_connection(&old, |_| {
            Box::pin(async move {
                futures::future::pending::<()>().await;
                Ok(())
            })
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), pending).await;

        assert!(timed_out.is_err());
        assert_eq!(old.lock_holder(), None);
        assert_eq!(old.open_sessions(), 0);
    }
}
