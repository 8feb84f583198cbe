use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bail;
use crate::connector::ConnectionSource;
use crate::database::{SwitchoverDatabase, SwitchoverState};
use crate::error::{ErrorKind, SwoResult};
use crate::lock::LockableDatabase;
use crate::log::memory::MemoryMessageLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    Locked,
    Unlocked,
    Busy,
}

/// One lock operation, in the order it happened across both databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    pub database: &'static str,
    pub action: LockAction,
    pub session: u64,
}

impl LockEvent {
    pub fn new(database: &'static str, action: LockAction, session: u64) -> Self {
        Self {
            database,
            action,
            session,
        }
    }
}

/// Bookkeeping shared by both databases of a pair.
#[derive(Debug, Default)]
struct PairShared {
    events: Mutex<Vec<LockEvent>>,
    next_session: AtomicU64,
}

#[derive(Debug)]
struct DatabaseState {
    lock_holder: Option<u64>,
    open_sessions: usize,
    switchover_state: SwitchoverState,
}

#[derive(Debug)]
struct Inner {
    role: &'static str,
    pair: Arc<PairShared>,
    available: Arc<AtomicBool>,
    log: MemoryMessageLog,
    state: Mutex<DatabaseState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, DatabaseState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, action: LockAction, session: u64) {
        self.pair
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(LockEvent::new(self.role, action, session));
    }

    fn ensure_available(&self) -> SwoResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!(
                ErrorKind::ConnectionFailed,
                "Database is unreachable",
                format!("the {} database is not available", self.role)
            );
        }

        Ok(())
    }
}

/// In-memory database with a session scoped execution lock.
///
/// Clones share the same database. Every node of an in-process cluster must
/// use clones of the same pair.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    /// Creates an old and a new database sharing one lock event history.
    pub fn pair() -> (Self, Self) {
        let pair = Arc::new(PairShared::default());

        (Self::create("old", pair.clone()), Self::create("new", pair))
    }

    fn create(role: &'static str, pair: Arc<PairShared>) -> Self {
        let available = Arc::new(AtomicBool::new(true));
        let log = MemoryMessageLog::with_availability(role, available.clone());

        Self {
            inner: Arc::new(Inner {
                role,
                pair,
                available,
                log,
                state: Mutex::new(DatabaseState {
                    lock_holder: None,
                    open_sessions: 0,
                    switchover_state: SwitchoverState::Idle,
                }),
            }),
        }
    }

    /// Makes the database, its log included, reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Returns every lock operation of the pair so far.
    pub fn lock_events(&self) -> Vec<LockEvent> {
        self.inner
            .pair
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn lock_holder(&self) -> Option<u64> {
        self.inner.state().lock_holder
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.state().open_sessions
    }

    pub fn switchover_state(&self) -> SwitchoverState {
        self.inner.state().switchover_state
    }

    pub fn set_switchover_state(&self, state: SwitchoverState) {
        self.inner.state().switchover_state = state;
    }

    pub fn log(&self) -> &MemoryMessageLog {
        &self.inner.log
    }

    /// Opens a session holding the execution lock until it is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the database is unreachable or the lock is already taken.
    pub async fn hold_lock(&self) -> MemoryConnection {
        let mut connection = self.open_session().expect("database is unreachable");
        let locked = self
            .try_lock(&mut connection)
            .await
            .expect("failed to take the execution lock");
        assert!(locked, "the execution lock is already taken");

        connection
    }

    fn open_session(&self) -> SwoResult<MemoryConnection> {
        self.inner.ensure_available()?;

        let session = self.inner.pair.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state().open_sessions += 1;

        Ok(MemoryConnection {
            inner: self.inner.clone(),
            session,
        })
    }
}

/// A session on a [`MemoryDatabase`].
///
/// Dropping it ends the session and frees the lock it held.
#[derive(Debug)]
pub struct MemoryConnection {
    inner: Arc<Inner>,
    session: u64,
}

impl MemoryConnection {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn role(&self) -> &'static str {
        self.inner.role
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let released = {
            let mut state = self.inner.state();
            state.open_sessions = state.open_sessions.saturating_sub(1);
            if state.lock_holder == Some(self.session) {
                state.lock_holder = None;
                true
            } else {
                false
            }
        };

        if released {
            self.inner.record(LockAction::Unlocked, self.session);
        }
    }
}

impl ConnectionSource for MemoryDatabase {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> SwoResult<MemoryConnection> {
        self.open_session()
    }
}

impl LockableDatabase for MemoryDatabase {
    type Connection = MemoryConnection;

    fn role(&self) -> &'static str {
        self.inner.role
    }

    async fn connect(&self) -> SwoResult<MemoryConnection> {
        self.open_session()
    }

    async fn try_lock(&self, connection: &mut MemoryConnection) -> SwoResult<bool> {
        self.inner.ensure_available()?;

        let acquired = {
            let mut state = self.inner.state();
            match state.lock_holder {
                None => {
                    state.lock_holder = Some(connection.session);
                    true
                }
                Some(holder) => holder == connection.session,
            }
        };

        let action = if acquired {
            LockAction::Locked
        } else {
            LockAction::Busy
        };
        self.inner.record(action, connection.session);

        Ok(acquired)
    }

    async fn unlock(&self, connection: &mut MemoryConnection) -> SwoResult<()> {
        self.inner.ensure_available()?;

        let released = {
            let mut state = self.inner.state();
            if state.lock_holder == Some(connection.session) {
                state.lock_holder = None;
                true
            } else {
                false
            }
        };

        if released {
            self.inner.record(LockAction::Unlocked, connection.session);
        }

        Ok(())
    }

    async fn close(&self, connection: MemoryConnection) -> SwoResult<()> {
        drop(connection);

        Ok(())
    }
}

impl SwitchoverDatabase for MemoryDatabase {
    type Pool = MemoryDatabase;
    type Log = MemoryMessageLog;

    fn pool(&self) -> &MemoryDatabase {
        self
    }

    fn message_log(&self) -> MemoryMessageLog {
        self.inner.log.clone()
    }

    async fn check(&self) -> SwoResult<()> {
        self.inner.ensure_available()
    }

    async fn current_state(&self) -> SwoResult<SwitchoverState> {
        self.inner.ensure_available()?;

        Ok(self.inner.state().switchover_state)
    }

    async fn read_state(connection: &mut MemoryConnection) -> SwoResult<SwitchoverState> {
        connection.inner.ensure_available()?;

        Ok(connection.inner.state().switchover_state)
    }

    async fn write_state(
        connection: &mut MemoryConnection,
        state: SwitchoverState,
    ) -> SwoResult<()> {
        connection.inner.ensure_available()?;
        connection.inner.state().switchover_state = state;

        Ok(())
    }
}
