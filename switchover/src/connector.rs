//! Connection source that routes application traffic to the old or new database.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::error::SwoResult;

/// A pool of application connections.
pub trait ConnectionSource: Clone + Send + Sync + 'static {
    type Connection: Send;

    /// Takes a connection from the pool.
    fn acquire(&self) -> impl Future<Output = SwoResult<Self::Connection>> + Send;
}

/// Database currently receiving application traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveDatabase {
    Old,
    New,
}

impl fmt::Display for ActiveDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveDatabase::Old => f.write_str("old"),
            ActiveDatabase::New => f.write_str("new"),
        }
    }
}

/// Hands out connections from the database selected by the switchover.
///
/// The selection only changes while application traffic is paused, so a
/// connection taken between two pauses always comes from the same database.
/// Clones share the selection.
#[derive(Debug, Clone)]
pub struct DualConnector<P> {
    old: P,
    new: P,
    use_next: Arc<AtomicBool>,
}

impl<P> DualConnector<P>
where
    P: ConnectionSource,
{
    /// Creates a connector routing to `old`.
    pub fn new(old: P, new: P) -> Self {
        Self {
            old,
            new,
            use_next: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn active(&self) -> ActiveDatabase {
        if self.use_next.load(Ordering::SeqCst) {
            ActiveDatabase::New
        } else {
            ActiveDatabase::Old
        }
    }

    /// Returns the pool of the active database.
    pub fn pool(&self) -> &P {
        match self.active() {
            ActiveDatabase::Old => &self.old,
            ActiveDatabase::New => &self.new,
        }
    }

    /// Takes a connection from the active database.
    pub async fn acquire(&self) -> SwoResult<P::Connection> {
        self.pool().acquire().await
    }

    /// Routes new connections to `target`, returns whether the route changed.
    pub(crate) fn route_to(&self, target: ActiveDatabase) -> bool {
        let use_next = target == ActiveDatabase::New;
        let previous = self.use_next.swap(use_next, Ordering::SeqCst);
        let changed = previous != use_next;
        if changed {
            info!(database = %target, "application traffic routed to a different database");
        }

        changed
    }
}
