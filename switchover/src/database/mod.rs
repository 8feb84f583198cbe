//! Databases taking part in a switchover.

use std::future::Future;

pub use ::postgres::state::SwitchoverState;

use crate::connector::ConnectionSource;
use crate::error::SwoResult;
use crate::lock::LockableDatabase;
use crate::log::MessageLog;

pub mod postgres;

/// One side of the switchover, either the old or the new database.
///
/// State reads and writes are associated functions taking a locked connection,
/// so they can only run inside the locking protocol.
pub trait SwitchoverDatabase: LockableDatabase + Clone + 'static {
    /// Pool handed to the application through the connector.
    type Pool: ConnectionSource;

    /// Message log stored in this database.
    type Log: MessageLog + Clone;

    fn pool(&self) -> &Self::Pool;

    fn message_log(&self) -> Self::Log;

    /// Checks that the database answers a trivial query.
    fn check(&self) -> impl Future<Output = SwoResult<()>> + Send;

    /// Reads the persisted switchover state without taking the lock.
    fn current_state(&self) -> impl Future<Output = SwoResult<SwitchoverState>> + Send;

    fn read_state(
        connection: &mut Self::Connection,
    ) -> impl Future<Output = SwoResult<SwitchoverState>> + Send;

    fn write_state(
        connection: &mut Self::Connection,
        state: SwitchoverState,
    ) -> impl Future<Output = SwoResult<()>> + Send;
}
