use std::future::Future;

use crate::error::SwoResult;
use crate::types::Validity;

/// Local actions the group asks its node to perform.
///
/// The group only depends on this capability, never on the concrete manager,
/// and every call runs on the group's poller or executor task.
pub trait SwitchoverHandler: Send + Sync + 'static {
    /// Re-validates both databases and clears leftovers of an interrupted attempt.
    fn reset(&self) -> impl Future<Output = SwoResult<Validity>> + Send;

    /// Performs the physical cutover. Only called on the executor node.
    fn execute(&self) -> impl Future<Output = SwoResult<()>> + Send;

    /// Holds application traffic.
    fn pause(&self) -> impl Future<Output = SwoResult<()>> + Send;

    /// Releases application traffic.
    fn resume(&self) -> impl Future<Output = SwoResult<()>> + Send;

    /// Releases application traffic after no resume arrived in time.
    ///
    /// Must fail with [`crate::error::ErrorKind::LockBusy`] and keep traffic
    /// paused while a cutover may still be committing.
    fn resume_after_timeout(&self) -> impl Future<Output = SwoResult<()>> + Send;
}
