//! Application hooks invoked around the cutover.

use async_trait::async_trait;

use crate::error::SwoResult;

/// Capability to hold and release application database traffic.
///
/// `pause` must not return before in-flight work is drained and no new work can
/// start. `resume` lets work start again, with new connections taken from
/// whichever database the connector routes to at that moment.
#[async_trait]
pub trait PauseResume: Send + Sync {
    async fn pause(&self) -> SwoResult<()>;

    async fn resume(&self) -> SwoResult<()>;
}
