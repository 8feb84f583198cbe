//! Coordination primitives shared by the switchover background tasks.
//!
//! All of them are thin wrappers over tokio watch channels: every receiver
//! observes the latest value and a late subscriber still sees a signal that
//! was sent before it subscribed.

pub mod pause;
pub mod shutdown;
pub mod signal;
