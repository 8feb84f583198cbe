//! Live switchover of a clustered application from one database to another.
//!
//! Nodes coordinate only through the two databases: each database carries a
//! message log and a session scoped execution lock. A [`manager::Manager`]
//! per node routes application connections through a
//! [`connector::DualConnector`] and takes part in the cluster wide state
//! machine run by [`group::Group`].

pub mod concurrency;
pub mod connector;
pub mod database;
pub mod error;
pub mod failpoints;
pub mod group;
pub mod lifecycle;
pub mod lock;
pub mod log;
mod macros;
pub mod manager;
pub mod metrics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
