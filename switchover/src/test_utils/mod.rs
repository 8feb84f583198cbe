//! Helpers for exercising the switchover without real databases.
//!
//! [`memory_database::MemoryDatabase`] implements every database trait in
//! memory, records lock activity and can be made unreachable on demand.
//! [`lifecycle::RecordingLifecycle`] counts pause and resume calls.

pub mod lifecycle;
pub mod memory_database;

use config::shared::GroupConfig;

/// Group timings scaled down for tests running on a paused clock.
pub fn test_group_config() -> GroupConfig {
    GroupConfig {
        poll_interval_ms: 50,
        heartbeat_interval_ms: 500,
        ack_timeout_ms: 1_000,
        stale_after_ms: 3_000,
        pause_timeout_ms: 5_000,
        execute_timeout_ms: 10_000,
    }
}
