use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::load::Config;
use crate::shared::{PgConnectionConfig, ValidationError};

/// Root configuration of a switchover node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SwitchoverConfig {
    /// Stable node identifier. A random one is generated at startup when absent.
    #[serde(default)]
    pub node_id: Option<Uuid>,
    /// Whether this node is allowed to perform the physical cutover.
    ///
    /// Exactly one node of the cluster must set this.
    #[serde(default)]
    pub can_exec: bool,
    /// Database currently serving application traffic.
    pub old_database: PgConnectionConfig,
    /// Database traffic is moved to.
    pub new_database: PgConnectionConfig,
    #[serde(default)]
    pub group: GroupConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Config for SwitchoverConfig {}

impl SwitchoverConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.old_database.validate()?;
        self.new_database.validate()?;
        if self.old_database.same_database(&self.new_database) {
            return Err(ValidationError::SameDatabase);
        }
        self.group.validate()?;
        self.pool.validate()
    }
}

/// Timing of the cluster group protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GroupConfig {
    /// Delay between two polls of the message logs.
    ///
    /// Default: 500
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay between two unsolicited status reports of a node.
    ///
    /// Default: 5000
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Maximum wait for all live nodes to acknowledge a command.
    ///
    /// Default: 10000
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Silence after which a node is dropped from the cluster view.
    ///
    /// Default: 30000
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// Longest a node stays paused without receiving a resume. A node still
    /// waits for a running cutover to release the execution lock.
    ///
    /// Default: 60000
    #[serde(default = "default_pause_timeout_ms")]
    pub pause_timeout_ms: u64,
    /// Maximum wait of the issuing node for an execution to settle.
    ///
    /// Default: 120000
    #[serde(default = "default_execute_timeout_ms")]
    pub execute_timeout_ms: u64,
}

impl GroupConfig {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
    pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
    pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_STALE_AFTER_MS: u64 = 30_000;
    pub const DEFAULT_PAUSE_TIMEOUT_MS: u64 = 60_000;
    pub const DEFAULT_EXECUTE_TIMEOUT_MS: u64 = 120_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("stale_after_ms", self.stale_after_ms),
            ("pause_timeout_ms", self.pause_timeout_ms),
            ("execute_timeout_ms", self.execute_timeout_ms),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ValidationError::Zero(field));
            }
        }

        if self.heartbeat_interval_ms >= self.stale_after_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "heartbeat_interval_ms",
                constraint: "must be lower than stale_after_ms",
            });
        }
        // A healthy execution waits once for pause and once for resume
        // acknowledgements, both must fit before paused nodes give up.
        if self.ack_timeout_ms.saturating_mul(2) >= self.pause_timeout_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "ack_timeout_ms",
                constraint: "must be lower than half of pause_timeout_ms",
            });
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn pause_timeout(&self) -> Duration {
        Duration::from_millis(self.pause_timeout_ms)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            heartbeat_interval_ms: Self::DEFAULT_HEARTBEAT_INTERVAL_MS,
            ack_timeout_ms: Self::DEFAULT_ACK_TIMEOUT_MS,
            stale_after_ms: Self::DEFAULT_STALE_AFTER_MS,
            pause_timeout_ms: Self::DEFAULT_PAUSE_TIMEOUT_MS,
            execute_timeout_ms: Self::DEFAULT_EXECUTE_TIMEOUT_MS,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    GroupConfig::DEFAULT_POLL_INTERVAL_MS
}

fn default_heartbeat_interval_ms() -> u64 {
    GroupConfig::DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_ack_timeout_ms() -> u64 {
    GroupConfig::DEFAULT_ACK_TIMEOUT_MS
}

fn default_stale_after_ms() -> u64 {
    GroupConfig::DEFAULT_STALE_AFTER_MS
}

fn default_pause_timeout_ms() -> u64 {
    GroupConfig::DEFAULT_PAUSE_TIMEOUT_MS
}

fn default_execute_timeout_ms() -> u64 {
    GroupConfig::DEFAULT_EXECUTE_TIMEOUT_MS
}

/// Sizing of the connection pools opened against each database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// Default: 10
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Default: 5000
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl PoolConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        // One connection is held by the execution lock, the pool needs room for the log.
        if self.max_connections < 2 {
            return Err(ValidationError::InvalidFieldValue {
                field: "max_connections",
                constraint: "must be at least 2",
            });
        }
        if self.acquire_timeout_ms == 0 {
            return Err(ValidationError::Zero("acquire_timeout_ms"));
        }

        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_ms: Self::DEFAULT_ACQUIRE_TIMEOUT_MS,
        }
    }
}

fn default_max_connections() -> u32 {
    PoolConfig::DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout_ms() -> u64 {
    PoolConfig::DEFAULT_ACQUIRE_TIMEOUT_MS
}
