//! Metric names emitted by the switchover core.

/// Label holding the local node id.
pub const NODE_ID_LABEL: &str = "node_id";

/// Label holding the command or message kind.
pub const KIND_LABEL: &str = "kind";

/// Label holding the database role, `old` or `new`.
pub const DATABASE_LABEL: &str = "database";

/// Counter of commands broadcast by this node.
pub const SWO_COMMANDS_SENT_TOTAL: &str = "swo_commands_sent_total";

/// Counter of log messages processed by this node, after deduplication.
pub const SWO_MESSAGES_PROCESSED_TOTAL: &str = "swo_messages_processed_total";

/// Counter of log append failures.
pub const SWO_LOG_APPEND_FAILURES_TOTAL: &str = "swo_log_append_failures_total";

/// Counter of commands that were not acknowledged by every live node in time.
pub const SWO_ACK_TIMEOUTS_TOTAL: &str = "swo_ack_timeouts_total";

/// Counter of lock attempts that found the execution lock already taken.
pub const SWO_LOCK_BUSY_TOTAL: &str = "swo_lock_busy_total";

/// Counter of finished executions.
pub const SWO_EXECUTIONS_COMPLETED_TOTAL: &str = "swo_executions_completed_total";

/// Counter of failed executions.
pub const SWO_EXECUTIONS_FAILED_TOTAL: &str = "swo_executions_failed_total";

/// Gauge of live nodes in the cluster view.
pub const SWO_LIVE_NODES: &str = "swo_live_nodes";
