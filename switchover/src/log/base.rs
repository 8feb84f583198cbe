use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorKind, SwoResult};
use crate::types::{Node, NodeId};

/// A message broadcast to every node of the cluster.
///
/// Each broadcast is written to both logs under the same `id`, readers use the
/// id to process it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// Node that sent the message.
    pub node_id: NodeId,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl Message {
    /// Creates a message with a fresh id sent now by `node_id`.
    pub fn new(node_id: NodeId, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id,
            sent_at: Utc::now(),
            kind,
        }
    }
}

/// Payload of a [`Message`], tagged by `type` in its JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// Asks every node to report its status.
    Ping,
    /// Status report of the sending node, acknowledging `ack` when set.
    Status { node: Node, ack: Option<Uuid> },
    /// Starts a new switchover attempt.
    Reset,
    /// Starts the cutover, carried out by the single executor node.
    Execute,
    /// Asks every node to hold application traffic.
    Pause { execute: Uuid },
    /// Asks every node to release application traffic.
    Resume { execute: Uuid },
    /// Positive acknowledgement of the message `ack`.
    Ack { ack: Uuid, node: Node },
    /// Failure report.
    ///
    /// With `ack` set it rejects that message, otherwise it ends the current
    /// attempt for the whole cluster.
    Error {
        ack: Option<Uuid>,
        kind: ErrorKind,
        details: String,
    },
    /// The cutover finished and every node resumed.
    Done { execute: Uuid },
}

impl MessageKind {
    /// Returns the wire name of the kind, also used as a metric label.
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Ping => "ping",
            MessageKind::Status { .. } => "status",
            MessageKind::Reset => "reset",
            MessageKind::Execute => "execute",
            MessageKind::Pause { .. } => "pause",
            MessageKind::Resume { .. } => "resume",
            MessageKind::Ack { .. } => "ack",
            MessageKind::Error { .. } => "error",
            MessageKind::Done { .. } => "done",
        }
    }
}

/// A message together with its position in one log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub position: i64,
    pub message: Message,
}

/// Entries returned by one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogBatch {
    pub entries: Vec<LogEntry>,
    /// Position of the last scanned entry, including entries that were skipped.
    pub last_position: Option<i64>,
}

/// Storage backend of one message log.
///
/// Positions are strictly increasing in append order and start above `0`.
pub trait MessageLog: Send + Sync + 'static {
    /// Role of the database holding the log, `old` or `new`.
    fn role(&self) -> &'static str;

    /// Appends `message` to the log.
    fn append(&self, message: &Message) -> impl Future<Output = SwoResult<()>> + Send;

    /// Scans at most `limit` entries positioned after `cursor`, oldest first.
    fn poll_since(
        &self,
        cursor: i64,
        limit: usize,
    ) -> impl Future<Output = SwoResult<LogBatch>> + Send;

    /// Returns the position of the newest entry, `0` when the log is empty.
    fn latest_position(&self) -> impl Future<Output = SwoResult<i64>> + Send;
}

/// Number of entries fetched per poll.
const POLL_BATCH_SIZE: usize = 128;

/// Cursor over one log, yielding only entries appended after it was started.
///
/// A failed poll leaves the cursor untouched so the next poll retries from the
/// same position.
#[derive(Debug)]
pub struct LogReader {
    cursor: Option<i64>,
}

impl LogReader {
    pub fn new() -> Self {
        Self { cursor: None }
    }

    /// Positions the reader at the tail of `log`.
    pub async fn start<L: MessageLog>(&mut self, log: &L) -> SwoResult<()> {
        let position = log.latest_position().await?;
        debug!(log = log.role(), position, "message log reader started");
        self.cursor = Some(position);

        Ok(())
    }

    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    /// Returns the next batch of entries.
    ///
    /// A reader that could not be started yet starts now and yields nothing.
    pub async fn next_batch<L: MessageLog>(&mut self, log: &L) -> SwoResult<Vec<LogEntry>> {
        let Some(cursor) = self.cursor else {
            self.start(log).await?;
            return Ok(Vec::new());
        };

        let batch = log.poll_since(cursor, POLL_BATCH_SIZE).await?;
        if let Some(last_position) = batch.last_position {
            self.cursor = Some(last_position);
        }

        Ok(batch.entries)
    }
}

impl Default for LogReader {
    fn default() -> Self {
        Self::new()
    }
}
