use postgres::log::{append_log_row, fetch_log_rows, latest_log_id};
use sqlx::PgPool;
use tracing::warn;

use crate::error::SwoResult;
use crate::log::base::{LogBatch, LogEntry, Message, MessageLog};

/// Message log stored in the `switchover.log` table of one database.
#[derive(Debug, Clone)]
pub struct PgMessageLog {
    role: &'static str,
    pool: PgPool,
}

impl PgMessageLog {
    pub fn new(role: &'static str, pool: PgPool) -> Self {
        Self { role, pool }
    }
}

impl MessageLog for PgMessageLog {
    fn role(&self) -> &'static str {
        self.role
    }

    async fn append(&self, message: &Message) -> SwoResult<()> {
        let data = serde_json::to_value(message)?;
        append_log_row(&self.pool, data).await?;

        Ok(())
    }

    async fn poll_since(&self, cursor: i64, limit: usize) -> SwoResult<LogBatch> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = fetch_log_rows(&self.pool, cursor, limit).await?;

        let last_position = rows.last().map(|row| row.id);
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<Message>(row.data) {
                Ok(message) => entries.push(LogEntry {
                    position: row.id,
                    message,
                }),
                // Rows written by a newer node may carry kinds this node does
                // not know, they are skipped but still advance the cursor.
                Err(err) => {
                    warn!(log = self.role, position = row.id, error = %err, "skipping undecodable log entry");
                }
            }
        }

        Ok(LogBatch {
            entries,
            last_position,
        })
    }

    async fn latest_position(&self) -> SwoResult<i64> {
        Ok(latest_log_id(&self.pool).await?)
    }
}
