use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::bail;
use crate::error::{ErrorKind, SwoResult};
use crate::log::base::{LogBatch, LogEntry, Message, MessageLog};

#[derive(Debug)]
struct Inner {
    role: &'static str,
    entries: Mutex<Vec<Message>>,
    available: Arc<AtomicBool>,
}

/// In-memory message log.
///
/// Clones share the same entries, so every node of an in-process cluster sees
/// the same log. Availability can be toggled to simulate an unreachable
/// database.
#[derive(Debug, Clone)]
pub struct MemoryMessageLog {
    inner: Arc<Inner>,
}

impl MemoryMessageLog {
    pub fn new(role: &'static str) -> Self {
        Self::with_availability(role, Arc::new(AtomicBool::new(true)))
    }

    /// Creates a log whose availability follows `available`.
    pub fn with_availability(role: &'static str, available: Arc<AtomicBool>) -> Self {
        Self {
            inner: Arc::new(Inner {
                role,
                entries: Mutex::new(Vec::new()),
                available,
            }),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Returns every message appended so far.
    pub fn messages(&self) -> Vec<Message> {
        self.entries().clone()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> SwoResult<()> {
        if !self.inner.available.load(Ordering::SeqCst) {
            bail!(
                ErrorKind::ConnectionFailed,
                "Message log is unreachable",
                format!("the {} database is not available", self.inner.role)
            );
        }

        Ok(())
    }
}

impl MessageLog for MemoryMessageLog {
    fn role(&self) -> &'static str {
        self.inner.role
    }

    async fn append(&self, message: &Message) -> SwoResult<()> {
        self.ensure_available()?;

        let mut entries = self.entries();
        entries.push(message.clone());
        trace!(log = self.inner.role, position = entries.len(), kind = message.kind.name(), "message appended");

        Ok(())
    }

    async fn poll_since(&self, cursor: i64, limit: usize) -> SwoResult<LogBatch> {
        self.ensure_available()?;

        let entries = self.entries();
        let skip = usize::try_from(cursor.max(0)).unwrap_or(usize::MAX);

        let entries = entries
            .iter()
            .enumerate()
            .skip(skip)
            .take(limit)
            .map(|(index, message)| LogEntry {
                position: index as i64 + 1,
                message: message.clone(),
            })
            .collect::<Vec<_>>();
        let last_position = entries.last().map(|entry| entry.position);

        Ok(LogBatch {
            entries,
            last_position,
        })
    }

    async fn latest_position(&self) -> SwoResult<i64> {
        self.ensure_available()?;

        Ok(self.entries().len() as i64)
    }
}
