use std::future::Future;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::sanitize::{host_address, sanitize_text};

/// Minimum time between two usage writes for the same key.
pub const LAST_USED_INTERVAL: Duration = Duration::from_secs(60);

const MAX_USER_AGENT_CHARS: usize = 1024;
const MAX_ADDRESS_CHARS: usize = 255;

/// A sanitized usage record of one API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    pub key_id: Uuid,
    pub user_agent: String,
    pub address: Option<IpAddr>,
}

/// Persists API key usage records.
pub trait UsageWriter: Send + Sync + 'static {
    type Error: Send;

    fn write_usage(&self, usage: Usage) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Throttles usage writes to one per key every [`LAST_USED_INTERVAL`].
///
/// Keys are tracked in a bounded LRU, a key evicted from it is written again
/// on its next use. A key counts as recorded as soon as its write starts, so a
/// failing write is not retried within the interval.
pub struct LastUsedCache<W> {
    recorded: Mutex<LruCache<Uuid, Instant>>,
    writer: W,
}

impl<W: UsageWriter> LastUsedCache<W> {
    /// Creates a cache tracking at most `max` keys.
    pub fn new(max: usize, writer: W) -> Self {
        let capacity = NonZeroUsize::new(max).unwrap_or(NonZeroUsize::MIN);

        Self {
            recorded: Mutex::new(LruCache::new(capacity)),
            writer,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Records that `id` was used from `address` with `user_agent`.
    ///
    /// Returns without writing when the key was already recorded less than
    /// [`LAST_USED_INTERVAL`] ago.
    pub async fn record_usage(
        &self,
        id: Uuid,
        user_agent: &str,
        address: &str,
    ) -> Result<(), W::Error> {
        let now = Instant::now();
        {
            let mut recorded = self.lock_recorded();
            let recent = match recorded.get(&id) {
                Some(last) => now.duration_since(*last) < LAST_USED_INTERVAL,
                None => false,
            };
            if recent {
                debug!(key_id = %id, "usage recorded recently, skipping write");
                return Ok(());
            }
            recorded.put(id, now);
        }

        let usage = Usage {
            key_id: id,
            user_agent: sanitize_text(user_agent, MAX_USER_AGENT_CHARS),
            address: host_address(&sanitize_text(address, MAX_ADDRESS_CHARS)),
        };

        self.writer.write_usage(usage).await
    }

    fn lock_recorded(&self) -> MutexGuard<'_, LruCache<Uuid, Instant>> {
        self.recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
