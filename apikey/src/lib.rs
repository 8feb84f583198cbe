//! Usage bookkeeping for API keys.

mod last_used;
mod sanitize;

pub use last_used::{LAST_USED_INTERVAL, LastUsedCache, Usage, UsageWriter};
pub use sanitize::{host_address, sanitize_text};
