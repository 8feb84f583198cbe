//! Append-only message log shared by every node through both databases.

pub mod base;
pub mod memory;
pub mod postgres;

pub use base::{LogBatch, LogEntry, LogReader, Message, MessageKind, MessageLog};
