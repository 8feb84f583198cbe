//! Cluster wide switchover state machine.
//!
//! Every node runs one [`Group`]. Commands and reports travel through the
//! message logs of both databases; each node follows both logs with its own
//! cursors and processes every message once, whichever log delivered it first.
//!
//! ```text
//!   Idle ──reset──► Resetting ──all valid──► Ready ──execute──► Executing ──► Done
//!                       │                                          │
//!                       └──────────────── any failure ─────────────┴──────► Error
//! ```
//!
//! `Done` and `Error` end an attempt, the next reset starts a new one.

mod coordinator;
mod executor;
pub mod handler;
mod poller;
mod state;

pub use coordinator::Group;
pub use handler::SwitchoverHandler;
