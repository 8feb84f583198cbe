mod base;
mod connection;
mod switchover;

pub use base::*;
pub use connection::*;
pub use switchover::*;
