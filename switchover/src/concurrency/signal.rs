//! Payload free change notifications.

use tokio::sync::watch;

/// Transmitter side of a change notification channel.
pub type SignalTx = watch::Sender<()>;

/// Receiver side of a change notification channel.
pub type SignalRx = watch::Receiver<()>;

/// Creates a new change notification channel.
///
/// The channel starts in the signaled state.
pub fn create_signal() -> (SignalTx, SignalRx) {
    watch::channel(())
}
