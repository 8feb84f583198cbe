use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Asks every subscribed task to stop.
    pub fn shutdown(&self) {
        // Infallible send, shutting down before any task subscribed is allowed.
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once shutdown was requested or the transmitter is gone.
    pub async fn wait_for_shutdown(&mut self) {
        // An error means every transmitter was dropped, which also ends the task.
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
