use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::SwoResult;
use crate::lifecycle::PauseResume;

/// Transmitter side of the pause channel handed to the switchover manager.
///
/// [`PauseTx`] implements [`PauseResume`] by flipping a flag that request
/// handlers observe through [`PauseRx`]. While the flag is set no new database
/// work may start.
#[derive(Debug, Clone)]
pub struct PauseTx(watch::Sender<bool>);

impl PauseTx {
    pub fn new(tx: watch::Sender<bool>) -> Self {
        Self(tx)
    }

    /// Creates a new pause receiver subscription.
    pub fn subscribe(&self) -> PauseRx {
        PauseRx(self.0.subscribe())
    }

    pub fn is_paused(&self) -> bool {
        *self.0.borrow()
    }
}

#[async_trait]
impl PauseResume for PauseTx {
    async fn pause(&self) -> SwoResult<()> {
        // Infallible send, pausing before any handler subscribed is allowed.
        self.0.send_replace(true);
        Ok(())
    }

    async fn resume(&self) -> SwoResult<()> {
        self.0.send_replace(false);
        Ok(())
    }
}

/// Receiver side of the pause channel.
#[derive(Debug, Clone)]
pub struct PauseRx(watch::Receiver<bool>);

impl PauseRx {
    pub fn is_paused(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes immediately when traffic is flowing, otherwise once it resumes.
    ///
    /// Also completes when the transmitter is dropped, so a torn down manager
    /// never holds requests forever.
    pub async fn wait_until_resumed(&mut self) {
        let _ = self.0.wait_for(|paused| !*paused).await;
    }
}

/// Creates a new pause channel in the resumed state.
pub fn create_pause_channel() -> (PauseTx, PauseRx) {
    let (tx, rx) = watch::channel(false);
    (PauseTx::new(tx), PauseRx(rx))
}
