use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::bail;
use crate::error::{ErrorKind, SwoResult};
use crate::lifecycle::PauseResume;

/// Lifecycle that only counts calls, optionally failing pauses.
#[derive(Debug, Default)]
pub struct RecordingLifecycle {
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    fail_pause: AtomicBool,
    paused: AtomicBool,
}

impl RecordingLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Makes every following pause fail.
    pub fn fail_pauses(&self) {
        self.fail_pause.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PauseResume for RecordingLifecycle {
    async fn pause(&self) -> SwoResult<()> {
        if self.fail_pause.load(Ordering::SeqCst) {
            bail!(ErrorKind::ExecutionFailed, "Pause failed", "requests could not be drained");
        }

        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);

        Ok(())
    }

    async fn resume(&self) -> SwoResult<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        Ok(())
    }
}
