use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::group::coordinator::GroupInner;
use crate::group::handler::SwitchoverHandler;
use crate::log::{LogEntry, LogReader, MessageLog};

/// Reader of one log that reports outages once instead of on every poll.
#[derive(Debug, Default)]
struct LogFollower {
    reader: LogReader,
    failing: bool,
}

impl LogFollower {
    async fn start<L: MessageLog>(&mut self, log: &L) {
        if let Err(err) = self.reader.start(log).await {
            warn!(log = log.role(), error = %err, "message log unreachable at startup");
            self.failing = true;
        }
    }

    async fn next_batch<L: MessageLog>(&mut self, log: &L) -> Vec<LogEntry> {
        match self.reader.next_batch(log).await {
            Ok(entries) => {
                if self.failing {
                    info!(log = log.role(), "message log reachable again");
                    self.failing = false;
                }
                entries
            }
            Err(err) => {
                if !self.failing {
                    warn!(log = log.role(), error = %err, "failed to poll message log");
                    self.failing = true;
                }
                Vec::new()
            }
        }
    }
}

/// Background task following both logs, sending heartbeats and watching the
/// pause timeout.
pub(crate) struct GroupPoller<L, H> {
    inner: Arc<GroupInner<L, H>>,
    old: LogFollower,
    new: LogFollower,
    shutdown_rx: ShutdownRx,
}

impl<L, H> GroupPoller<L, H>
where
    L: MessageLog,
    H: SwitchoverHandler,
{
    /// Positions both readers at the tail of their log.
    pub(crate) async fn prepare(inner: Arc<GroupInner<L, H>>, shutdown_rx: ShutdownRx) -> Self {
        let mut old = LogFollower::default();
        let mut new = LogFollower::default();
        old.start(&inner.old_log).await;
        new.start(&inner.new_log).await;

        Self {
            inner,
            old,
            new,
            shutdown_rx,
        }
    }

    pub(crate) fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut poll = interval(self.inner.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval(self.inner.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.wait_for_shutdown() => {
                    info!(node_id = %self.inner.node_id, "switchover group poller shutting down");
                    return;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = self.inner.report_status(None).await {
                        warn!(node_id = %self.inner.node_id, error = %err, "failed to send heartbeat");
                    }
                    self.inner.record_live_nodes();
                }
                _ = poll.tick() => {
                    self.poll_logs().await;
                    self.inner.check_pause_timeout().await;
                }
            }
        }
    }

    /// Processes new entries of the old log, then of the new log.
    async fn poll_logs(&mut self) {
        for entry in self.old.next_batch(&self.inner.old_log).await {
            self.inner.handle_message(entry.message).await;
        }
        for entry in self.new.next_batch(&self.inner.new_log).await {
            self.inner.handle_message(entry.message).await;
        }
    }
}
