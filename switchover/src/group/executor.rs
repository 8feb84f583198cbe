use std::sync::Arc;
use std::sync::atomic::Ordering;

use metrics::counter;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::SwoResult;
use crate::failpoints::{EXECUTE_AFTER_PAUSE, EXECUTE_BEFORE_RESUME, swo_fail_point};
use crate::group::coordinator::GroupInner;
use crate::group::handler::SwitchoverHandler;
use crate::log::{MessageKind, MessageLog};
use crate::metrics::{NODE_ID_LABEL, SWO_EXECUTIONS_COMPLETED_TOTAL, SWO_EXECUTIONS_FAILED_TOTAL};

impl<L, H> GroupInner<L, H>
where
    L: MessageLog,
    H: SwitchoverHandler,
{
    /// Drives the cutover on the executor node and publishes its outcome.
    pub(crate) async fn run_execution(self: Arc<Self>, execute: Uuid) {
        if self.executing.swap(true, Ordering::SeqCst) {
            warn!(node_id = %self.node_id, "an execution is already running on this node");
            return;
        }

        info!(node_id = %self.node_id, %execute, "starting switchover execution");

        let outcome = match self.drive_execution(execute).await {
            Ok(()) => {
                counter!(SWO_EXECUTIONS_COMPLETED_TOTAL, NODE_ID_LABEL => self.node_id.to_string())
                    .increment(1);
                info!(node_id = %self.node_id, %execute, "switchover execution committed");
                MessageKind::Done { execute }
            }
            Err(err) => {
                counter!(SWO_EXECUTIONS_FAILED_TOTAL, NODE_ID_LABEL => self.node_id.to_string())
                    .increment(1);
                error!(node_id = %self.node_id, %execute, error = %err, "switchover execution failed");
                MessageKind::Error {
                    ack: None,
                    kind: err.kind(),
                    details: err.summary(),
                }
            }
        };

        if let Err(err) = self.broadcast(outcome).await {
            error!(node_id = %self.node_id, error = %err, "failed to publish execution outcome");
        }

        self.executing.store(false, Ordering::SeqCst);
    }

    /// Pauses every node, cuts over, then resumes every node.
    ///
    /// Nothing runs past the pause until every live node acknowledged it. Any
    /// failure before the cutover committed resumes the cluster before the
    /// error is returned.
    async fn drive_execution(&self, execute: Uuid) -> SwoResult<()> {
        let pause = self.broadcast(MessageKind::Pause { execute }).await?;
        if let Err(err) = self.wait_for_acks(pause, "pause").await {
            self.roll_back(execute).await;
            return Err(err);
        }

        let cutover = match swo_fail_point(EXECUTE_AFTER_PAUSE) {
            Ok(()) => self.handler.execute().await,
            Err(err) => Err(err),
        };
        if let Err(err) = cutover {
            self.roll_back(execute).await;
            return Err(err);
        }

        // Past this point the new database is authoritative. Nodes left paused
        // by a failure here resume on their own after the pause timeout.
        swo_fail_point(EXECUTE_BEFORE_RESUME)?;

        let resume = self.broadcast(MessageKind::Resume { execute }).await?;
        self.wait_for_acks(resume, "resume").await
    }

    async fn roll_back(&self, execute: Uuid) {
        warn!(node_id = %self.node_id, %execute, "rolling back, resuming every node");

        let resume = match self.broadcast(MessageKind::Resume { execute }).await {
            Ok(resume) => resume,
            Err(err) => {
                error!(node_id = %self.node_id, error = %err, "failed to broadcast rollback resume");
                return;
            }
        };

        if let Err(err) = self.wait_for_acks(resume, "resume").await {
            warn!(node_id = %self.node_id, error = %err, "not every node confirmed the rollback resume");
        }
    }
}
