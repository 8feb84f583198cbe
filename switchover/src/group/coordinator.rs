use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use config::shared::GroupConfig;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::concurrency::signal::{SignalTx, create_signal};
use crate::error::{ErrorKind, SwoError, SwoResult};
use crate::group::handler::SwitchoverHandler;
use crate::group::poller::GroupPoller;
use crate::group::state::{AckProgress, ExecutionProgress, GroupState, Rejection};
use crate::log::{Message, MessageKind, MessageLog};
use crate::metrics::{
    DATABASE_LABEL, KIND_LABEL, NODE_ID_LABEL, SWO_ACK_TIMEOUTS_TOTAL, SWO_COMMANDS_SENT_TOTAL,
    SWO_LIVE_NODES, SWO_LOG_APPEND_FAILURES_TOTAL, SWO_MESSAGES_PROCESSED_TOTAL,
};
use crate::types::{ClusterState, NODE_STATUS_OK, Node, NodeId, Status, Validity};

/// State shared between the group handle, its poller and its executor.
pub(crate) struct GroupInner<L, H> {
    pub(crate) node_id: NodeId,
    pub(crate) can_exec: bool,
    pub(crate) config: GroupConfig,
    pub(crate) old_log: L,
    pub(crate) new_log: L,
    pub(crate) handler: Arc<H>,
    state: Mutex<GroupState>,
    changed: SignalTx,
    pub(crate) executing: AtomicBool,
}

impl<L, H> GroupInner<L, H>
where
    L: MessageLog,
    H: SwitchoverHandler,
{
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, GroupState> {
        // The state is only ever replaced field by field, a panic mid-update
        // leaves it usable.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        self.changed.send_replace(());
    }

    /// Appends a message to both logs and returns its id.
    ///
    /// Fails only when neither log accepted the message.
    pub(crate) async fn broadcast(&self, kind: MessageKind) -> SwoResult<Uuid> {
        let message = Message::new(self.node_id, kind);
        let kind_name = message.kind.name();

        let (old_result, new_result) = tokio::join!(
            self.old_log.append(&message),
            self.new_log.append(&message)
        );

        let mut errors = Vec::new();
        for (role, result) in [
            (self.old_log.role(), old_result),
            (self.new_log.role(), new_result),
        ] {
            if let Err(err) = result {
                counter!(SWO_LOG_APPEND_FAILURES_TOTAL, DATABASE_LABEL => role).increment(1);
                debug!(log = role, kind = kind_name, error = %err, "failed to append message");
                errors.push(err);
            }
        }
        if errors.len() == 2 {
            return Err(SwoError::from(errors));
        }

        counter!(SWO_COMMANDS_SENT_TOTAL, KIND_LABEL => kind_name).increment(1);

        Ok(message.id)
    }

    /// Broadcasts the local node snapshot, acknowledging `ack` when set.
    pub(crate) async fn report_status(&self, ack: Option<Uuid>) -> SwoResult<Uuid> {
        let node = self.lock_state().local().clone();
        self.broadcast(MessageKind::Status { node, ack }).await
    }

    async fn acknowledge(&self, ack: Uuid) {
        let node = self.lock_state().local().clone();
        if let Err(err) = self.broadcast(MessageKind::Ack { ack, node }).await {
            warn!(node_id = %self.node_id, error = %err, "failed to acknowledge command");
        }
    }

    async fn reject(&self, ack: Uuid, err: &SwoError) {
        let kind = MessageKind::Error {
            ack: Some(ack),
            kind: err.kind(),
            details: err.summary(),
        };
        if let Err(err) = self.broadcast(kind).await {
            warn!(node_id = %self.node_id, error = %err, "failed to reject command");
        }
    }

    /// Processes one message coming from either log.
    pub(crate) async fn handle_message(self: &Arc<Self>, message: Message) {
        if !self.lock_state().mark_seen(message.id) {
            return;
        }

        counter!(SWO_MESSAGES_PROCESSED_TOTAL, KIND_LABEL => message.kind.name()).increment(1);
        debug!(
            node_id = %self.node_id,
            from = %message.node_id,
            kind = message.kind.name(),
            "processing message"
        );

        match message.kind {
            MessageKind::Ping => {
                if let Err(err) = self.report_status(Some(message.id)).await {
                    warn!(node_id = %self.node_id, error = %err, "failed to answer ping");
                }
            }
            MessageKind::Status { node, ack } => {
                self.lock_state().record_report(node, ack, Instant::now());
            }
            MessageKind::Ack { ack, node } => {
                self.lock_state().record_report(node, Some(ack), Instant::now());
            }
            MessageKind::Reset => self.handle_reset(message.id).await,
            MessageKind::Execute => self.handle_execute(message.id),
            MessageKind::Pause { .. } => self.handle_pause(message.id).await,
            MessageKind::Resume { .. } => self.handle_resume(message.id).await,
            MessageKind::Error {
                ack: Some(ack),
                kind,
                details,
            } => {
                self.lock_state().record_rejection(
                    ack,
                    Rejection {
                        node_id: message.node_id,
                        kind,
                        details,
                    },
                );
            }
            MessageKind::Error {
                ack: None,
                kind,
                details,
            } => {
                warn!(node_id = %self.node_id, from = %message.node_id, ?kind, %details, "switchover attempt failed");
                self.lock_state().fail(kind, details);
            }
            MessageKind::Done { execute } => {
                info!(node_id = %self.node_id, "switchover complete");
                self.lock_state().finish(execute);
            }
        }

        self.start_deferred_execution();
        self.notify();
    }

    async fn handle_reset(&self, reset: Uuid) {
        self.lock_state().begin_reset(reset);
        self.notify();

        let (validity, status) = match self.handler.reset().await {
            Ok(validity) => (validity, validity_status(validity)),
            Err(err) => {
                warn!(node_id = %self.node_id, error = %err, "local reset failed");
                let validity = Validity {
                    old_valid: false,
                    new_valid: false,
                };
                (validity, err.summary())
            }
        };

        {
            let mut state = self.lock_state();
            state.set_local_validity(validity.old_valid, validity.new_valid);
            state.set_local_status(status);
        }

        if let Err(err) = self.report_status(Some(reset)).await {
            warn!(node_id = %self.node_id, error = %err, "failed to report reset result");
        }
    }

    fn handle_execute(self: &Arc<Self>, execute: Uuid) {
        {
            let mut state = self.lock_state();
            if !state.begin_execute(execute) {
                if state.defer_execute(execute) {
                    debug!(node_id = %self.node_id, "deferring execute until reset reports settle");
                } else {
                    debug!(node_id = %self.node_id, "ignoring execute, cluster is not ready");
                }
                return;
            }
        }

        self.spawn_execution(execute);
    }

    /// Starts an execute deferred by [`Self::handle_execute`] once this node
    /// sees the cluster ready.
    fn start_deferred_execution(self: &Arc<Self>) {
        let deferred = self.lock_state().start_deferred_execute();
        if let Some(execute) = deferred {
            info!(node_id = %self.node_id, %execute, "cluster ready, starting deferred execute");
            self.spawn_execution(execute);
        }
    }

    fn spawn_execution(self: &Arc<Self>, execute: Uuid) {
        if self.can_exec {
            tokio::spawn(self.clone().run_execution(execute));
        }
    }

    async fn handle_pause(&self, pause: Uuid) {
        match self.handler.pause().await {
            Ok(()) => {
                info!(node_id = %self.node_id, "application traffic paused");
                self.lock_state().set_paused(Instant::now());
                self.acknowledge(pause).await;
            }
            Err(err) => {
                error!(node_id = %self.node_id, error = %err, "failed to pause application traffic");
                self.lock_state().set_local_status(err.summary());
                self.reject(pause, &err).await;
            }
        }
    }

    async fn handle_resume(&self, resume: Uuid) {
        match self.handler.resume().await {
            Ok(()) => {
                info!(node_id = %self.node_id, "application traffic resumed");
                self.lock_state().set_resumed();
                self.acknowledge(resume).await;
            }
            Err(err) => {
                error!(node_id = %self.node_id, error = %err, "failed to resume application traffic");
                self.lock_state().set_local_status(err.summary());
                self.reject(resume, &err).await;
            }
        }
    }

    /// Resumes the local node when no resume arrived within the pause timeout.
    ///
    /// Stays paused and retries on the next poll while a cutover holds the
    /// execution lock.
    pub(crate) async fn check_pause_timeout(&self) {
        let pause_timeout = self.config.pause_timeout();
        if !self
            .lock_state()
            .pause_expired(Instant::now(), pause_timeout)
        {
            return;
        }

        match self.handler.resume_after_timeout().await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::LockBusy => {
                debug!(node_id = %self.node_id, "pause timeout elapsed during a cutover, staying paused");
                return;
            }
            Err(err) => {
                error!(node_id = %self.node_id, error = %err, "failed to resume after pause timeout");
                let mut state = self.lock_state();
                // Retry after another full timeout.
                state.set_paused(Instant::now());
                state.set_local_status(err.summary());
                return;
            }
        }
        warn!(
            node_id = %self.node_id,
            timeout_ms = self.config.pause_timeout_ms,
            "no resume received within the pause timeout, resumed locally"
        );
        self.lock_state().set_resumed();

        let failure = MessageKind::Error {
            ack: None,
            kind: ErrorKind::AckTimeout,
            details: format!(
                "node {} resumed itself after {} ms without resume",
                self.node_id, self.config.pause_timeout_ms
            ),
        };
        if let Err(err) = self.broadcast(failure).await {
            warn!(node_id = %self.node_id, error = %err, "failed to report pause timeout");
        }
    }

    /// Publishes the live node count, called on every heartbeat.
    pub(crate) fn record_live_nodes(&self) {
        let live = self.lock_state().live_node_count(Instant::now());
        gauge!(SWO_LIVE_NODES, NODE_ID_LABEL => self.node_id.to_string()).set(live as f64);
    }

    /// Waits until every live node acknowledged the message `id`.
    ///
    /// Waits at least two poll intervals so that nodes not yet known to this
    /// node get a chance to answer. Nodes that did not answer within the ack
    /// timeout are marked unresponsive.
    pub(crate) async fn wait_for_acks(&self, id: Uuid, command: &'static str) -> SwoResult<()> {
        let started = Instant::now();
        let ack_timeout = self.config.ack_timeout();
        let settle_at = started + (self.config.poll_interval() * 2).min(ack_timeout);
        let deadline = started + ack_timeout;
        let mut changed = self.changed.subscribe();

        loop {
            changed.borrow_and_update();
            let now = Instant::now();
            let progress = {
                let mut state = self.lock_state();
                state.prune(now);
                state.ack_progress(id, now)
            };

            match progress {
                AckProgress::Rejected(rejection) => {
                    bail!(
                        rejection.kind,
                        "A node rejected the command",
                        format!(
                            "node {} rejected {command}: {}",
                            rejection.node_id, rejection.details
                        )
                    );
                }
                AckProgress::Complete if now >= settle_at => return Ok(()),
                AckProgress::Pending(pending) if now >= deadline => {
                    self.lock_state().mark_unresponsive(&pending);
                    self.notify();
                    counter!(SWO_ACK_TIMEOUTS_TOTAL, KIND_LABEL => command).increment(1);

                    let missing = if pending.is_empty() {
                        "no node answered".to_owned()
                    } else {
                        pending
                            .iter()
                            .map(NodeId::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    };
                    bail!(
                        ErrorKind::AckTimeout,
                        "Nodes did not acknowledge the command in time",
                        format!("{command} not acknowledged within {ack_timeout:?}: {missing}")
                    );
                }
                _ => {}
            }

            let wake_at = if now < settle_at { settle_at } else { deadline };
            tokio::select! {
                result = changed.changed() => {
                    if result.is_err() {
                        sleep_until(wake_at).await;
                    }
                }
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    /// Waits for the outcome of the execution started by the message `execute`.
    async fn wait_for_execution(&self, execute: Uuid) -> SwoResult<()> {
        let deadline = Instant::now() + self.config.execute_timeout();
        let mut changed = self.changed.subscribe();

        loop {
            changed.borrow_and_update();
            let progress = self.lock_state().execution_progress(execute);

            match progress {
                ExecutionProgress::Running => {}
                ExecutionProgress::Done => return Ok(()),
                ExecutionProgress::Failed { kind, details } => {
                    bail!(kind, "Switchover execution failed", details);
                }
                ExecutionProgress::Superseded => {
                    bail!(
                        ErrorKind::InvalidState,
                        "Switchover execution was superseded",
                        "a reset replaced the attempt before it settled"
                    );
                }
            }

            if Instant::now() >= deadline {
                let details = format!(
                    "no outcome within {} ms, check the cluster status",
                    self.config.execute_timeout_ms
                );
                self.abandon_execution(execute, details.clone()).await;

                bail!(
                    ErrorKind::AckTimeout,
                    "Switchover execution did not settle in time",
                    details
                );
            }

            tokio::select! {
                result = changed.changed() => {
                    if result.is_err() {
                        sleep_until(deadline).await;
                    }
                }
                _ = sleep_until(deadline) => {}
            }
        }
    }

    /// Moves the cluster to `Error` after the execution `execute` did not settle.
    async fn abandon_execution(&self, execute: Uuid, details: String) {
        let abandoned = self
            .lock_state()
            .fail_execution(execute, ErrorKind::AckTimeout, details.clone());
        if !abandoned {
            return;
        }
        self.notify();

        warn!(node_id = %self.node_id, %execute, "switchover execution did not settle, failing the attempt");
        let failure = MessageKind::Error {
            ack: None,
            kind: ErrorKind::AckTimeout,
            details,
        };
        if let Err(err) = self.broadcast(failure).await {
            warn!(node_id = %self.node_id, error = %err, "failed to report execution timeout");
        }
    }
}

fn validity_status(validity: Validity) -> String {
    match (validity.old_valid, validity.new_valid) {
        (true, true) => NODE_STATUS_OK.to_owned(),
        (false, true) => "old database unreachable".to_owned(),
        (true, false) => "new database unreachable".to_owned(),
        (false, false) => "both databases unreachable".to_owned(),
    }
}

/// Handle to the switchover state machine of one node.
///
/// Commands issued through the same handle are serialised: a second command
/// waits until the first one settled.
pub struct Group<L, H> {
    inner: Arc<GroupInner<L, H>>,
    commands: tokio::sync::Mutex<()>,
    shutdown_tx: ShutdownTx,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<L, H> Group<L, H>
where
    L: MessageLog,
    H: SwitchoverHandler,
{
    /// Starts following both logs.
    ///
    /// Only messages appended after this call are processed. A log that cannot
    /// be reached now is followed from its tail once it comes back.
    pub async fn start(
        node_id: NodeId,
        can_exec: bool,
        config: GroupConfig,
        old_log: L,
        new_log: L,
        handler: Arc<H>,
    ) -> Self {
        let (changed, _) = create_signal();
        let local = Node::new(node_id, can_exec);
        let state = GroupState::new(local, config.stale_after());

        let inner = Arc::new(GroupInner {
            node_id,
            can_exec,
            config,
            old_log,
            new_log,
            handler,
            state: Mutex::new(state),
            changed,
            executing: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let poller = GroupPoller::prepare(inner.clone(), shutdown_rx).await;
        let handle = poller.start();

        info!(%node_id, can_exec, "switchover group started");

        Self {
            inner,
            commands: tokio::sync::Mutex::new(()),
            shutdown_tx,
            poller: Mutex::new(Some(handle)),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    /// Returns a snapshot of the cluster view, never blocks on I/O.
    pub fn status(&self) -> Status {
        self.inner.lock_state().status(Instant::now())
    }

    /// Asks every node for a fresh status report.
    ///
    /// Nodes that do not answer are flagged in the status, the call itself
    /// still succeeds.
    pub async fn ping(&self) -> SwoResult<()> {
        let _command = self.commands.lock().await;

        let ping = self.inner.broadcast(MessageKind::Ping).await?;
        match self.inner.wait_for_acks(ping, "ping").await {
            Err(err) if err.kind() == ErrorKind::AckTimeout => {
                warn!(node_id = %self.inner.node_id, error = %err, "ping not answered by every node");
                Ok(())
            }
            result => result,
        }
    }

    /// Starts a new switchover attempt and waits for every node to report.
    ///
    /// Returns once the reports settled. The cluster is `Ready` afterwards only
    /// if every live node can reach both databases.
    pub async fn reset(&self) -> SwoResult<()> {
        let _command = self.commands.lock().await;

        let reset = self.inner.broadcast(MessageKind::Reset).await?;
        match self.inner.wait_for_acks(reset, "reset").await {
            Err(err) if err.kind() == ErrorKind::AckTimeout => {
                warn!(node_id = %self.inner.node_id, error = %err, "reset not answered by every node");
                Ok(())
            }
            result => result,
        }
    }

    /// Runs the cutover and waits until it committed and every node resumed.
    ///
    /// Fails with [`ErrorKind::NotReady`] unless the cluster is ready and with
    /// [`ErrorKind::Misconfigured`] unless exactly one live node may execute,
    /// in both cases before anything is broadcast. Dropping the returned
    /// future does not stop an execution that already started.
    pub async fn execute(&self) -> SwoResult<()> {
        let _command = self.commands.lock().await;

        {
            let now = Instant::now();
            let mut state = self.inner.lock_state();
            state.prune(now);

            let cluster = state.cluster();
            if cluster != ClusterState::Ready {
                bail!(
                    ErrorKind::NotReady,
                    "Cluster is not ready to execute",
                    format!("cluster is {cluster}, a reset must complete first")
                );
            }

            let exec_nodes = state.exec_node_count(now);
            if exec_nodes != 1 {
                bail!(
                    ErrorKind::Misconfigured,
                    "Exactly one node must be allowed to execute",
                    format!("{exec_nodes} live node(s) have can_exec set")
                );
            }
        }

        let execute = self.inner.broadcast(MessageKind::Execute).await?;
        self.inner.wait_for_execution(execute).await
    }

    /// Stops the background poller and waits for it to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.shutdown();

        let handle = self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(node_id = %self.inner.node_id, error = %err, "switchover group poller panicked");
            }
        }
    }
}

impl<L, H> Drop for Group<L, H> {
    fn drop(&mut self) {
        self.shutdown_tx.shutdown();
    }
}
