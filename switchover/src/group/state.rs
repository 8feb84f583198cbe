//! Cluster view of one node, mutated only by the group while holding its lock.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::types::{
    ClusterState, NODE_STATUS_OK, NODE_STATUS_PAUSED, NODE_STATUS_UNRESPONSIVE, Node, NodeId,
    Status,
};

/// Number of processed message ids remembered for deduplication.
const SEEN_CAPACITY: usize = 4096;

/// Number of commands whose acknowledgements are tracked.
const ACK_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct NodeEntry {
    node: Node,
    last_seen: Instant,
    unresponsive: bool,
}

/// A negative acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rejection {
    pub node_id: NodeId,
    pub kind: ErrorKind,
    pub details: String,
}

#[derive(Debug, Default)]
struct AckSet {
    acked: HashSet<NodeId>,
    rejected: Vec<Rejection>,
}

/// Result of checking the acknowledgements of one command.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AckProgress {
    /// Every live node acknowledged.
    Complete,
    /// Some live nodes have not answered yet.
    Pending(Vec<NodeId>),
    /// A node rejected the command.
    Rejected(Rejection),
}

/// Outcome of the execution started by a given `execute` message.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ExecutionProgress {
    /// The message was not processed yet or the cutover is still running.
    Running,
    Done,
    Failed { kind: ErrorKind, details: String },
    /// A later reset or execute replaced this attempt.
    Superseded,
}

#[derive(Debug)]
pub(crate) struct GroupState {
    local: Node,
    cluster: ClusterState,
    details: String,
    failure: Option<(ErrorKind, String)>,
    nodes: BTreeMap<NodeId, NodeEntry>,
    seen: HashSet<Uuid>,
    seen_order: VecDeque<Uuid>,
    acks: HashMap<Uuid, AckSet>,
    ack_order: VecDeque<Uuid>,
    reset_id: Option<Uuid>,
    execute_id: Option<Uuid>,
    /// Execute received before this node saw the cluster ready.
    deferred_execute: Option<Uuid>,
    paused_since: Option<Instant>,
    stale_after: Duration,
}

impl GroupState {
    pub fn new(local: Node, stale_after: Duration) -> Self {
        Self {
            local,
            cluster: ClusterState::Idle,
            details: "no switchover in progress".to_owned(),
            failure: None,
            nodes: BTreeMap::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            acks: HashMap::new(),
            ack_order: VecDeque::new(),
            reset_id: None,
            execute_id: None,
            deferred_execute: None,
            paused_since: None,
            stale_after,
        }
    }

    pub fn cluster(&self) -> ClusterState {
        self.cluster
    }

    pub fn local(&self) -> &Node {
        &self.local
    }

    /// Returns `true` the first time `id` is seen.
    pub fn mark_seen(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }

        self.seen_order.push_back(id);
        if self.seen_order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        true
    }

    /// Replaces the entry of `node` and records `ack` when present.
    pub fn record_report(&mut self, node: Node, ack: Option<Uuid>, now: Instant) {
        let node_id = node.id;
        self.nodes.insert(
            node_id,
            NodeEntry {
                node,
                last_seen: now,
                unresponsive: false,
            },
        );

        if let Some(ack) = ack {
            self.ack_set(ack).acked.insert(node_id);
        }

        self.evaluate_readiness(now);
    }

    pub fn record_rejection(&mut self, ack: Uuid, rejection: Rejection) {
        self.ack_set(ack).rejected.push(rejection);
    }

    fn ack_set(&mut self, id: Uuid) -> &mut AckSet {
        if !self.acks.contains_key(&id) {
            self.ack_order.push_back(id);
            if self.ack_order.len() > ACK_CAPACITY {
                if let Some(oldest) = self.ack_order.pop_front() {
                    self.acks.remove(&oldest);
                }
            }
        }

        self.acks.entry(id).or_default()
    }

    /// Starts a new attempt identified by the reset message `id`.
    pub fn begin_reset(&mut self, id: Uuid) {
        self.cluster = ClusterState::Resetting;
        self.details = "waiting for every node to validate both databases".to_owned();
        self.failure = None;
        self.reset_id = Some(id);
        self.execute_id = None;
        self.deferred_execute = None;
    }

    /// Moves `Ready` to `Executing`, returns `false` from any other state.
    pub fn begin_execute(&mut self, id: Uuid) -> bool {
        if self.cluster != ClusterState::Ready {
            return false;
        }

        self.cluster = ClusterState::Executing;
        self.details = "cutover in progress".to_owned();
        self.execute_id = Some(id);

        true
    }

    /// Keeps an execute that arrived while this node still waits for reset
    /// reports, the logs are read independently so it may overtake them.
    ///
    /// Returns `false` outside `Resetting`.
    pub fn defer_execute(&mut self, id: Uuid) -> bool {
        if self.cluster != ClusterState::Resetting {
            return false;
        }

        self.deferred_execute = Some(id);

        true
    }

    /// Starts the deferred execute once the cluster became ready.
    pub fn start_deferred_execute(&mut self) -> Option<Uuid> {
        if self.cluster != ClusterState::Ready {
            return None;
        }

        let id = self.deferred_execute.take()?;
        self.begin_execute(id).then_some(id)
    }

    pub fn finish(&mut self, execute: Uuid) {
        if self.execute_id != Some(execute) {
            return;
        }

        self.cluster = ClusterState::Done;
        self.details = "switchover complete".to_owned();
    }

    /// Ends the current attempt with an error.
    pub fn fail(&mut self, kind: ErrorKind, details: String) {
        if self.cluster == ClusterState::Idle {
            return;
        }

        self.cluster = ClusterState::Error;
        self.details = details.clone();
        self.failure = Some((kind, details));
        self.deferred_execute = None;
    }

    /// Fails the attempt when the execution `execute` is still unsettled.
    ///
    /// Returns `false` when it already settled or was superseded.
    pub fn fail_execution(&mut self, execute: Uuid, kind: ErrorKind, details: String) -> bool {
        if self.execution_progress(execute) != ExecutionProgress::Running {
            return false;
        }

        self.fail(kind, details);

        true
    }

    pub fn execution_progress(&self, execute: Uuid) -> ExecutionProgress {
        if self.execute_id != Some(execute) {
            // Still ready means the message was not processed yet.
            return match self.cluster {
                ClusterState::Ready => ExecutionProgress::Running,
                _ => ExecutionProgress::Superseded,
            };
        }

        match self.cluster {
            ClusterState::Executing => ExecutionProgress::Running,
            ClusterState::Done => ExecutionProgress::Done,
            ClusterState::Error => {
                let (kind, details) = self
                    .failure
                    .clone()
                    .unwrap_or((ErrorKind::Unknown, self.details.clone()));
                ExecutionProgress::Failed { kind, details }
            }
            _ => ExecutionProgress::Superseded,
        }
    }

    /// Drops nodes silent for longer than the stale window.
    pub fn prune(&mut self, now: Instant) {
        let stale_after = self.stale_after;
        let before = self.nodes.len();
        self.nodes
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= stale_after);

        if self.nodes.len() != before {
            self.evaluate_readiness(now);
        }
    }

    fn live_nodes(&self, now: Instant) -> impl Iterator<Item = &NodeEntry> {
        self.nodes
            .values()
            .filter(move |entry| now.saturating_duration_since(entry.last_seen) <= self.stale_after)
    }

    pub fn live_node_count(&self, now: Instant) -> usize {
        self.live_nodes(now).count()
    }

    /// Counts live nodes allowed to execute the cutover.
    pub fn exec_node_count(&self, now: Instant) -> usize {
        self.live_nodes(now)
            .filter(|entry| entry.node.can_exec)
            .count()
    }

    /// The cluster becomes ready once every live node answered the current
    /// reset and reported both databases valid.
    fn evaluate_readiness(&mut self, now: Instant) {
        if self.cluster != ClusterState::Resetting {
            return;
        }
        let Some(reset_id) = self.reset_id else {
            return;
        };

        let acked = self.acks.get(&reset_id).map(|set| &set.acked);
        let mut live = 0;
        let mut all_ready = true;
        for entry in self.live_nodes(now) {
            live += 1;
            let answered = acked.is_some_and(|acked| acked.contains(&entry.node.id));
            if !answered || !entry.node.is_valid() {
                all_ready = false;
            }
        }

        if live > 0 && all_ready {
            self.cluster = ClusterState::Ready;
            self.details = format!("{live} node(s) ready");
        }
    }

    pub fn ack_progress(&self, id: Uuid, now: Instant) -> AckProgress {
        let set = self.acks.get(&id);
        if let Some(rejection) = set.and_then(|set| set.rejected.first()) {
            return AckProgress::Rejected(rejection.clone());
        }

        let pending = self
            .live_nodes(now)
            .map(|entry| entry.node.id)
            .filter(|node_id| !set.is_some_and(|set| set.acked.contains(node_id)))
            .collect::<Vec<_>>();

        // Without any answer there is no evidence that anybody is listening.
        if set.is_none_or(|set| set.acked.is_empty()) {
            return AckProgress::Pending(pending);
        }

        if pending.is_empty() {
            AckProgress::Complete
        } else {
            AckProgress::Pending(pending)
        }
    }

    pub fn mark_unresponsive(&mut self, node_ids: &[NodeId]) {
        for node_id in node_ids {
            if let Some(entry) = self.nodes.get_mut(node_id) {
                entry.unresponsive = true;
            }
        }
    }

    pub fn set_local_validity(&mut self, old_valid: bool, new_valid: bool) {
        self.local.old_valid = old_valid;
        self.local.new_valid = new_valid;
    }

    pub fn set_local_status(&mut self, status: impl Into<String>) {
        self.local.status = status.into();
    }

    pub fn set_paused(&mut self, now: Instant) {
        self.paused_since = Some(now);
        self.local.status = NODE_STATUS_PAUSED.to_owned();
    }

    pub fn set_resumed(&mut self) {
        self.paused_since = None;
        self.local.status = NODE_STATUS_OK.to_owned();
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since.is_some()
    }

    /// Returns `true` when the local node has been paused for longer than `timeout`.
    pub fn pause_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.paused_since
            .is_some_and(|since| now.saturating_duration_since(since) >= timeout)
    }

    /// Builds a snapshot of the live part of the cluster view.
    pub fn status(&self, now: Instant) -> Status {
        let nodes = self
            .live_nodes(now)
            .map(|entry| {
                let mut node = entry.node.clone();
                if entry.unresponsive {
                    node.status = NODE_STATUS_UNRESPONSIVE.to_owned();
                }
                node
            })
            .collect();

        Status {
            state: self.cluster,
            details: self.details.clone(),
            nodes,
        }
    }
}
