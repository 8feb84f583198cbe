use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Status text of a node whose last action succeeded.
pub const NODE_STATUS_OK: &str = "ok";

/// Status text of a node that missed an acknowledgement window.
pub const NODE_STATUS_UNRESPONSIVE: &str = "unresponsive";

/// Status text of a node holding application traffic.
pub const NODE_STATUS_PAUSED: &str = "paused";

/// Self reported connectivity and capability of one cluster member.
///
/// A report supersedes the previous one of the same node entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// The node has a working connection to the old database.
    pub old_valid: bool,
    /// The node has a working connection to the new database.
    pub new_valid: bool,
    /// The node is allowed to perform the physical cutover.
    pub can_exec: bool,
    pub status: String,
}

impl Node {
    pub fn new(id: NodeId, can_exec: bool) -> Self {
        Self {
            id,
            old_valid: false,
            new_valid: false,
            can_exec,
            status: "starting".to_owned(),
        }
    }

    /// Returns `true` if the node can reach both databases.
    pub fn is_valid(&self) -> bool {
        self.old_valid && self.new_valid
    }
}

/// Phase of the current switchover attempt as seen by a node.
///
/// `Done` and `Error` end an attempt; only a reset starts the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    Idle,
    Resetting,
    Ready,
    Executing,
    Done,
    Error,
}

impl ClusterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClusterState::Done | ClusterState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Idle => "idle",
            ClusterState::Resetting => "resetting",
            ClusterState::Ready => "ready",
            ClusterState::Executing => "executing",
            ClusterState::Done => "done",
            ClusterState::Error => "error",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster wide snapshot, built in one piece from the latest node reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub state: ClusterState,
    pub details: String,
    /// Live nodes ordered by id.
    pub nodes: Vec<Node>,
}

/// Connectivity found by a reset on the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    pub old_valid: bool,
    pub new_valid: bool,
}
