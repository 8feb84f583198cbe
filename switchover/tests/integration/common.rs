use std::sync::Arc;
use std::time::Duration;

use switchover::log::{LogReader, Message, MessageKind, MessageLog};
use switchover::log::memory::MemoryMessageLog;
use switchover::manager::Manager;
use switchover::test_utils::lifecycle::RecordingLifecycle;
use switchover::test_utils::memory_database::MemoryDatabase;
use switchover::test_utils::test_group_config;
use switchover::types::{NODE_STATUS_OK, Node, NodeId};
use tokio::task::JoinHandle;

/// Starts a node on `old`/`new` with a recording lifecycle attached.
pub async fn start_node(
    old: &MemoryDatabase,
    new: &MemoryDatabase,
    can_exec: bool,
) -> (Manager<MemoryDatabase>, Arc<RecordingLifecycle>) {
    let manager = Manager::new(
        NodeId::random(),
        can_exec,
        test_group_config(),
        old.clone(),
        new.clone(),
    )
    .await;
    let lifecycle = Arc::new(RecordingLifecycle::new());
    manager.init(lifecycle.clone());

    (manager, lifecycle)
}

/// Returns the kinds of every message appended to `log`.
pub fn message_kinds(log: &MemoryMessageLog) -> Vec<&'static str> {
    log.messages()
        .iter()
        .map(|message| message.kind.name())
        .collect()
}

/// How a [`FakeNode`] reacts to commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Answers pings and resets, never acknowledges pause or resume.
    IgnorePause,
    /// Sends one status report and then stays silent.
    Silent,
}

/// A cluster member driven directly through the old log.
pub struct FakeNode {
    pub node: Node,
    handle: JoinHandle<()>,
}

impl FakeNode {
    pub async fn spawn(old: &MemoryDatabase, can_exec: bool, behavior: FakeBehavior) -> Self {
        let mut node = Node::new(NodeId::random(), can_exec);
        node.old_valid = true;
        node.new_valid = true;
        node.status = NODE_STATUS_OK.to_owned();

        let log = old.log().clone();
        let mut reader = LogReader::new();
        reader.start(&log).await.unwrap();
        send(&log, &node, MessageKind::Status { node: node.clone(), ack: None }).await;

        let fake = node.clone();
        let handle = tokio::spawn(async move {
            if behavior == FakeBehavior::Silent {
                return;
            }

            let mut ticks = 0u32;
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ticks += 1;

                for entry in reader.next_batch(&log).await.unwrap() {
                    match entry.message.kind {
                        MessageKind::Ping | MessageKind::Reset => {
                            let report = MessageKind::Status {
                                node: fake.clone(),
                                ack: Some(entry.message.id),
                            };
                            send(&log, &fake, report).await;
                        }
                        _ => {}
                    }
                }

                if ticks % 10 == 0 {
                    let heartbeat = MessageKind::Status {
                        node: fake.clone(),
                        ack: None,
                    };
                    send(&log, &fake, heartbeat).await;
                }
            }
        });

        Self { node, handle }
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn send(log: &MemoryMessageLog, node: &Node, kind: MessageKind) {
    log.append(&Message::new(node.id, kind)).await.unwrap();
}

/// Appends a message from `sender` to `log` as if another node wrote it.
pub async fn append_from(log: &MemoryMessageLog, sender: NodeId, kind: MessageKind) -> Message {
    let message = Message::new(sender, kind);
    log.append(&message).await.unwrap();

    message
}
