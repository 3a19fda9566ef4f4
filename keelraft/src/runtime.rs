//! The group runtime: owns a node, its mailbox and its timer.
//!
//! The node itself is a synchronous actor; this module gives it a serial
//! timeline on a tokio task. Callers interact through the cloneable
//! [`RaftGroup`] handle, whose async methods enqueue an event and await the
//! node's reply. Inbound transport messages are pushed into the same
//! mailbox, so every state transition is totally ordered.

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;

use crate::error::RaftError;
use crate::membership::GroupMembers;
use crate::membership::MembershipChangeMode;
use crate::model::Endpoint;
use crate::model::LogIndex;
use crate::model::RaftMessage;
use crate::node::CommitOutcome;
use crate::node::NodeStatus;
use crate::node::QueryPolicy;
use crate::node::RaftNode;
use crate::report::RaftNodeReport;
use crate::state_machine::StateMachine;
use crate::storage::RaftStore;
use crate::transport::Transport;

/// Mailbox depth. Beyond it, inbound transport messages are dropped (the
/// protocol tolerates loss) and client calls wait for space.
const MAILBOX_CAPACITY: usize = 4096;

enum NodeEvent<SM: StateMachine> {
    Message(RaftMessage<SM::Operation>),
    Submit {
        operation: SM::Operation,
        reply: oneshot::Sender<Result<CommitOutcome<SM::Response>, RaftError>>,
    },
    Query {
        operation: SM::Operation,
        policy: QueryPolicy,
        min_commit_index: LogIndex,
        reply: oneshot::Sender<Result<CommitOutcome<SM::Response>, RaftError>>,
    },
    ChangeMembership {
        endpoint: Endpoint,
        mode: MembershipChangeMode,
        expected_commit_index: LogIndex,
        reply: oneshot::Sender<Result<GroupMembers, RaftError>>,
    },
    TransferLeadership {
        target: Endpoint,
        reply: oneshot::Sender<Result<(), RaftError>>,
    },
    TerminateGroup {
        reply: oneshot::Sender<Result<LogIndex, RaftError>>,
    },
    Report {
        reply: oneshot::Sender<RaftNodeReport>,
    },
    Shutdown,
}

/// Handle to a running Raft group member.
///
/// Cheap to clone; all clones feed the same node. Dropping every handle does
/// not stop the node; use [`shutdown`](Self::shutdown).
pub struct RaftGroup<SM: StateMachine> {
    mailbox: mpsc::Sender<NodeEvent<SM>>,
    reports: watch::Receiver<RaftNodeReport>,
}

impl<SM: StateMachine> Clone for RaftGroup<SM> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            reports: self.reports.clone(),
        }
    }
}

impl<SM: StateMachine> RaftGroup<SM> {
    /// Spawns the node's event loop on the current tokio runtime and
    /// returns the handle to it.
    pub fn spawn<ST, TP>(node: RaftNode<SM, ST, TP>) -> Self
    where
        ST: RaftStore<SM::Operation>,
        TP: Transport<SM::Operation>,
    {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let reports = node.subscribe_reports();
        tokio::spawn(run_node(node, rx));
        Self {
            mailbox: tx,
            reports,
        }
    }

    /// Pushes an inbound transport message into the node's mailbox.
    /// Non-blocking; drops the message when the mailbox is full.
    pub fn handle_message(&self, message: RaftMessage<SM::Operation>) {
        let _ = self.mailbox.try_send(NodeEvent::Message(message));
    }

    /// Replicates an operation and waits for it to commit and apply.
    pub async fn submit(
        &self,
        operation: SM::Operation,
    ) -> Result<CommitOutcome<SM::Response>, RaftError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeEvent::Submit { operation, reply }).await?;
        rx.await.map_err(|_| RaftError::Terminated)?
    }

    /// Runs a read-only operation under `policy`. `min_commit_index` is
    /// only meaningful for [`QueryPolicy::EventualConsistency`].
    pub async fn query(
        &self,
        operation: SM::Operation,
        policy: QueryPolicy,
        min_commit_index: LogIndex,
    ) -> Result<CommitOutcome<SM::Response>, RaftError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeEvent::Query {
            operation,
            policy,
            min_commit_index,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RaftError::Terminated)?
    }

    /// Single-server membership change; resolves to the new committed
    /// membership.
    pub async fn change_membership(
        &self,
        endpoint: Endpoint,
        mode: MembershipChangeMode,
        expected_commit_index: LogIndex,
    ) -> Result<GroupMembers, RaftError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeEvent::ChangeMembership {
            endpoint,
            mode,
            expected_commit_index,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RaftError::Terminated)?
    }

    /// Gracefully hands leadership to `target`.
    pub async fn transfer_leadership(&self, target: Endpoint) -> Result<(), RaftError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeEvent::TransferLeadership { target, reply }).await?;
        rx.await.map_err(|_| RaftError::Terminated)?
    }

    /// Terminates the whole group; resolves to the terminate entry's commit
    /// index.
    pub async fn terminate_group(&self) -> Result<LogIndex, RaftError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeEvent::TerminateGroup { reply }).await?;
        rx.await.map_err(|_| RaftError::Terminated)?
    }

    /// Fetches a fresh report from the node.
    pub async fn report(&self) -> Result<RaftNodeReport, RaftError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeEvent::Report { reply }).await?;
        rx.await.map_err(|_| RaftError::Terminated)
    }

    /// The latest published report, without a round trip to the node.
    pub fn last_report(&self) -> RaftNodeReport {
        self.reports.borrow().clone()
    }

    /// Watch side of the report channel.
    pub fn report_watcher(&self) -> watch::Receiver<RaftNodeReport> {
        self.reports.clone()
    }

    /// Stops the node's event loop. Local shutdown only; the rest of the
    /// group keeps running.
    pub async fn shutdown(&self) {
        let _ = self.mailbox.send(NodeEvent::Shutdown).await;
    }

    async fn send(&self, event: NodeEvent<SM>) -> Result<(), RaftError> {
        self.mailbox.send(event).await.map_err(|_| RaftError::Terminated)
    }
}

async fn run_node<SM, ST, TP>(mut node: RaftNode<SM, ST, TP>, mut rx: mpsc::Receiver<NodeEvent<SM>>)
where
    SM: StateMachine,
    ST: RaftStore<SM::Operation>,
    TP: Transport<SM::Operation>,
{
    let mut ticker = tokio::time::interval(node.config().tick_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(NodeEvent::Shutdown) | None => break,
                    Some(event) => dispatch(&mut node, event),
                }
            }
            _ = ticker.tick() => {
                node.tick();
            }
        }

        if node.status() == NodeStatus::Terminated {
            break;
        }
    }
    tracing::info!(endpoint = %node.local_endpoint(), "raft node event loop stopped");
}

fn dispatch<SM, ST, TP>(node: &mut RaftNode<SM, ST, TP>, event: NodeEvent<SM>)
where
    SM: StateMachine,
    ST: RaftStore<SM::Operation>,
    TP: Transport<SM::Operation>,
{
    match event {
        NodeEvent::Message(message) => node.handle_message(message),
        NodeEvent::Submit { operation, reply } => node.submit(operation, reply),
        NodeEvent::Query {
            operation,
            policy,
            min_commit_index,
            reply,
        } => node.query(operation, policy, min_commit_index, reply),
        NodeEvent::ChangeMembership {
            endpoint,
            mode,
            expected_commit_index,
            reply,
        } => node.change_membership(endpoint, mode, expected_commit_index, reply),
        NodeEvent::TransferLeadership { target, reply } => node.transfer_leadership(target, reply),
        NodeEvent::TerminateGroup { reply } => node.terminate_group(reply),
        NodeEvent::Report { reply } => {
            let _ = reply.send(node.report());
        }
        NodeEvent::Shutdown => unreachable!("handled by the event loop"),
    }
}
