//! Query execution policies and the per-node query bookkeeping.

use std::collections::VecDeque;

use crate::model::LogIndex;
use crate::node::pending::CommitOutcome;
use crate::node::pending::ReplyTo;

/// How a query may be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(derive_more::Display)]
pub enum QueryPolicy {
    /// Execute on the leader after a read barrier: a majority must confirm
    /// the leader's authority, and the commit index must reach the barrier
    /// recorded at submission. The observed state reflects every write
    /// committed before the query was submitted.
    #[display("Linearizable")]
    Linearizable,

    /// Execute on the leader immediately, without a barrier. Cheap, but can
    /// observe stale state if this leader has been deposed without noticing
    /// yet.
    #[display("LeaderLocal")]
    LeaderLocal,

    /// Execute on any member once its commit index reaches the
    /// caller-supplied floor, waiting a bounded time for it.
    #[display("EventualConsistency")]
    EventualConsistency,
}

/// Linearizable rounds awaiting their barrier, plus parked
/// eventual-consistency reads. Lives inside the node.
pub(crate) struct QueryState<O, R> {
    /// Highest linearizable round handed out. Attached to every append
    /// request; followers echo it in success responses.
    pub seq_no: u64,
    /// Linearizable queries in round order.
    pub rounds: VecDeque<LinearizableQuery<O, R>>,
    /// Eventual-consistency reads waiting for the commit index.
    pub waiting: Vec<EventualQuery<O, R>>,
}

impl<O, R> QueryState<O, R> {
    pub fn new() -> Self {
        Self {
            seq_no: 0,
            rounds: VecDeque::new(),
            waiting: Vec::new(),
        }
    }
}

pub(crate) struct LinearizableQuery<O, R> {
    pub required_seq_no: u64,
    pub barrier_index: LogIndex,
    pub operation: O,
    pub reply: ReplyTo<CommitOutcome<R>>,
}

pub(crate) struct EventualQuery<O, R> {
    pub min_commit_index: LogIndex,
    pub deadline_tick: u64,
    pub operation: O,
    pub reply: ReplyTo<CommitOutcome<R>>,
}
