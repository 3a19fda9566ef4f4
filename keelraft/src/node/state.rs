//! Volatile per-node protocol state.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::membership::GroupMembers;
use crate::model::Endpoint;
use crate::model::LogIndex;
use crate::model::SnapshotChunk;
use crate::model::Term;
use crate::node::pending::ReplyTo;

/// The role a node currently plays in its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(derive_more::Display)]
pub enum Role {
    #[display("Follower")]
    Follower,
    #[display("Candidate")]
    Candidate,
    #[display("Leader")]
    Leader,
    /// Receives replication but is not counted toward election or commit
    /// quorums until promoted.
    #[display("Learner")]
    Learner,
}

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(derive_more::Display)]
pub enum NodeStatus {
    /// Constructed but not opened yet.
    #[display("Initial")]
    Initial,
    /// Serving the protocol.
    #[display("Active")]
    Active,
    /// An uncommitted membership change is in the log.
    #[display("UpdatingMembership")]
    UpdatingMembership,
    /// An uncommitted terminate marker is in the log; new appends are
    /// rejected.
    #[display("TerminatingGroup")]
    TerminatingGroup,
    /// Terminal: the group terminated, the node was shut down, or its store
    /// failed.
    #[display("Terminated")]
    Terminated,
}

/// Mutable protocol fields of one node. Owned by [`RaftNode`] and only ever
/// touched from its serial timeline.
///
/// [`RaftNode`]: crate::node::RaftNode
pub(crate) struct NodeState {
    pub term: Term,
    pub voted_for: Option<Endpoint>,
    pub role: Role,
    pub status: NodeStatus,
    pub leader: Option<Endpoint>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub candidate: Option<CandidateState>,
    pub leader_state: Option<LeaderState>,
    /// In-flight graceful leader handoff. Survives the local step-down so
    /// its completion can be observed from follower state.
    pub transfer: Option<LeadershipTransfer>,
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            term: 0,
            voted_for: None,
            role: Role::Follower,
            status: NodeStatus::Initial,
            leader: None,
            commit_index: 0,
            last_applied: 0,
            candidate: None,
            leader_state: None,
            transfer: None,
        }
    }
}

/// Votes collected by a candidate in the current term.
pub(crate) struct CandidateState {
    pub granted: BTreeSet<Endpoint>,
}

/// Leader-only bookkeeping, dropped on step-down.
pub(crate) struct LeaderState {
    pub followers: BTreeMap<Endpoint, FollowerProgress>,
    /// Index of the Noop/NewTerm entry this leader appended on election.
    pub term_start_index: LogIndex,
}

impl LeaderState {
    pub fn new(term_start_index: LogIndex) -> Self {
        Self {
            followers: BTreeMap::new(),
            term_start_index,
        }
    }
}

/// Leader-side replication progress for one peer.
pub(crate) struct FollowerProgress {
    /// Index of the next entry to send.
    pub next_index: LogIndex,
    /// Highest index known replicated on the peer. Monotonic.
    pub match_index: LogIndex,
    /// Counter attached to every request to this peer.
    pub flow_control_seq_no: u64,
    /// Highest sequence number seen back from the peer.
    pub last_acked_seq_no: u64,
    /// Sequence number of an outstanding entry-carrying or snapshot request
    /// plus the tick at which to stop waiting for its response.
    pub in_flight: Option<InFlight>,
    /// Tick of the last response from this peer, for the leader's quorum
    /// heartbeat check.
    pub last_response_tick: u64,
    /// Highest linearizable-query round the peer has confirmed.
    pub query_ack_seq_no: u64,
    /// Snapshot transfer in progress, if any.
    pub snapshot_transfer: Option<SnapshotTransfer>,
}

impl FollowerProgress {
    pub fn new(next_index: LogIndex, now: u64) -> Self {
        Self {
            next_index,
            match_index: 0,
            flow_control_seq_no: 0,
            last_acked_seq_no: 0,
            in_flight: None,
            last_response_tick: now,
            query_ack_seq_no: 0,
            snapshot_transfer: None,
        }
    }
}

pub(crate) struct InFlight {
    pub seq_no: u64,
    pub give_up_tick: u64,
}

pub(crate) struct SnapshotTransfer {
    pub snapshot_index: LogIndex,
}

/// A graceful handoff requested via `transfer_leadership`.
pub(crate) struct LeadershipTransfer {
    pub target: Endpoint,
    pub start_term: Term,
    pub deadline_tick: u64,
    pub triggered: bool,
    pub reply: Option<ReplyTo<()>>,
}

/// Chunks collected so far for a snapshot being installed from the leader.
pub(crate) struct PartialSnapshot {
    pub index: LogIndex,
    pub term: Term,
    pub chunk_count: u32,
    pub group_members: GroupMembers,
    pub received: BTreeMap<u32, SnapshotChunk>,
}

impl PartialSnapshot {
    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.chunk_count
    }

    pub fn missing(&self) -> BTreeSet<u32> {
        (0..self.chunk_count).filter(|i| !self.received.contains_key(i)).collect()
    }
}

/// Tick-denominated timers. The runtime pulses [`RaftNode::tick`] at the
/// configured interval; everything time-based in the engine is counted in
/// those pulses, which keeps the protocol deterministic under test.
///
/// [`RaftNode::tick`]: crate::node::RaftNode::tick
pub(crate) struct Timers {
    pub tick_count: u64,
    pub election_deadline: u64,
    pub heartbeat_due: u64,
    pub report_due: u64,
    /// Tick of the last valid leader contact, for vote stickiness.
    pub leader_heard_tick: Option<u64>,

    pub election_min_ticks: u64,
    pub election_max_ticks: u64,
    pub heartbeat_ticks: u64,
    pub heartbeat_timeout_ticks: u64,
    pub report_ticks: u64,
}
