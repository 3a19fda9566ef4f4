use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::membership::GroupMembers;
use crate::model::Endpoint;
use crate::model::LogEntry;
use crate::model::LogIndex;
use crate::model::SnapshotChunk;
use crate::model::Term;

/// A message exchanged between members of one Raft group.
///
/// Messages are immutable values. The engine hands them to the transport by
/// value and never retains shared references to sent messages.
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub enum RaftMessage<O> {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntriesRequest(AppendEntriesRequest<O>),
    AppendEntriesSuccessResponse(AppendEntriesSuccessResponse),
    AppendEntriesFailureResponse(AppendEntriesFailureResponse),
    InstallSnapshotRequest(InstallSnapshotRequest),
    InstallSnapshotResponse(InstallSnapshotResponse),
    TriggerLeaderElectionRequest(TriggerLeaderElectionRequest),
}

impl<O> RaftMessage<O> {
    pub fn group_id(&self) -> &str {
        match self {
            Self::VoteRequest(m) => &m.group_id,
            Self::VoteResponse(m) => &m.group_id,
            Self::AppendEntriesRequest(m) => &m.group_id,
            Self::AppendEntriesSuccessResponse(m) => &m.group_id,
            Self::AppendEntriesFailureResponse(m) => &m.group_id,
            Self::InstallSnapshotRequest(m) => &m.group_id,
            Self::InstallSnapshotResponse(m) => &m.group_id,
            Self::TriggerLeaderElectionRequest(m) => &m.group_id,
        }
    }

    pub fn sender(&self) -> &Endpoint {
        match self {
            Self::VoteRequest(m) => &m.sender,
            Self::VoteResponse(m) => &m.sender,
            Self::AppendEntriesRequest(m) => &m.sender,
            Self::AppendEntriesSuccessResponse(m) => &m.sender,
            Self::AppendEntriesFailureResponse(m) => &m.sender,
            Self::InstallSnapshotRequest(m) => &m.sender,
            Self::InstallSnapshotResponse(m) => &m.sender,
            Self::TriggerLeaderElectionRequest(m) => &m.sender,
        }
    }

    pub fn term(&self) -> Term {
        match self {
            Self::VoteRequest(m) => m.term,
            Self::VoteResponse(m) => m.term,
            Self::AppendEntriesRequest(m) => m.term,
            Self::AppendEntriesSuccessResponse(m) => m.term,
            Self::AppendEntriesFailureResponse(m) => m.term,
            Self::InstallSnapshotRequest(m) => m.term,
            Self::InstallSnapshotResponse(m) => m.term,
            Self::TriggerLeaderElectionRequest(m) => m.term,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::VoteRequest(_) => "VoteRequest",
            Self::VoteResponse(_) => "VoteResponse",
            Self::AppendEntriesRequest(_) => "AppendEntriesRequest",
            Self::AppendEntriesSuccessResponse(_) => "AppendEntriesSuccessResponse",
            Self::AppendEntriesFailureResponse(_) => "AppendEntriesFailureResponse",
            Self::InstallSnapshotRequest(_) => "InstallSnapshotRequest",
            Self::InstallSnapshotResponse(_) => "InstallSnapshotResponse",
            Self::TriggerLeaderElectionRequest(_) => "TriggerLeaderElectionRequest",
        }
    }
}

impl<O> fmt::Display for RaftMessage<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} at term {}", self.kind(), self.sender(), self.term())
    }
}

/// Sent by a candidate to collect votes.
///
/// `sticky` is true when the election was prompted by the current leader via
/// [`TriggerLeaderElectionRequest`]; receivers then skip the
/// leader-stickiness window that otherwise suppresses disruptive candidates.
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct VoteRequest {
    pub group_id: String,
    pub sender: Endpoint,
    pub term: Term,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
    pub sticky: bool,
}

#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct VoteResponse {
    pub group_id: String,
    pub sender: Endpoint,
    pub term: Term,
    pub granted: bool,
}

/// Log replication request, also used as heartbeat when `entries` is empty.
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct AppendEntriesRequest<O> {
    pub group_id: String,
    pub sender: Endpoint,
    pub term: Term,
    pub previous_log_index: LogIndex,
    pub previous_log_term: Term,
    pub entries: Vec<LogEntry<O>>,
    pub leader_commit_index: LogIndex,
    /// Sequence number of the leader's current linearizable-query round.
    pub query_seq_no: u64,
    /// Per-follower flow control counter, echoed back in responses.
    pub flow_control_seq_no: u64,
}

#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct AppendEntriesSuccessResponse {
    pub group_id: String,
    pub sender: Endpoint,
    pub term: Term,
    pub last_log_index: LogIndex,
    pub query_seq_no: u64,
    pub flow_control_seq_no: u64,
}

/// Rejection of an [`AppendEntriesRequest`].
///
/// `expected_next_index` is a conservative hint: the follower's first index
/// when it has diverged below the leader's window, otherwise its last index
/// plus one (after truncating the conflicting tail).
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct AppendEntriesFailureResponse {
    pub group_id: String,
    pub sender: Endpoint,
    pub term: Term,
    pub expected_next_index: LogIndex,
    pub flow_control_seq_no: u64,
}

/// Carries a subset of the chunks of one snapshot to a lagging follower.
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub group_id: String,
    pub sender: Endpoint,
    pub term: Term,
    pub snapshot_index: LogIndex,
    pub snapshot_term: Term,
    pub chunk_count: u32,
    pub chunks: Vec<SnapshotChunk>,
    pub group_members: GroupMembers,
    pub query_seq_no: u64,
    pub flow_control_seq_no: u64,
}

/// Follower's progress report for a snapshot transfer: the chunk indices it
/// is still missing. An empty `requested` set means the snapshot is fully
/// installed on the sender of this response.
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub group_id: String,
    pub sender: Endpoint,
    pub term: Term,
    pub snapshot_index: LogIndex,
    pub requested: BTreeSet<u32>,
    pub flow_control_seq_no: u64,
}

/// Leader's instruction to a follower to start an election immediately,
/// used for graceful leader handoff.
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct TriggerLeaderElectionRequest {
    pub group_id: String,
    pub sender: Endpoint,
    pub term: Term,
}
