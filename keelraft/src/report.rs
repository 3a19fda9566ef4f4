//! Observer-facing node status reports.

use std::sync::Arc;

use crate::membership::GroupMembers;
use crate::model::Endpoint;
use crate::model::LogIndex;
use crate::model::Term;
use crate::node::NodeStatus;
use crate::node::Role;

/// A point-in-time snapshot of a node's protocol state.
///
/// Published on a watch channel at the configured cadence and immediately
/// after every term, role, status or membership change. Reports are plain
/// values; reading them never touches protocol state.
#[derive(Debug, Clone)]
pub struct RaftNodeReport {
    pub group_id: String,
    pub endpoint: Endpoint,
    pub role: Role,
    pub status: NodeStatus,
    pub term: Term,
    pub leader: Option<Endpoint>,
    pub committed_members: Arc<GroupMembers>,
    pub effective_members: Arc<GroupMembers>,
    pub log: RaftLogStats,
}

/// Log and apply progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaftLogStats {
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub first_log_index: LogIndex,
    pub last_log_index: LogIndex,
    pub snapshot_index: LogIndex,
    /// Snapshots taken locally.
    pub take_snapshot_count: u64,
    /// Snapshots installed from a remote leader.
    pub install_snapshot_count: u64,
}
