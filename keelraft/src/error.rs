//! Error types surfaced by the Raft node and its collaborators.

use crate::model::Endpoint;
use crate::model::LogIndex;
use crate::node::NodeStatus;

/// Errors returned to callers of the client-facing node API.
///
/// Protocol-level conditions (rejected appends, stale responses) are resolved
/// internally and never surface here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RaftError {
    /// The node is not the leader. Carries the best-known leader endpoint,
    /// which may be absent right after an election started.
    #[error("not leader, known leader: {}", fmt_leader(.leader))]
    NotLeader { leader: Option<Endpoint> },

    /// The node is not in a state that accepts new entries, or a resource
    /// bound (pending futures, uncommitted tail) has been reached.
    #[error("cannot replicate: {reason}")]
    CannotReplicate { status: NodeStatus, reason: String },

    /// A caller-supplied precondition does not hold.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request was appended to the log but the node lost leadership
    /// before learning the commit outcome. The entry may or may not commit.
    #[error("operation appended at index {log_index} but commit outcome is unknown")]
    IndeterminateState { log_index: LogIndex },

    /// Durable storage failed. The node is moving to the terminated state.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A bounded internal wait expired, e.g. an eventual-consistency read
    /// waiting for the commit index, or a leadership transfer.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The node has terminated and no longer serves requests.
    #[error("raft node is terminated")]
    Terminated,
}

impl RaftError {
    pub(crate) fn not_leader(leader: Option<&Endpoint>) -> Self {
        Self::NotLeader {
            leader: leader.cloned(),
        }
    }

    pub(crate) fn cannot_replicate(status: NodeStatus, reason: impl ToString) -> Self {
        Self::CannotReplicate {
            status,
            reason: reason.to_string(),
        }
    }
}

fn fmt_leader(leader: &Option<Endpoint>) -> String {
    match leader {
        Some(l) => l.to_string(),
        None => "<none>".to_string(),
    }
}

/// Failure reported by a [`RaftStore`](crate::storage::RaftStore) or by a
/// state machine snapshot codec.
///
/// Any store error is fatal to the node that observes it: Raft correctness
/// depends on every acknowledged write being durable, so after a failed write
/// the node transitions to `Terminated` and fails all pending requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("store error: {message}")]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e)
    }
}

/// A rejected [`RaftConfig`](crate::config::RaftConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("election timeout range is empty: min {min:?} >= max {max:?}")]
    EmptyElectionTimeoutRange {
        min: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("leader heartbeat timeout {timeout:?} must exceed the heartbeat period {period:?}")]
    HeartbeatTimeoutTooSmall {
        timeout: std::time::Duration,
        period: std::time::Duration,
    },
}
