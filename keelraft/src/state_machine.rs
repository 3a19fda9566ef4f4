//! The pluggable state machine contract.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::model::LogIndex;

/// The replicated state machine driven by the Raft node.
///
/// The node owns its state machine exclusively and calls it from its serial
/// timeline only. `apply` is invoked exactly once per committed entry, in
/// strict log order, on every member of the group.
pub trait StateMachine: Send + 'static {
    /// The operation type replicated through the log.
    type Operation: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// What applying or querying an operation returns.
    type Response: Debug + Send + 'static;

    /// Applies a committed operation.
    ///
    /// Must be deterministic: two state machines that applied the same
    /// operations in the same order are in the same state and return the
    /// same responses.
    fn apply(&mut self, log_index: LogIndex, operation: &Self::Operation) -> Self::Response;

    /// Executes an operation read-only, without going through the log. Used
    /// for queries; must not mutate observable state.
    fn run_operation(&self, operation: &Self::Operation) -> Self::Response;

    /// Serializes a self-contained image of the state at `log_index` into
    /// one or more chunk payloads. After this returns, the caller may evict
    /// every log entry at or below `log_index`.
    ///
    /// Returns at least one chunk, even for an empty state.
    fn take_snapshot(&self, log_index: LogIndex) -> Vec<Vec<u8>>;

    /// Replaces the whole state with the snapshot in `chunks` (the payloads
    /// produced by [`take_snapshot`](Self::take_snapshot), in chunk order).
    ///
    /// Must be atomic: a partial install must never be observable. A decode
    /// failure is fatal to the node, like any persistence failure.
    fn install_snapshot(&mut self, log_index: LogIndex, chunks: &[Vec<u8>])
        -> Result<(), StoreError>;
}
