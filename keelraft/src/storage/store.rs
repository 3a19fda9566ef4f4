use crate::error::StoreError;
use crate::membership::GroupMembers;
use crate::model::Endpoint;
use crate::model::LogEntry;
use crate::model::LogIndex;
use crate::model::SnapshotChunk;
use crate::model::Term;

/// Durable sink for the internal state of the consensus algorithm.
///
/// Only Raft's own state goes through this interface; the state machine's
/// business state is persisted exclusively via snapshot chunks.
///
/// A store is exclusively owned by one node for the node's lifetime and is
/// called from the node's serial timeline only, so implementations need no
/// internal locking.
///
/// ### Correctness requirements
///
/// - Mutations must be applied in call order. A later write must never
///   become durable before an earlier one.
/// - `flush()` returning means every prior mutation is durable. The node
///   never sends a vote, replies to an append, or advances commit state that
///   depends on a write before the corresponding `flush()` has returned.
/// - Log entries are persisted in strictly increasing index order starting
///   from the first index. A gap below the next entry may exist only when a
///   snapshot install preceded it.
pub trait RaftStore<O>: Send + 'static {
    /// Prepares the store. Called once, before any other method; idempotent.
    fn open(&mut self) -> Result<(), StoreError>;

    /// Reads back everything a restarted node needs. Returns `None` on the
    /// very first start, before [`persist_initial_members`] has run.
    ///
    /// Truncated log entries and incomplete snapshots must not be part of
    /// the result.
    ///
    /// [`persist_initial_members`]: Self::persist_initial_members
    fn load(&mut self) -> Result<Option<RestoredState<O>>, StoreError>;

    /// Persists the local identity and the bootstrap membership. Called at
    /// most once per store, on first bootstrap. Durable on return.
    fn persist_initial_members(
        &mut self,
        local: &Endpoint,
        initial: &GroupMembers,
    ) -> Result<(), StoreError>;

    /// Persists the current term and the endpoint voted for in that term.
    /// Must be durable (flushed) before any vote for that term leaves the
    /// node.
    fn persist_term(&mut self, term: Term, voted_for: Option<&Endpoint>)
        -> Result<(), StoreError>;

    /// Persists one log entry. Consecutive calls carry consecutive indices;
    /// after [`truncate_log_entries_from`](Self::truncate_log_entries_from)
    /// the truncated index is reused by the next call.
    fn persist_log_entry(&mut self, entry: &LogEntry<O>) -> Result<(), StoreError>;

    /// Persists one snapshot chunk. A snapshot is complete once all
    /// `chunk_count` chunks for its index are persisted and a `flush()` has
    /// returned; the store may then evict log entries at or below the
    /// snapshot index together with any older snapshots.
    fn persist_snapshot_chunk(&mut self, chunk: &SnapshotChunk) -> Result<(), StoreError>;

    /// Removes persisted log entries with `index >= log_index`. The
    /// truncation depth is bounded by the configured maximum uncommitted
    /// entry count plus one, counted from the tail.
    fn truncate_log_entries_from(&mut self, log_index: LogIndex) -> Result<(), StoreError>;

    /// Discards chunks of incomplete snapshots taken at or below
    /// `log_index`. Complete snapshots are not touched.
    fn truncate_snapshot_chunks_until(&mut self, log_index: LogIndex) -> Result<(), StoreError>;

    /// Blocks until every buffered mutation is durable.
    fn flush(&mut self) -> Result<(), StoreError>;
}

/// Everything a node restores from its store on restart.
#[derive(Debug, Clone)]
pub struct RestoredState<O> {
    pub local: Endpoint,
    pub initial_members: GroupMembers,
    pub term: Term,
    pub voted_for: Option<Endpoint>,
    /// The latest complete snapshot, if any.
    pub snapshot: Option<RestoredSnapshot>,
    /// Log entries above the snapshot, in index order.
    pub entries: Vec<LogEntry<O>>,
}

/// A complete snapshot read back from the store.
#[derive(Debug, Clone)]
pub struct RestoredSnapshot {
    pub index: LogIndex,
    pub term: Term,
    pub group_members: GroupMembers,
    pub chunks: Vec<SnapshotChunk>,
}
