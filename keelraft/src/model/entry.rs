use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::membership::GroupMembers;
use crate::membership::UpdateGroupMembersOp;

/// Election epoch. Monotonically non-decreasing, starts at 0.
pub type Term = u64;

/// Position in the replicated log. The first entry has index 1; index 0 is
/// the position before any entry.
pub type LogIndex = u64;

/// What a log entry carries.
///
/// `Operation` entries are handed to the state machine on commit; the other
/// variants are consumed by the protocol itself.
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub enum EntryPayload<O> {
    /// Appended by a freshly elected leader to commit its term.
    Noop,

    /// Same role as `Noop`, appended instead when the new-term-operation
    /// feature is enabled so that state machines can observe leader changes.
    NewTerm,

    /// An application operation to apply on commit.
    Operation(O),

    /// A single-server membership change. Takes effect as the node's
    /// effective membership as soon as it is appended.
    MembershipChange(UpdateGroupMembersOp),

    /// Marks the whole group for termination once committed.
    TerminateGroup,
}

/// Discriminant of [`EntryPayload`], used in reports and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(derive_more::Display)]
pub enum EntryKind {
    #[display("Noop")]
    Noop,
    #[display("NewTerm")]
    NewTerm,
    #[display("Apply")]
    Apply,
    #[display("MembershipChange")]
    MembershipChange,
    #[display("TerminateGroup")]
    TerminateGroup,
}

/// A single Raft log entry. Immutable once persisted.
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct LogEntry<O> {
    pub index: LogIndex,
    pub term: Term,
    pub payload: EntryPayload<O>,
}

impl<O> LogEntry<O> {
    pub fn kind(&self) -> EntryKind {
        match &self.payload {
            EntryPayload::Noop => EntryKind::Noop,
            EntryPayload::NewTerm => EntryKind::NewTerm,
            EntryPayload::Operation(_) => EntryKind::Apply,
            EntryPayload::MembershipChange(_) => EntryKind::MembershipChange,
            EntryPayload::TerminateGroup => EntryKind::TerminateGroup,
        }
    }
}

impl<O> fmt::Display for LogEntry<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}:{}", self.term, self.index, self.kind())
    }
}

/// One piece of a snapshot.
///
/// A snapshot at `snapshot_index` is split into `chunk_count` chunks. Chunks
/// may arrive in any order on the wire; the snapshot is complete only when
/// all `chunk_count` of them are present. Every chunk carries the group
/// members as of the snapshot index, so a single chunk is enough to learn
/// the membership the snapshot was taken under.
#[derive(Debug, Clone)]
#[derive(Serialize, Deserialize)]
pub struct SnapshotChunk {
    pub snapshot_index: LogIndex,
    pub snapshot_term: Term,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub payload: Vec<u8>,
    pub group_members: GroupMembers,
}

impl fmt::Display for SnapshotChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snapshot {}-{} chunk {}/{}",
            self.snapshot_term, self.snapshot_index, self.chunk_index, self.chunk_count
        )
    }
}
