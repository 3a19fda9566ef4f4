//! Immutable value types that hit the wire and the persistent store.

mod endpoint;
mod entry;
mod message;

pub use endpoint::Endpoint;
pub use entry::EntryKind;
pub use entry::EntryPayload;
pub use entry::LogEntry;
pub use entry::LogIndex;
pub use entry::SnapshotChunk;
pub use entry::Term;
pub use message::AppendEntriesFailureResponse;
pub use message::AppendEntriesRequest;
pub use message::AppendEntriesSuccessResponse;
pub use message::InstallSnapshotRequest;
pub use message::InstallSnapshotResponse;
pub use message::RaftMessage;
pub use message::TriggerLeaderElectionRequest;
pub use message::VoteRequest;
pub use message::VoteResponse;
