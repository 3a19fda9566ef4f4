//! In-memory window over the persisted Raft log.

mod log;


pub use log::RaftLog;
pub use log::SnapshotRecord;
