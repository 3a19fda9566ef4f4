//! keelraft — a Raft consensus engine with a pluggable replicated state
//! machine harness.
//!
//! The crate implements leader election with disruption avoidance, log
//! replication with flow control, chunked snapshotting, single-server
//! membership changes (including learners), linearizable / leader-local /
//! eventual-consistency queries, graceful leader handoff and group
//! termination, on top of three small integration contracts:
//!
//! - [`RaftStore`] — durable storage for terms, votes, log entries and
//!   snapshot chunks (an in-memory [`MemStore`] ships for tests),
//! - [`StateMachine`] — the replicated application state,
//! - [`Transport`] — a best-effort outbound message carrier.
//!
//! The protocol engine ([`RaftNode`]) is a synchronous single-threaded
//! actor. [`RaftGroup`] wraps it in a tokio task with a mailbox and timer
//! and exposes the async client API.
//!
//! # Quick start
//!
//! ```ignore
//! let node = RaftNodeBuilder::new("group-1", local, store, state_machine, transport)
//!     .with_config(RaftConfig::default())
//!     .with_initial_members(members)
//!     .build()?;
//! let group = RaftGroup::spawn(node);
//!
//! let outcome = group.submit(op).await?;
//! let read = group.query(op, QueryPolicy::Linearizable, 0).await?;
//! ```

pub mod config;
pub mod error;
pub mod membership;
pub mod model;
pub mod node;
pub mod quorum;
pub mod raft_log;
pub mod report;
pub mod runtime;
pub mod state_machine;
pub mod storage;
pub mod transport;

// Re-export the public API at the crate root.
pub use config::RaftConfig;
pub use error::ConfigError;
pub use error::RaftError;
pub use error::StoreError;
pub use membership::GroupMembers;
pub use membership::MembershipChangeMode;
pub use model::Endpoint;
pub use model::EntryKind;
pub use model::EntryPayload;
pub use model::LogEntry;
pub use model::LogIndex;
pub use model::RaftMessage;
pub use model::SnapshotChunk;
pub use model::Term;
pub use node::CommitOutcome;
pub use node::NodeStatus;
pub use node::QueryPolicy;
pub use node::RaftNode;
pub use node::RaftNodeBuilder;
pub use node::Role;
pub use raft_log::RaftLog;
pub use report::RaftLogStats;
pub use report::RaftNodeReport;
pub use runtime::RaftGroup;
pub use state_machine::StateMachine;
pub use storage::MemStore;
pub use storage::RaftStore;
pub use storage::RestoredSnapshot;
pub use storage::RestoredState;
pub use transport::Transport;
