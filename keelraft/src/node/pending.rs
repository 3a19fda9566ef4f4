//! Client futures owned by the node until completed or failed.

use std::collections::BTreeMap;

use tokio::sync::oneshot;

use crate::error::RaftError;
use crate::membership::GroupMembers;
use crate::model::LogIndex;

/// Completion channel for a client-facing call.
pub(crate) type ReplyTo<T> = oneshot::Sender<Result<T, RaftError>>;

/// What a committed submission or query resolves to.
#[derive(Debug)]
pub struct CommitOutcome<R> {
    pub commit_index: LogIndex,
    pub result: R,
}

/// Requests appended to the log and awaiting commit, keyed by log index.
///
/// Entries leave the registry exactly once: completed on apply, or failed on
/// leadership loss, log truncation, store failure or termination.
pub(crate) struct PendingRegistry<R> {
    operations: BTreeMap<LogIndex, ReplyTo<CommitOutcome<R>>>,
    membership: Option<(LogIndex, ReplyTo<GroupMembers>)>,
    terminate: Option<(LogIndex, ReplyTo<LogIndex>)>,
}

impl<R> PendingRegistry<R> {
    pub fn new() -> Self {
        Self {
            operations: BTreeMap::new(),
            membership: None,
            terminate: None,
        }
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn register_operation(&mut self, index: LogIndex, reply: ReplyTo<CommitOutcome<R>>) {
        self.operations.insert(index, reply);
    }

    pub fn register_membership(&mut self, index: LogIndex, reply: ReplyTo<GroupMembers>) {
        self.membership = Some((index, reply));
    }

    pub fn register_terminate(&mut self, index: LogIndex, reply: ReplyTo<LogIndex>) {
        self.terminate = Some((index, reply));
    }

    pub fn complete_operation(&mut self, index: LogIndex, result: R) {
        if let Some(reply) = self.operations.remove(&index) {
            let _ = reply.send(Ok(CommitOutcome {
                commit_index: index,
                result,
            }));
        }
    }

    pub fn complete_membership(&mut self, index: LogIndex, members: GroupMembers) {
        if let Some((at, reply)) = self.membership.take() {
            if at == index {
                let _ = reply.send(Ok(members));
            } else {
                self.membership = Some((at, reply));
            }
        }
    }

    pub fn complete_terminate(&mut self, index: LogIndex) {
        if let Some((at, reply)) = self.terminate.take() {
            if at == index {
                let _ = reply.send(Ok(index));
            } else {
                self.terminate = Some((at, reply));
            }
        }
    }

    /// Fails every pending request. `error_of` receives the log index the
    /// request was appended at.
    pub fn fail_all(&mut self, error_of: impl Fn(LogIndex) -> RaftError) {
        for (index, reply) in std::mem::take(&mut self.operations) {
            let _ = reply.send(Err(error_of(index)));
        }
        if let Some((index, reply)) = self.membership.take() {
            let _ = reply.send(Err(error_of(index)));
        }
        if let Some((index, reply)) = self.terminate.take() {
            let _ = reply.send(Err(error_of(index)));
        }
    }

    /// Fails requests whose entries were truncated away, i.e. appended at
    /// `from_index` or above.
    pub fn fail_from(&mut self, from_index: LogIndex, error_of: impl Fn(LogIndex) -> RaftError) {
        let truncated = self.operations.split_off(&from_index);
        for (index, reply) in truncated {
            let _ = reply.send(Err(error_of(index)));
        }
        if let Some((index, reply)) = self.membership.take() {
            if index >= from_index {
                let _ = reply.send(Err(error_of(index)));
            } else {
                self.membership = Some((index, reply));
            }
        }
        if let Some((index, reply)) = self.terminate.take() {
            if index >= from_index {
                let _ = reply.send(Err(error_of(index)));
            } else {
                self.terminate = Some((index, reply));
            }
        }
    }
}
