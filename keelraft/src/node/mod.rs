//! The Raft node engine: a single-threaded cooperative actor driven by
//! messages, timer ticks and client calls.
//!
//! All state transitions run on one serial timeline. The async
//! [`RaftGroup`](crate::runtime::RaftGroup) runtime owns a node and feeds it
//! one event at a time from its mailbox; nothing in this module locks.

mod api;
mod builder;
mod election;
mod pending;
mod query;
mod replication;
mod snapshot;
mod state;


use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use tokio::sync::watch;

pub use builder::RaftNodeBuilder;
pub use pending::CommitOutcome;
pub use query::QueryPolicy;
pub use state::NodeStatus;
pub use state::Role;

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::error::StoreError;
use crate::membership::GroupMembers;
use crate::membership::MembershipState;
use crate::model::Endpoint;
use crate::model::EntryPayload;
use crate::model::LogEntry;
use crate::model::LogIndex;
use crate::model::RaftMessage;
use crate::model::SnapshotChunk;
use crate::model::Term;
use crate::node::pending::PendingRegistry;
use crate::node::query::QueryState;
use crate::node::state::NodeState;
use crate::node::state::PartialSnapshot;
use crate::node::state::Timers;
use crate::raft_log::RaftLog;
use crate::report::RaftLogStats;
use crate::report::RaftNodeReport;
use crate::state_machine::StateMachine;
use crate::storage::RaftStore;
use crate::transport::Transport;

/// A single member of a Raft group.
///
/// The node exclusively owns its log, state machine and store handle.
/// Methods are synchronous and must be called from one thread; the runtime
/// in [`crate::runtime`] provides the mailbox and timer plumbing around it.
pub struct RaftNode<SM, ST, TP>
where
    SM: StateMachine,
    ST: RaftStore<SM::Operation>,
    TP: Transport<SM::Operation>,
{
    group_id: String,
    local: Endpoint,
    config: Arc<RaftConfig>,
    store: ST,
    sm: SM,
    transport: TP,
    log: RaftLog<SM::Operation>,
    membership: MembershipState,
    state: NodeState,
    timers: Timers,
    pending: PendingRegistry<SM::Response>,
    queries: QueryState<SM::Operation, SM::Response>,
    partial_snapshot: Option<PartialSnapshot>,
    rng: StdRng,
    report_tx: watch::Sender<RaftNodeReport>,
    take_snapshot_count: u64,
    install_snapshot_count: u64,
}

impl<SM, ST, TP> RaftNode<SM, ST, TP>
where
    SM: StateMachine,
    ST: RaftStore<SM::Operation>,
    TP: Transport<SM::Operation>,
{
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    pub fn status(&self) -> NodeStatus {
        self.state.status
    }

    pub fn role(&self) -> Role {
        self.state.role
    }

    pub fn term(&self) -> Term {
        self.state.term
    }

    /// Receiver side of the report channel. Holds the latest published
    /// report; see [`RaftNodeReport`].
    pub fn subscribe_reports(&self) -> watch::Receiver<RaftNodeReport> {
        self.report_tx.subscribe()
    }

    /// Feeds one inbound message into the node.
    pub fn handle_message(&mut self, message: RaftMessage<SM::Operation>) {
        if self.state.status == NodeStatus::Terminated {
            return;
        }
        if message.group_id() != self.group_id {
            tracing::warn!(
                group_id = %message.group_id(),
                "dropping message for foreign group"
            );
            return;
        }
        tracing::trace!(message = %message, "handling");

        // Store failures inside the handlers terminate the node; there is
        // nothing further to do with the error here.
        match message {
            RaftMessage::VoteRequest(m) => {
                let _ = self.handle_vote_request(m);
            }
            RaftMessage::VoteResponse(m) => {
                let _ = self.handle_vote_response(m);
            }
            RaftMessage::AppendEntriesRequest(m) => {
                let _ = self.handle_append_entries_request(m);
            }
            RaftMessage::AppendEntriesSuccessResponse(m) => {
                let _ = self.handle_append_entries_success(m);
            }
            RaftMessage::AppendEntriesFailureResponse(m) => {
                let _ = self.handle_append_entries_failure(m);
            }
            RaftMessage::InstallSnapshotRequest(m) => {
                let _ = self.handle_install_snapshot_request(m);
            }
            RaftMessage::InstallSnapshotResponse(m) => {
                let _ = self.handle_install_snapshot_response(m);
            }
            RaftMessage::TriggerLeaderElectionRequest(m) => {
                let _ = self.handle_trigger_leader_election(m);
            }
        }
    }

    /// Advances the node's timers by one pulse.
    pub fn tick(&mut self) {
        if self.state.status == NodeStatus::Terminated {
            return;
        }
        self.timers.tick_count += 1;
        let now = self.timers.tick_count;

        match self.state.role {
            Role::Leader => {
                if now >= self.timers.heartbeat_due {
                    self.timers.heartbeat_due = now + self.timers.heartbeat_ticks;
                    self.broadcast_append_entries();
                }
                self.check_leader_quorum();
            }
            Role::Follower | Role::Candidate => {
                if now >= self.timers.election_deadline {
                    let _ = self.start_election(false);
                }
            }
            Role::Learner => {
                // Learners never campaign.
                if now >= self.timers.election_deadline {
                    self.reset_election_deadline();
                }
            }
        }

        self.expire_leadership_transfer(now);
        self.expire_eventual_queries(now);

        if now >= self.timers.report_due {
            self.timers.report_due = now + self.timers.report_ticks;
            self.publish_report();
        }
    }

    /// Point-in-time view of the node's protocol state.
    pub fn report(&self) -> RaftNodeReport {
        RaftNodeReport {
            group_id: self.group_id.clone(),
            endpoint: self.local.clone(),
            role: self.state.role,
            status: self.state.status,
            term: self.state.term,
            leader: self.state.leader.clone(),
            committed_members: self.membership.committed().clone(),
            effective_members: self.membership.effective().clone(),
            log: RaftLogStats {
                commit_index: self.state.commit_index,
                last_applied: self.state.last_applied,
                first_log_index: self.log.first_index(),
                last_log_index: self.log.last_index(),
                snapshot_index: self.log.snapshot_index(),
                take_snapshot_count: self.take_snapshot_count,
                install_snapshot_count: self.install_snapshot_count,
            },
        }
    }

    // --- shared transitions -------------------------------------------------

    pub(crate) fn now(&self) -> u64 {
        self.timers.tick_count
    }

    /// The role this node plays when it is not leading or campaigning.
    pub(crate) fn follower_role(&self) -> Role {
        if self.membership.effective().is_voting_member(&self.local) {
            Role::Follower
        } else {
            Role::Learner
        }
    }

    pub(crate) fn reset_election_deadline(&mut self) {
        let timeout = self
            .rng
            .gen_range(self.timers.election_min_ticks..=self.timers.election_max_ticks);
        self.timers.election_deadline = self.timers.tick_count + timeout;
    }

    /// Adopts a higher term and falls back to follower. Persists the new
    /// term (with no vote) before anything depending on it leaves the node.
    pub(crate) fn step_down_to_term(&mut self, term: Term) -> Result<(), StoreError> {
        debug_assert!(term > self.state.term);
        tracing::info!(
            old_term = self.state.term,
            new_term = term,
            "stepping down: observed higher term"
        );
        self.state.term = term;
        self.state.voted_for = None;
        self.store_persist_term()?;
        self.store_flush()?;
        self.to_follower();
        self.publish_report();
        Ok(())
    }

    /// Leaves leadership (or candidacy) without changing the term.
    pub(crate) fn step_down_same_term(&mut self) {
        self.to_follower();
        self.publish_report();
    }

    fn to_follower(&mut self) {
        let was_leader = self.state.leader_state.is_some();
        self.state.role = self.follower_role();
        self.state.leader = None;
        self.state.candidate = None;
        self.state.leader_state = None;
        self.reset_election_deadline();

        if was_leader {
            // Appended but uncommitted requests now have an unknown fate.
            self.pending
                .fail_all(|log_index| RaftError::IndeterminateState { log_index });
            self.fail_linearizable_queries();
        }
    }

    /// Records a valid leader contact for the current term.
    pub(crate) fn record_leader(&mut self, endpoint: Endpoint) {
        self.timers.leader_heard_tick = Some(self.timers.tick_count);
        self.reset_election_deadline();

        let changed = self.state.leader.as_ref() != Some(&endpoint);
        if changed {
            tracing::info!(leader = %endpoint, term = self.state.term, "following leader");
            self.state.leader = Some(endpoint);
            self.complete_transfer_if_done();
            self.publish_report();
        }
    }

    // --- log mutation -------------------------------------------------------

    /// Appends a new entry as leader: assigns index and term, persists it
    /// durably, then adds it to the in-memory window.
    pub(crate) fn append_new_entry(
        &mut self,
        payload: EntryPayload<SM::Operation>,
    ) -> Result<LogIndex, StoreError> {
        let index = self.log.last_index() + 1;
        let entry = LogEntry {
            index,
            term: self.state.term,
            payload,
        };
        self.store_persist_entry(&entry)?;
        self.store_flush()?;
        self.react_to_appended_payload(&entry);
        self.log.append(entry);
        Ok(index)
    }

    /// Appends an entry received from the leader. Persists it; the caller
    /// flushes once per request before replying.
    pub(crate) fn append_replicated_entry(
        &mut self,
        entry: LogEntry<SM::Operation>,
    ) -> Result<(), StoreError> {
        self.store_persist_entry(&entry)?;
        self.react_to_appended_payload(&entry);
        self.log.append(entry);
        Ok(())
    }

    /// Protocol payloads take effect at append time, not commit time.
    fn react_to_appended_payload(&mut self, entry: &LogEntry<SM::Operation>) {
        match &entry.payload {
            EntryPayload::MembershipChange(op) => {
                let effective = op.at_index(entry.index);
                tracing::info!(members = %effective, "effective membership changed");
                self.membership.set_effective(effective);
                if self.state.status == NodeStatus::Active {
                    self.state.status = NodeStatus::UpdatingMembership;
                }
                if self.state.role == Role::Follower || self.state.role == Role::Learner {
                    self.state.role = self.follower_role();
                }
                self.update_leader_roster();
            }
            EntryPayload::TerminateGroup => {
                tracing::info!(index = entry.index, "group termination appended");
                self.state.status = NodeStatus::TerminatingGroup;
            }
            _ => {}
        }
    }

    /// Removes the conflicting tail `[index ..]` from the log and the store,
    /// then rolls back anything that took effect at append time.
    pub(crate) fn truncate_log_from(&mut self, index: LogIndex) -> Result<(), StoreError> {
        debug_assert!(index > self.state.commit_index, "must not truncate committed entries");
        let removed = self.log.truncate_from(index);
        if removed.is_empty() {
            return Ok(());
        }
        tracing::info!(from = index, count = removed.len(), "truncating conflicting tail");
        self.store_truncate_entries_from(index)?;

        self.pending
            .fail_from(index, |log_index| RaftError::IndeterminateState { log_index });

        let mut membership_truncated = false;
        let mut terminate_truncated = false;
        for entry in &removed {
            match entry.payload {
                EntryPayload::MembershipChange(_) => membership_truncated = true,
                EntryPayload::TerminateGroup => terminate_truncated = true,
                _ => {}
            }
        }
        if membership_truncated {
            let previous = self.latest_membership_in_window();
            self.membership.revert_effective(previous);
            self.state.role = match self.state.role {
                Role::Leader => Role::Leader,
                Role::Candidate => Role::Candidate,
                _ => self.follower_role(),
            };
            if self.state.status == NodeStatus::UpdatingMembership
                && !self.membership.change_in_progress()
            {
                self.state.status = NodeStatus::Active;
            }
            self.update_leader_roster();
        }
        if terminate_truncated && self.state.status == NodeStatus::TerminatingGroup {
            tracing::info!("termination entry truncated, group active again");
            self.state.status = if self.membership.change_in_progress() {
                NodeStatus::UpdatingMembership
            } else {
                NodeStatus::Active
            };
        }
        Ok(())
    }

    /// Re-derives the lifecycle status from the log window after entries
    /// were dropped wholesale (snapshot install).
    pub(crate) fn recompute_termination_status(&mut self) {
        if self.state.status == NodeStatus::Terminated {
            return;
        }
        let mut has_terminate = false;
        for index in self.log.first_index()..=self.log.last_index() {
            if let Some(entry) = self.log.get(index) {
                if matches!(entry.payload, EntryPayload::TerminateGroup) {
                    has_terminate = true;
                    break;
                }
            }
        }
        self.state.status = if has_terminate {
            NodeStatus::TerminatingGroup
        } else if self.membership.change_in_progress() {
            NodeStatus::UpdatingMembership
        } else {
            NodeStatus::Active
        };
    }

    /// The newest membership record still covered by the log window: an
    /// uncommitted membership entry if one survives, else the committed one.
    pub(crate) fn latest_membership_in_window(&self) -> GroupMembers {
        for index in (self.log.first_index()..=self.log.last_index()).rev() {
            if let Some(entry) = self.log.get(index) {
                if let EntryPayload::MembershipChange(op) = &entry.payload {
                    return op.at_index(index);
                }
            }
        }
        (**self.membership.committed()).clone()
    }

    // --- commit & apply -----------------------------------------------------

    /// Applies every committed-but-unapplied entry in log order.
    pub(crate) fn apply_committed_entries(&mut self) {
        while self.state.last_applied < self.state.commit_index {
            let next = self.state.last_applied + 1;
            let entry = match self.log.get(next) {
                Some(e) => e.clone(),
                None => {
                    // The prefix was superseded by an installed snapshot.
                    debug_assert!(next <= self.log.snapshot_index());
                    self.state.last_applied = self.log.snapshot_index();
                    continue;
                }
            };
            self.state.last_applied = next;

            match entry.payload {
                EntryPayload::Noop | EntryPayload::NewTerm => {}
                EntryPayload::Operation(op) => {
                    let result = self.sm.apply(next, &op);
                    self.pending.complete_operation(next, result);
                }
                EntryPayload::MembershipChange(_) => {
                    if self.membership.effective().log_index() == next {
                        self.membership.commit_effective();
                    }
                    if self.state.status == NodeStatus::UpdatingMembership
                        && !self.membership.change_in_progress()
                    {
                        self.state.status = NodeStatus::Active;
                    }
                    tracing::info!(members = %self.membership.committed(), "membership committed");
                    let members = (**self.membership.committed()).clone();
                    self.pending.complete_membership(next, members);
                    self.publish_report();
                }
                EntryPayload::TerminateGroup => {
                    tracing::info!(index = next, "group terminated");
                    if self.state.role == Role::Leader {
                        // Followers must learn that the marker committed
                        // before this node goes dark.
                        self.broadcast_append_entries();
                    }
                    self.state.status = NodeStatus::Terminated;
                    self.pending.complete_terminate(next);
                    self.pending.fail_all(|_| RaftError::Terminated);
                    self.fail_linearizable_queries_with(RaftError::Terminated);
                    self.publish_report();
                    return;
                }
            }

            self.maybe_take_local_snapshot();
        }

        self.run_ready_eventual_queries();
        self.try_execute_linearizable_queries();
    }

    // --- store access -------------------------------------------------------
    //
    // Every store call goes through these wrappers: a failed write is fatal
    // to the node.

    pub(crate) fn store_persist_term(&mut self) -> Result<(), StoreError> {
        let r = self
            .store
            .persist_term(self.state.term, self.state.voted_for.as_ref());
        self.check_store(r)
    }

    pub(crate) fn store_persist_entry(
        &mut self,
        entry: &LogEntry<SM::Operation>,
    ) -> Result<(), StoreError> {
        let r = self.store.persist_log_entry(entry);
        self.check_store(r)
    }

    pub(crate) fn store_persist_chunk(&mut self, chunk: &SnapshotChunk) -> Result<(), StoreError> {
        let r = self.store.persist_snapshot_chunk(chunk);
        self.check_store(r)
    }

    pub(crate) fn store_truncate_entries_from(
        &mut self,
        index: LogIndex,
    ) -> Result<(), StoreError> {
        let r = self.store.truncate_log_entries_from(index);
        self.check_store(r)
    }

    pub(crate) fn store_truncate_chunks_until(
        &mut self,
        index: LogIndex,
    ) -> Result<(), StoreError> {
        let r = self.store.truncate_snapshot_chunks_until(index);
        self.check_store(r)
    }

    pub(crate) fn store_flush(&mut self) -> Result<(), StoreError> {
        let r = self.store.flush();
        self.check_store(r)
    }

    fn check_store(&mut self, result: Result<(), StoreError>) -> Result<(), StoreError> {
        if let Err(e) = &result {
            tracing::error!(error = %e, "store failure, terminating node");
            self.state.status = NodeStatus::Terminated;
            let error = e.clone();
            self.pending.fail_all(move |_| RaftError::Store(error.clone()));
            let error = e.clone();
            self.fail_linearizable_queries_with(RaftError::Store(error));
            self.publish_report();
        }
        result
    }

    // --- reporting ----------------------------------------------------------

    pub(crate) fn publish_report(&mut self) {
        let report = self.report();
        let _ = self.report_tx.send(report);
    }
}
