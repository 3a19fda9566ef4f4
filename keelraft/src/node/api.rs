//! Client-facing node operations: submissions, queries, membership changes,
//! leadership transfer and group termination.

use crate::error::RaftError;
use crate::membership::MembershipChangeMode;
use crate::membership::UpdateGroupMembersOp;
use crate::model::Endpoint;
use crate::model::EntryPayload;
use crate::model::LogIndex;
use crate::model::RaftMessage;
use crate::model::TriggerLeaderElectionRequest;
use crate::node::pending::CommitOutcome;
use crate::node::pending::ReplyTo;
use crate::node::query::EventualQuery;
use crate::node::query::LinearizableQuery;
use crate::node::state::LeadershipTransfer;
use crate::node::NodeStatus;
use crate::node::QueryPolicy;
use crate::node::RaftNode;
use crate::node::Role;
use crate::quorum::majority_of;
use crate::state_machine::StateMachine;
use crate::storage::RaftStore;
use crate::transport::Transport;

impl<SM, ST, TP> RaftNode<SM, ST, TP>
where
    SM: StateMachine,
    ST: RaftStore<SM::Operation>,
    TP: Transport<SM::Operation>,
{
    /// Replicates an operation. The reply fires once the entry commits and
    /// applies, carrying the entry's log index and the state machine result.
    pub fn submit(&mut self, operation: SM::Operation, reply: ReplyTo<CommitOutcome<SM::Response>>) {
        if let Err(e) = self.check_can_replicate() {
            let _ = reply.send(Err(e));
            return;
        }
        if self.pending.operation_count() >= self.config.max_pending_log_entry_count {
            let _ = reply.send(Err(RaftError::cannot_replicate(
                self.state.status,
                "pending request limit reached",
            )));
            return;
        }

        match self.append_new_entry(EntryPayload::Operation(operation)) {
            Ok(index) => {
                self.pending.register_operation(index, reply);
                self.broadcast_append_entries();
                self.try_advance_commit_index();
            }
            Err(e) => {
                let _ = reply.send(Err(RaftError::Store(e)));
            }
        }
    }

    /// Runs a read-only operation under the given policy.
    pub fn query(
        &mut self,
        operation: SM::Operation,
        policy: QueryPolicy,
        min_commit_index: LogIndex,
        reply: ReplyTo<CommitOutcome<SM::Response>>,
    ) {
        if self.state.status == NodeStatus::Terminated {
            let _ = reply.send(Err(RaftError::Terminated));
            return;
        }
        match policy {
            QueryPolicy::LeaderLocal => {
                if self.state.role != Role::Leader {
                    let _ = reply.send(Err(RaftError::not_leader(self.state.leader.as_ref())));
                    return;
                }
                self.execute_query(operation, reply);
            }
            QueryPolicy::Linearizable => self.submit_linearizable_query(operation, reply),
            QueryPolicy::EventualConsistency => {
                if self.state.commit_index >= min_commit_index {
                    self.execute_query(operation, reply);
                } else {
                    let deadline_tick = self.now() + self.timers.heartbeat_timeout_ticks;
                    self.queries.waiting.push(EventualQuery {
                        min_commit_index,
                        deadline_tick,
                        operation,
                        reply,
                    });
                }
            }
        }
    }

    /// Single-server membership change: add a voter or learner, promote a
    /// learner, or remove a member.
    pub fn change_membership(
        &mut self,
        endpoint: Endpoint,
        mode: MembershipChangeMode,
        expected_group_members_commit_index: LogIndex,
        reply: ReplyTo<crate::membership::GroupMembers>,
    ) {
        if let Err(e) = self.check_can_replicate() {
            let _ = reply.send(Err(e));
            return;
        }
        if self.membership.change_in_progress() {
            let _ = reply.send(Err(RaftError::cannot_replicate(
                self.state.status,
                "another membership change is in progress",
            )));
            return;
        }
        let committed = self.membership.committed().clone();
        if expected_group_members_commit_index != committed.log_index() {
            let _ = reply.send(Err(RaftError::InvalidArgument(format!(
                "expected group members commit index {} does not match {}",
                expected_group_members_commit_index,
                committed.log_index()
            ))));
            return;
        }

        let mut members = committed.members().clone();
        let mut voting_members = committed.voting_members().clone();
        let invalid = match mode {
            MembershipChangeMode::AddVoter => {
                if members.contains(&endpoint) {
                    true
                } else {
                    members.insert(endpoint.clone());
                    voting_members.insert(endpoint.clone());
                    false
                }
            }
            MembershipChangeMode::AddLearner => !members.insert(endpoint.clone()),
            MembershipChangeMode::PromoteToVoter => {
                if committed.is_learner(&endpoint) {
                    voting_members.insert(endpoint.clone());
                    false
                } else {
                    true
                }
            }
            MembershipChangeMode::RemoveMember => {
                voting_members.remove(&endpoint);
                !members.remove(&endpoint)
            }
        };
        if invalid {
            let _ = reply.send(Err(RaftError::InvalidArgument(format!(
                "cannot {mode} {endpoint} in group {committed}"
            ))));
            return;
        }

        let op = UpdateGroupMembersOp {
            members,
            voting_members,
        };
        match self.append_new_entry(EntryPayload::MembershipChange(op)) {
            Ok(index) => {
                tracing::info!(%mode, %endpoint, index, "membership change appended");
                self.pending.register_membership(index, reply);
                self.broadcast_append_entries();
                self.try_advance_commit_index();
            }
            Err(e) => {
                let _ = reply.send(Err(RaftError::Store(e)));
            }
        }
    }

    /// Hands leadership to `target`: replicates until the target is caught
    /// up, then tells it to start a sticky election. Completes once this
    /// node observes the target leading a newer term.
    pub fn transfer_leadership(&mut self, target: Endpoint, reply: ReplyTo<()>) {
        if self.state.role != Role::Leader {
            let _ = reply.send(Err(RaftError::not_leader(self.state.leader.as_ref())));
            return;
        }
        if target == self.local {
            let _ = reply.send(Ok(()));
            return;
        }
        if !self.membership.effective().is_voting_member(&target) {
            let _ = reply.send(Err(RaftError::InvalidArgument(format!(
                "{target} is not a voting member"
            ))));
            return;
        }
        if self.state.transfer.is_some() {
            let _ = reply.send(Err(RaftError::cannot_replicate(
                self.state.status,
                "a leadership transfer is already in progress",
            )));
            return;
        }

        tracing::info!(%target, "leadership transfer started");
        self.state.transfer = Some(LeadershipTransfer {
            target: target.clone(),
            start_term: self.state.term,
            deadline_tick: self.now() + 2 * self.timers.election_max_ticks,
            triggered: false,
            reply: Some(reply),
        });
        // If the target is already caught up this triggers immediately;
        // otherwise replication progress will.
        self.maybe_trigger_transfer(&target);
        self.send_append_entries_to(&target);
    }

    /// Appends the terminate marker. The reply carries the marker's commit
    /// index once the whole group is terminated.
    pub fn terminate_group(&mut self, reply: ReplyTo<LogIndex>) {
        if let Err(e) = self.check_can_replicate() {
            let _ = reply.send(Err(e));
            return;
        }
        match self.append_new_entry(EntryPayload::TerminateGroup) {
            Ok(index) => {
                tracing::info!(index, "group termination started");
                self.pending.register_terminate(index, reply);
                self.broadcast_append_entries();
                self.try_advance_commit_index();
                self.publish_report();
            }
            Err(e) => {
                let _ = reply.send(Err(RaftError::Store(e)));
            }
        }
    }

    fn check_can_replicate(&self) -> Result<(), RaftError> {
        match self.state.status {
            NodeStatus::Terminated => return Err(RaftError::Terminated),
            NodeStatus::Active | NodeStatus::UpdatingMembership => {}
            status => {
                return Err(RaftError::cannot_replicate(status, "node does not accept new entries"))
            }
        }
        if self.state.role != Role::Leader {
            return Err(RaftError::not_leader(self.state.leader.as_ref()));
        }
        let uncommitted = self.log.last_index() - self.state.commit_index;
        if uncommitted >= self.config.max_uncommitted_log_entry_count {
            return Err(RaftError::cannot_replicate(
                self.state.status,
                "uncommitted log entry limit reached",
            ));
        }
        Ok(())
    }

    // --- queries ------------------------------------------------------------

    fn submit_linearizable_query(
        &mut self,
        operation: SM::Operation,
        reply: ReplyTo<CommitOutcome<SM::Response>>,
    ) {
        if self.state.role != Role::Leader {
            let _ = reply.send(Err(RaftError::not_leader(self.state.leader.as_ref())));
            return;
        }

        // The barrier: everything committed when the query arrived, and at
        // least one entry of this leader's own term.
        let term_start = self
            .state
            .leader_state
            .as_ref()
            .map(|ls| ls.term_start_index)
            .unwrap_or(0);
        let barrier_index = self.state.commit_index.max(term_start);

        self.queries.seq_no += 1;
        self.queries.rounds.push_back(LinearizableQuery {
            required_seq_no: self.queries.seq_no,
            barrier_index,
            operation,
            reply,
        });

        // Read-barrier heartbeat carrying the new round number.
        self.broadcast_append_entries();
        self.try_execute_linearizable_queries();
    }

    fn execute_query(&mut self, operation: SM::Operation, reply: ReplyTo<CommitOutcome<SM::Response>>) {
        let result = self.sm.run_operation(&operation);
        let _ = reply.send(Ok(CommitOutcome {
            commit_index: self.state.commit_index,
            result,
        }));
    }

    /// The highest linearizable round confirmed by a quorum of voters. The
    /// leader itself always confirms the newest round.
    fn quorum_acked_query_seq_no(&self) -> u64 {
        let voting = self.membership.effective().voting_members();
        let Some(leader_state) = &self.state.leader_state else {
            return 0;
        };
        let mut acks: Vec<u64> = voting
            .iter()
            .map(|m| {
                if *m == self.local {
                    self.queries.seq_no
                } else {
                    leader_state
                        .followers
                        .get(m)
                        .map(|f| f.query_ack_seq_no)
                        .unwrap_or(0)
                }
            })
            .collect();
        if acks.is_empty() {
            return 0;
        }
        acks.sort_unstable_by(|a, b| b.cmp(a));
        acks[majority_of(acks.len()) - 1]
    }

    /// Runs every linearizable round whose quorum confirmation arrived and
    /// whose commit barrier passed.
    pub(crate) fn try_execute_linearizable_queries(&mut self) {
        if self.state.role != Role::Leader || self.queries.rounds.is_empty() {
            return;
        }
        let acked = self.quorum_acked_query_seq_no();
        while let Some(front) = self.queries.rounds.front() {
            if front.required_seq_no > acked || front.barrier_index > self.state.commit_index {
                break;
            }
            let query = match self.queries.rounds.pop_front() {
                Some(q) => q,
                None => break,
            };
            self.execute_query(query.operation, query.reply);
        }
    }

    /// Runs parked eventual-consistency reads whose commit floor was
    /// reached.
    pub(crate) fn run_ready_eventual_queries(&mut self) {
        if self.queries.waiting.is_empty() {
            return;
        }
        let commit_index = self.state.commit_index;
        let ready: Vec<EventualQuery<SM::Operation, SM::Response>> = {
            let waiting = &mut self.queries.waiting;
            let mut ready = Vec::new();
            let mut i = 0;
            while i < waiting.len() {
                if waiting[i].min_commit_index <= commit_index {
                    ready.push(waiting.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            ready
        };
        for query in ready {
            self.execute_query(query.operation, query.reply);
        }
    }

    pub(crate) fn expire_eventual_queries(&mut self, now: u64) {
        let waiting = &mut self.queries.waiting;
        let mut i = 0;
        while i < waiting.len() {
            if waiting[i].deadline_tick <= now {
                let query = waiting.swap_remove(i);
                let _ = query.reply.send(Err(RaftError::Timeout(format!(
                    "commit index did not reach {}",
                    query.min_commit_index
                ))));
            } else {
                i += 1;
            }
        }
    }

    pub(crate) fn fail_linearizable_queries(&mut self) {
        let leader = self.state.leader.clone();
        for query in std::mem::take(&mut self.queries.rounds) {
            let _ = query.reply.send(Err(RaftError::not_leader(leader.as_ref())));
        }
    }

    pub(crate) fn fail_linearizable_queries_with(&mut self, error: RaftError) {
        for query in std::mem::take(&mut self.queries.rounds) {
            let _ = query.reply.send(Err(error.clone()));
        }
    }

    // --- leadership transfer plumbing --------------------------------------

    /// Sends the election trigger once the transfer target's log caught up.
    pub(crate) fn maybe_trigger_transfer(&mut self, responded: &Endpoint) {
        let last_index = self.log.last_index();
        let Some(transfer) = &mut self.state.transfer else {
            return;
        };
        if transfer.triggered || transfer.target != *responded {
            return;
        }
        let Some(leader_state) = &self.state.leader_state else {
            return;
        };
        let caught_up = leader_state
            .followers
            .get(responded)
            .map(|f| f.match_index >= last_index)
            .unwrap_or(false);
        if !caught_up {
            return;
        }
        transfer.triggered = true;

        tracing::info!(target = %responded, "transfer target caught up, triggering election");
        let message = RaftMessage::TriggerLeaderElectionRequest(TriggerLeaderElectionRequest {
            group_id: self.group_id.clone(),
            sender: self.local.clone(),
            term: self.state.term,
        });
        self.transport.send(responded, message);
    }

    /// Completes the transfer future when the target is observed leading a
    /// newer term.
    pub(crate) fn complete_transfer_if_done(&mut self) {
        let Some(transfer) = &mut self.state.transfer else {
            return;
        };
        let done = self.state.term > transfer.start_term
            && self.state.leader.as_ref() == Some(&transfer.target);
        if done {
            if let Some(reply) = transfer.reply.take() {
                let _ = reply.send(Ok(()));
            }
            self.state.transfer = None;
        }
    }

    pub(crate) fn expire_leadership_transfer(&mut self, now: u64) {
        let expired = self
            .state
            .transfer
            .as_ref()
            .map(|t| t.deadline_tick <= now)
            .unwrap_or(false);
        if expired {
            if let Some(mut transfer) = self.state.transfer.take() {
                if let Some(reply) = transfer.reply.take() {
                    let _ = reply.send(Err(RaftError::Timeout(
                        "leadership transfer did not complete".to_string(),
                    )));
                }
            }
        }
    }
}
