//! Log replication: append-entries fan-out, follower-side consistency
//! checks, flow control and commit advancement.

use crate::error::StoreError;
use crate::model::AppendEntriesFailureResponse;
use crate::model::AppendEntriesRequest;
use crate::model::AppendEntriesSuccessResponse;
use crate::model::Endpoint;
use crate::model::LogIndex;
use crate::model::RaftMessage;
use crate::node::state::InFlight;
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
    /// Sends an append (or snapshot) request to every peer of the effective
    /// membership.
    pub(crate) fn broadcast_append_entries(&mut self) {
        if self.state.role != Role::Leader {
            return;
        }
        let peers: Vec<Endpoint> = self
            .membership
            .effective()
            .peers_of(&self.local)
            .cloned()
            .collect();
        for peer in &peers {
            self.send_append_entries_to(peer);
        }
    }

    /// Sends the next replication message to one follower, respecting flow
    /// control: while an entry-carrying or snapshot request is outstanding,
    /// only empty heartbeats go out until its response arrives or the
    /// backoff window expires.
    pub(crate) fn send_append_entries_to(&mut self, follower: &Endpoint) {
        if self.state.role != Role::Leader {
            return;
        }
        let now = self.now();
        let snapshot_index = self.log.snapshot_index();

        let Some(leader_state) = &mut self.state.leader_state else {
            return;
        };
        let Some(progress) = leader_state.followers.get_mut(follower) else {
            return;
        };

        // An expired in-flight window means the request or its response was
        // lost; stop waiting for it.
        if let Some(in_flight) = &progress.in_flight {
            if now >= in_flight.give_up_tick {
                progress.in_flight = None;
            }
        }

        if progress.snapshot_transfer.is_some() {
            if progress.in_flight.is_none() {
                self.send_install_snapshot_to(follower, None);
            }
            return;
        }

        // Followers behind the snapshot floor can only catch up via the
        // snapshot install protocol. An append still in flight is for
        // entries the window no longer holds; stop waiting for it.
        if progress.next_index <= snapshot_index {
            progress.in_flight = None;
            self.start_snapshot_transfer(follower);
            return;
        }

        let may_send_entries = progress.in_flight.is_none();
        let next_index = progress.next_index;
        let previous_log_index = next_index - 1;

        progress.flow_control_seq_no += 1;
        let seq_no = progress.flow_control_seq_no;

        let entries = if may_send_entries {
            self.log
                .entries_from(next_index, self.config.append_entries_request_batch_size)
                .to_vec()
        } else {
            Vec::new()
        };

        if !entries.is_empty() {
            if let Some(leader_state) = &mut self.state.leader_state {
                if let Some(progress) = leader_state.followers.get_mut(follower) {
                    progress.in_flight = Some(InFlight {
                        seq_no,
                        give_up_tick: now + self.timers.heartbeat_timeout_ticks,
                    });
                }
            }
        }

        let previous_log_term = self.log.term_of(previous_log_index).unwrap_or(0);
        let request = AppendEntriesRequest {
            group_id: self.group_id.clone(),
            sender: self.local.clone(),
            term: self.state.term,
            previous_log_index,
            previous_log_term,
            entries,
            leader_commit_index: self.state.commit_index,
            query_seq_no: self.queries.seq_no,
            flow_control_seq_no: seq_no,
        };
        self.transport.send(follower, RaftMessage::AppendEntriesRequest(request));
    }

    pub(crate) fn handle_append_entries_request(
        &mut self,
        request: AppendEntriesRequest<SM::Operation>,
    ) -> Result<(), StoreError> {
        if request.term < self.state.term {
            // A deposed leader learns the new term from this response.
            self.send_append_failure(&request.sender, 0, request.flow_control_seq_no);
            return Ok(());
        }
        if request.term > self.state.term {
            self.step_down_to_term(request.term)?;
        } else if self.state.role == Role::Candidate || self.state.role == Role::Leader {
            // Someone else won this term.
            self.step_down_same_term();
        }
        self.record_leader(request.sender.clone());

        let previous = request.previous_log_index;

        // Diverged below our window: the leader is replaying entries our
        // snapshot already covers. Point it at our first regular index.
        if previous < self.log.snapshot_index() {
            let hint = self.log.first_index();
            self.send_append_failure(&request.sender, hint, request.flow_control_seq_no);
            return Ok(());
        }

        match self.log.term_of(previous) {
            None => {
                // We do not have the previous entry yet.
                let hint = self.log.last_index() + 1;
                self.send_append_failure(&request.sender, hint, request.flow_control_seq_no);
                Ok(())
            }
            Some(term) if term != request.previous_log_term => {
                // Conflicting tail; drop it and let the leader back up.
                self.truncate_log_from(previous)?;
                self.store_flush()?;
                let hint = self.log.last_index() + 1;
                self.send_append_failure(&request.sender, hint, request.flow_control_seq_no);
                Ok(())
            }
            Some(_) => self.accept_entries(request),
        }
    }

    fn accept_entries(
        &mut self,
        request: AppendEntriesRequest<SM::Operation>,
    ) -> Result<(), StoreError> {
        let mut mutated = false;

        for entry in request.entries {
            if entry.index <= self.log.snapshot_index() {
                continue;
            }
            if entry.index <= self.log.last_index() {
                match self.log.term_of(entry.index) {
                    Some(term) if term == entry.term => continue,
                    _ => {
                        self.truncate_log_from(entry.index)?;
                        mutated = true;
                    }
                }
            }
            self.append_replicated_entry(entry)?;
            mutated = true;
        }

        // Entries must be durable before the success response leaves.
        if mutated {
            self.store_flush()?;
        }

        if request.leader_commit_index > self.state.commit_index {
            self.state.commit_index = request.leader_commit_index.min(self.log.last_index());
            self.apply_committed_entries();
        }

        let response = AppendEntriesSuccessResponse {
            group_id: self.group_id.clone(),
            sender: self.local.clone(),
            term: self.state.term,
            last_log_index: self.log.last_index(),
            query_seq_no: request.query_seq_no,
            flow_control_seq_no: request.flow_control_seq_no,
        };
        self.transport
            .send(&request.sender, RaftMessage::AppendEntriesSuccessResponse(response));
        Ok(())
    }

    fn send_append_failure(&mut self, leader: &Endpoint, expected_next_index: LogIndex, seq_no: u64) {
        let response = AppendEntriesFailureResponse {
            group_id: self.group_id.clone(),
            sender: self.local.clone(),
            term: self.state.term,
            expected_next_index,
            flow_control_seq_no: seq_no,
        };
        self.transport
            .send(leader, RaftMessage::AppendEntriesFailureResponse(response));
    }

    pub(crate) fn handle_append_entries_success(
        &mut self,
        response: AppendEntriesSuccessResponse,
    ) -> Result<(), StoreError> {
        if response.term > self.state.term {
            return self.step_down_to_term(response.term);
        }
        if self.state.role != Role::Leader || response.term < self.state.term {
            return Ok(());
        }

        let now = self.now();
        let last_log_index = self.log.last_index();
        let sender = response.sender.clone();

        let Some(leader_state) = &mut self.state.leader_state else {
            return Ok(());
        };
        let Some(progress) = leader_state.followers.get_mut(&sender) else {
            return Ok(());
        };

        progress.last_response_tick = now;
        progress.last_acked_seq_no = progress.last_acked_seq_no.max(response.flow_control_seq_no);
        if let Some(in_flight) = &progress.in_flight {
            if response.flow_control_seq_no >= in_flight.seq_no {
                progress.in_flight = None;
            }
        }

        // match_index is monotonic even when responses arrive out of order.
        if response.last_log_index > progress.match_index {
            progress.match_index = response.last_log_index;
            progress.next_index = response.last_log_index + 1;
        }
        progress.query_ack_seq_no = progress.query_ack_seq_no.max(response.query_seq_no);

        let behind = progress.next_index <= last_log_index;

        self.maybe_trigger_transfer(&sender);
        self.try_advance_commit_index();
        self.try_execute_linearizable_queries();

        if behind {
            self.send_append_entries_to(&sender);
        }
        Ok(())
    }

    pub(crate) fn handle_append_entries_failure(
        &mut self,
        response: AppendEntriesFailureResponse,
    ) -> Result<(), StoreError> {
        if response.term > self.state.term {
            return self.step_down_to_term(response.term);
        }
        if self.state.role != Role::Leader || response.term < self.state.term {
            return Ok(());
        }

        let now = self.now();
        let last_log_index = self.log.last_index();
        let sender = response.sender.clone();

        let Some(leader_state) = &mut self.state.leader_state else {
            return Ok(());
        };
        let Some(progress) = leader_state.followers.get_mut(&sender) else {
            return Ok(());
        };

        progress.last_response_tick = now;

        // A failure older than one we already acted on would rewind
        // next_index for nothing; drop it.
        if response.flow_control_seq_no < progress.last_acked_seq_no {
            return Ok(());
        }
        progress.last_acked_seq_no = response.flow_control_seq_no;
        if let Some(in_flight) = &progress.in_flight {
            if response.flow_control_seq_no >= in_flight.seq_no {
                progress.in_flight = None;
            }
        }

        let hint = response.expected_next_index.max(1);
        progress.next_index = hint.min(last_log_index + 1);
        progress.match_index = progress.match_index.min(progress.next_index - 1);

        self.send_append_entries_to(&sender);
        Ok(())
    }

    /// Advances the commit index to the highest index replicated on a
    /// majority of voters, provided that entry is from the current term.
    /// Entries of prior terms commit only indirectly through it.
    pub(crate) fn try_advance_commit_index(&mut self) {
        if self.state.role != Role::Leader {
            return;
        }
        let voting = self.membership.effective().voting_members();
        let Some(leader_state) = &self.state.leader_state else {
            return;
        };
        let mut match_indexes: Vec<LogIndex> = voting
            .iter()
            .map(|m| {
                if *m == self.local {
                    // The leader's own entries are flushed on append.
                    self.log.last_index()
                } else {
                    leader_state
                        .followers
                        .get(m)
                        .map(|f| f.match_index)
                        .unwrap_or(0)
                }
            })
            .collect();
        if match_indexes.is_empty() {
            return;
        }
        match_indexes.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_index = match_indexes[majority_of(match_indexes.len()) - 1];

        if quorum_index <= self.state.commit_index {
            return;
        }
        if self.log.term_of(quorum_index) != Some(self.state.term) {
            return;
        }

        tracing::debug!(commit_index = quorum_index, "commit index advanced");
        self.state.commit_index = quorum_index;
        self.apply_committed_entries();
    }
}
