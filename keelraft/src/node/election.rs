//! Leader election: vote requests and grants, sticky disruption avoidance,
//! promotion to leader, and the leader's quorum heartbeat check.

use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::model::Endpoint;
use crate::model::EntryPayload;
use crate::model::RaftMessage;
use crate::model::TriggerLeaderElectionRequest;
use crate::model::VoteRequest;
use crate::model::VoteResponse;
use crate::node::state::CandidateState;
use crate::node::state::FollowerProgress;
use crate::node::state::LeaderState;
use crate::node::NodeStatus;
use crate::node::RaftNode;
use crate::node::Role;
use crate::quorum::majority_of;
use crate::quorum::QuorumSet;
use crate::state_machine::StateMachine;
use crate::storage::RaftStore;
use crate::transport::Transport;

impl<SM, ST, TP> RaftNode<SM, ST, TP>
where
    SM: StateMachine,
    ST: RaftStore<SM::Operation>,
    TP: Transport<SM::Operation>,
{
    /// Starts an election for the next term. `sticky` marks elections
    /// prompted by the current leader (graceful handoff); voters skip the
    /// leader-stickiness window for them.
    pub(crate) fn start_election(&mut self, sticky: bool) -> Result<(), StoreError> {
        match self.state.status {
            NodeStatus::Initial | NodeStatus::Terminated => return Ok(()),
            _ => {}
        }
        if !self.membership.effective().is_voting_member(&self.local) {
            self.reset_election_deadline();
            return Ok(());
        }

        self.state.term += 1;
        self.state.voted_for = Some(self.local.clone());
        self.state.role = Role::Candidate;
        self.state.leader = None;
        self.state.leader_state = None;
        let mut granted = BTreeSet::new();
        granted.insert(self.local.clone());
        self.state.candidate = Some(CandidateState { granted });
        self.reset_election_deadline();

        tracing::info!(term = self.state.term, sticky, "election started");

        // The self-vote must be durable before any vote request goes out.
        self.store_persist_term()?;
        self.store_flush()?;

        let request = VoteRequest {
            group_id: self.group_id.clone(),
            sender: self.local.clone(),
            term: self.state.term,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
            sticky,
        };
        let peers: Vec<Endpoint> = self
            .membership
            .effective()
            .voting_members()
            .iter()
            .filter(|m| **m != self.local)
            .cloned()
            .collect();
        for peer in &peers {
            self.transport.send(peer, RaftMessage::VoteRequest(request.clone()));
        }

        // A single-voter group elects itself on the spot.
        self.try_promote_to_leader()?;
        self.publish_report();
        Ok(())
    }

    pub(crate) fn handle_vote_request(&mut self, request: VoteRequest) -> Result<(), StoreError> {
        if request.term < self.state.term {
            self.send_vote_response(&request.sender, false);
            return Ok(());
        }

        // Disruption avoidance: while we hear from a live leader, reject
        // non-sticky candidates without even adopting their term, so a
        // partitioned node rejoining with an inflated term cannot depose a
        // healthy leader. A handoff-triggered (sticky) candidate bypasses
        // this.
        if !request.sticky && self.heard_from_leader_recently() {
            tracing::debug!(
                candidate = %request.sender,
                term = request.term,
                "rejecting vote, leader is alive"
            );
            self.send_vote_response(&request.sender, false);
            return Ok(());
        }

        let mut persist = false;
        if request.term > self.state.term {
            // Adopt the term; persistence is batched with the vote decision
            // below so the response needs a single flush.
            self.state.term = request.term;
            self.state.voted_for = None;
            self.to_follower();
            persist = true;
        }

        let up_to_date = (request.last_log_term, request.last_log_index)
            >= (self.log.last_term(), self.log.last_index());
        let vote_free = match &self.state.voted_for {
            None => true,
            Some(v) => *v == request.sender,
        };
        let granted = self.state.role != Role::Leader && up_to_date && vote_free;

        if granted && self.state.voted_for.is_none() {
            self.state.voted_for = Some(request.sender.clone());
            persist = true;
        }
        if granted {
            self.reset_election_deadline();
        }

        // The vote must be durable before the response leaves this node.
        if persist {
            self.store_persist_term()?;
            self.store_flush()?;
            self.publish_report();
        }

        tracing::debug!(candidate = %request.sender, term = request.term, granted, "vote handled");
        self.send_vote_response(&request.sender, granted);
        Ok(())
    }

    fn send_vote_response(&mut self, candidate: &Endpoint, granted: bool) {
        let response = VoteResponse {
            group_id: self.group_id.clone(),
            sender: self.local.clone(),
            term: self.state.term,
            granted,
        };
        self.transport.send(candidate, RaftMessage::VoteResponse(response));
    }

    pub(crate) fn handle_vote_response(&mut self, response: VoteResponse) -> Result<(), StoreError> {
        if response.term > self.state.term {
            return self.step_down_to_term(response.term);
        }
        if self.state.role != Role::Candidate || response.term < self.state.term {
            return Ok(());
        }
        if !response.granted {
            return Ok(());
        }
        if let Some(candidate) = &mut self.state.candidate {
            candidate.granted.insert(response.sender);
        }
        self.try_promote_to_leader()
    }

    fn try_promote_to_leader(&mut self) -> Result<(), StoreError> {
        if self.state.role != Role::Candidate {
            return Ok(());
        }
        let voting = self.membership.effective().voting_members().clone();
        let reached = match &self.state.candidate {
            Some(c) => voting.is_quorum(c.granted.iter()),
            None => false,
        };
        if !reached {
            return Ok(());
        }
        self.become_leader()
    }

    fn become_leader(&mut self) -> Result<(), StoreError> {
        tracing::info!(term = self.state.term, "elected leader");
        self.state.role = Role::Leader;
        self.state.leader = Some(self.local.clone());
        self.state.candidate = None;
        self.timers.heartbeat_due = self.now() + self.timers.heartbeat_ticks;

        self.state.leader_state = Some(LeaderState::new(0));
        self.update_leader_roster();

        // Commit the term: the leader can only advance the commit index
        // through an entry of its own term.
        let payload = if self.config.enable_new_term_operation {
            EntryPayload::NewTerm
        } else {
            EntryPayload::Noop
        };
        let index = self.append_new_entry(payload)?;
        if let Some(leader_state) = &mut self.state.leader_state {
            leader_state.term_start_index = index;
        }

        self.broadcast_append_entries();
        self.try_advance_commit_index();
        self.publish_report();
        Ok(())
    }

    /// Keeps the leader's follower map aligned with the effective members.
    pub(crate) fn update_leader_roster(&mut self) {
        let now = self.now();
        let next_index = self.log.last_index() + 1;
        let members = self.membership.effective().clone();
        let Some(leader_state) = &mut self.state.leader_state else {
            return;
        };
        leader_state.followers.retain(|endpoint, _| members.is_member(endpoint));
        for member in members.peers_of(&self.local) {
            leader_state
                .followers
                .entry(member.clone())
                .or_insert_with(|| FollowerProgress::new(next_index, now));
        }
    }

    /// An established leader steps down when it cannot observe responses
    /// from a majority of voters within the heartbeat timeout.
    pub(crate) fn check_leader_quorum(&mut self) {
        let now = self.now();
        let voting = self.membership.effective().voting_members();
        if voting.len() <= 1 {
            return;
        }
        let Some(leader_state) = &self.state.leader_state else {
            return;
        };
        let mut response_ticks: Vec<u64> = voting
            .iter()
            .map(|m| {
                if *m == self.local {
                    now
                } else {
                    leader_state
                        .followers
                        .get(m)
                        .map(|f| f.last_response_tick)
                        .unwrap_or(0)
                }
            })
            .collect();
        response_ticks.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_tick = response_ticks[majority_of(response_ticks.len()) - 1];

        if now.saturating_sub(quorum_tick) > self.timers.heartbeat_timeout_ticks {
            tracing::warn!(
                term = self.state.term,
                "leader lost contact with the majority, stepping down"
            );
            self.step_down_same_term();
        }
    }

    /// True while this node believes a live leader exists: it is the leader
    /// itself, or it heard from one within the heartbeat timeout.
    pub(crate) fn heard_from_leader_recently(&self) -> bool {
        if self.state.role == Role::Leader {
            return true;
        }
        if self.state.leader.is_none() {
            return false;
        }
        match self.timers.leader_heard_tick {
            Some(heard) => {
                self.timers.tick_count.saturating_sub(heard) < self.timers.heartbeat_timeout_ticks
            }
            None => false,
        }
    }

    /// The leader asked this node to take over: campaign immediately with
    /// the sticky bit set.
    pub(crate) fn handle_trigger_leader_election(
        &mut self,
        request: TriggerLeaderElectionRequest,
    ) -> Result<(), StoreError> {
        if request.term < self.state.term {
            return Ok(());
        }
        if self.state.role == Role::Leader {
            return Ok(());
        }
        tracing::info!(from = %request.sender, "election triggered by leader handoff");
        self.start_election(true)
    }
}
