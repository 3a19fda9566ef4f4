//! Snapshot taking, chunked transfer to lagging followers, and install.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::model::Endpoint;
use crate::model::InstallSnapshotRequest;
use crate::model::InstallSnapshotResponse;
use crate::model::RaftMessage;
use crate::model::SnapshotChunk;
use crate::node::state::InFlight;
use crate::node::state::PartialSnapshot;
use crate::node::state::SnapshotTransfer;
use crate::node::RaftNode;
use crate::node::Role;
use crate::raft_log::SnapshotRecord;
use crate::state_machine::StateMachine;
use crate::storage::RaftStore;
use crate::transport::Transport;

impl<SM, ST, TP> RaftNode<SM, ST, TP>
where
    SM: StateMachine,
    ST: RaftStore<SM::Operation>,
    TP: Transport<SM::Operation>,
{
    /// Takes a local snapshot once enough entries have been applied since
    /// the previous one, then compacts the log window.
    pub(crate) fn maybe_take_local_snapshot(&mut self) {
        let applied_since = self.state.last_applied - self.log.snapshot_index();
        if applied_since < self.config.commit_count_to_take_snapshot {
            return;
        }
        let _ = self.take_local_snapshot();
    }

    fn take_local_snapshot(&mut self) -> Result<(), StoreError> {
        let index = self.state.last_applied;
        let term = match self.log.term_of(index) {
            Some(t) => t,
            None => return Ok(()),
        };
        let group_members = (**self.membership.committed()).clone();

        let mut payloads = self.sm.take_snapshot(index);
        if payloads.is_empty() {
            payloads.push(Vec::new());
        }
        let chunk_count = payloads.len() as u32;
        let chunks: Vec<SnapshotChunk> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| SnapshotChunk {
                snapshot_index: index,
                snapshot_term: term,
                chunk_index: i as u32,
                chunk_count,
                payload,
                group_members: group_members.clone(),
            })
            .collect();

        for chunk in &chunks {
            self.store_persist_chunk(chunk)?;
        }
        self.store_flush()?;
        // Partial older snapshots are obsolete now.
        self.store_truncate_chunks_until(index)?;

        self.log.install_snapshot(SnapshotRecord {
            index,
            term,
            group_members,
            chunks,
        });
        self.take_snapshot_count += 1;
        tracing::info!(index, term, "snapshot taken");
        Ok(())
    }

    /// Switches a follower that fell behind the snapshot floor to the
    /// snapshot install protocol.
    pub(crate) fn start_snapshot_transfer(&mut self, follower: &Endpoint) {
        let Some(snapshot_index) = self.log.snapshot().map(|s| s.index) else {
            return;
        };
        if let Some(leader_state) = &mut self.state.leader_state {
            if let Some(progress) = leader_state.followers.get_mut(follower) {
                progress.snapshot_transfer = Some(SnapshotTransfer { snapshot_index });
            }
        }
        tracing::info!(%follower, snapshot_index, "follower behind the log window, sending snapshot");
        self.send_install_snapshot_to(follower, None);
    }

    /// Sends one batch of snapshot chunks. `requested` narrows the batch to
    /// the chunk indices the follower reported missing.
    pub(crate) fn send_install_snapshot_to(
        &mut self,
        follower: &Endpoint,
        requested: Option<&BTreeSet<u32>>,
    ) {
        let now = self.now();
        let batch = self.config.append_entries_request_batch_size;
        let Some(snapshot) = self.log.snapshot() else {
            return;
        };

        let chunks: Vec<SnapshotChunk> = match requested {
            Some(missing) => snapshot
                .chunks
                .iter()
                .filter(|c| missing.contains(&c.chunk_index))
                .take(batch)
                .cloned()
                .collect(),
            None => snapshot.chunks.iter().take(batch).cloned().collect(),
        };
        let snapshot_index = snapshot.index;
        let snapshot_term = snapshot.term;
        let chunk_count = snapshot.chunks.len() as u32;
        let group_members = snapshot.group_members.clone();

        let give_up_tick = now + self.timers.heartbeat_timeout_ticks;
        let mut seq_no = 0;
        if let Some(leader_state) = &mut self.state.leader_state {
            if let Some(progress) = leader_state.followers.get_mut(follower) {
                progress.flow_control_seq_no += 1;
                seq_no = progress.flow_control_seq_no;
                progress.in_flight = Some(InFlight {
                    seq_no,
                    give_up_tick,
                });
            }
        }

        let request = InstallSnapshotRequest {
            group_id: self.group_id.clone(),
            sender: self.local.clone(),
            term: self.state.term,
            snapshot_index,
            snapshot_term,
            chunk_count,
            chunks,
            group_members,
            query_seq_no: self.queries.seq_no,
            flow_control_seq_no: seq_no,
        };
        self.transport
            .send(follower, RaftMessage::InstallSnapshotRequest(request));
    }

    pub(crate) fn handle_install_snapshot_request(
        &mut self,
        request: InstallSnapshotRequest,
    ) -> Result<(), StoreError> {
        if request.term < self.state.term {
            // Stale leader; answer with our term so it steps down.
            self.send_install_snapshot_response(
                &request.sender,
                request.snapshot_index,
                BTreeSet::new(),
                request.flow_control_seq_no,
            );
            return Ok(());
        }
        if request.term > self.state.term {
            self.step_down_to_term(request.term)?;
        } else if self.state.role == Role::Candidate || self.state.role == Role::Leader {
            self.step_down_same_term();
        }
        self.record_leader(request.sender.clone());

        // Already have this state, via snapshot or the log itself.
        if request.snapshot_index <= self.log.snapshot_index()
            || request.snapshot_index <= self.state.commit_index
        {
            self.send_install_snapshot_response(
                &request.sender,
                request.snapshot_index,
                BTreeSet::new(),
                request.flow_control_seq_no,
            );
            return Ok(());
        }

        // A newer snapshot supersedes a partially collected older one.
        let reset_partial = match &self.partial_snapshot {
            Some(p) => p.index != request.snapshot_index,
            None => true,
        };
        if reset_partial {
            if let Some(old) = self.partial_snapshot.take() {
                self.store_truncate_chunks_until(old.index)?;
            }
            self.partial_snapshot = Some(PartialSnapshot {
                index: request.snapshot_index,
                term: request.snapshot_term,
                chunk_count: request.chunk_count,
                group_members: request.group_members.clone(),
                received: BTreeMap::new(),
            });
        }

        for chunk in request.chunks {
            let is_new = self
                .partial_snapshot
                .as_ref()
                .map(|p| !p.received.contains_key(&chunk.chunk_index))
                .unwrap_or(false);
            if !is_new {
                continue;
            }
            self.store_persist_chunk(&chunk)?;
            if let Some(partial) = &mut self.partial_snapshot {
                partial.received.insert(chunk.chunk_index, chunk);
            }
        }

        // Received chunks must be durable before we report progress.
        self.store_flush()?;

        let complete = self
            .partial_snapshot
            .as_ref()
            .map(|p| p.is_complete())
            .unwrap_or(false);

        let (snapshot_index, missing) = if complete {
            let Some(partial) = self.partial_snapshot.take() else {
                return Ok(());
            };
            let index = partial.index;
            self.install_complete_snapshot(partial)?;
            (index, BTreeSet::new())
        } else {
            match &self.partial_snapshot {
                Some(p) => (p.index, p.missing()),
                None => (request.snapshot_index, BTreeSet::new()),
            }
        };

        self.send_install_snapshot_response(
            &request.sender,
            snapshot_index,
            missing,
            request.flow_control_seq_no,
        );
        Ok(())
    }

    fn install_complete_snapshot(&mut self, partial: PartialSnapshot) -> Result<(), StoreError> {
        let index = partial.index;
        let term = partial.term;
        tracing::info!(index, term, "installing snapshot from leader");

        let payloads: Vec<Vec<u8>> = partial.received.values().map(|c| c.payload.clone()).collect();
        let install = self.sm.install_snapshot(index, &payloads);
        self.check_install(install)?;

        let chunks: Vec<SnapshotChunk> = partial.received.into_values().collect();
        self.log.install_snapshot(SnapshotRecord {
            index,
            term,
            group_members: partial.group_members.clone(),
            chunks,
        });

        self.membership.reset(partial.group_members);
        // An uncommitted membership entry surviving above the snapshot stays
        // effective.
        let latest = self.latest_membership_in_window();
        if latest.log_index() > self.membership.effective().log_index() {
            self.membership.set_effective(latest);
        }
        self.state.role = match self.state.role {
            Role::Leader | Role::Candidate => self.state.role,
            _ => self.follower_role(),
        };
        self.state.commit_index = self.state.commit_index.max(index);
        self.state.last_applied = self.state.last_applied.max(index);
        self.install_snapshot_count += 1;
        self.recompute_termination_status();

        self.run_ready_eventual_queries();
        self.publish_report();
        Ok(())
    }

    fn send_install_snapshot_response(
        &mut self,
        leader: &Endpoint,
        snapshot_index: u64,
        requested: BTreeSet<u32>,
        seq_no: u64,
    ) {
        let response = InstallSnapshotResponse {
            group_id: self.group_id.clone(),
            sender: self.local.clone(),
            term: self.state.term,
            snapshot_index,
            requested,
            flow_control_seq_no: seq_no,
        };
        self.transport
            .send(leader, RaftMessage::InstallSnapshotResponse(response));
    }

    pub(crate) fn handle_install_snapshot_response(
        &mut self,
        response: InstallSnapshotResponse,
    ) -> Result<(), StoreError> {
        if response.term > self.state.term {
            return self.step_down_to_term(response.term);
        }
        if self.state.role != Role::Leader || response.term < self.state.term {
            return Ok(());
        }

        let now = self.now();
        let current_snapshot_index = self.log.snapshot_index();
        let sender = response.sender.clone();

        let transfer_index = {
            let Some(leader_state) = &mut self.state.leader_state else {
                return Ok(());
            };
            let Some(progress) = leader_state.followers.get_mut(&sender) else {
                return Ok(());
            };

            progress.last_response_tick = now;
            progress.last_acked_seq_no =
                progress.last_acked_seq_no.max(response.flow_control_seq_no);
            if let Some(in_flight) = &progress.in_flight {
                if response.flow_control_seq_no >= in_flight.seq_no {
                    progress.in_flight = None;
                }
            }

            match &progress.snapshot_transfer {
                Some(t) => t.snapshot_index,
                None => return Ok(()),
            }
        };

        // The follower answered about an older snapshot than we now hold;
        // restart with the current one.
        if response.snapshot_index < current_snapshot_index
            || transfer_index < current_snapshot_index
        {
            if let Some(leader_state) = &mut self.state.leader_state {
                if let Some(progress) = leader_state.followers.get_mut(&sender) {
                    progress.snapshot_transfer = None;
                }
            }
            self.start_snapshot_transfer(&sender);
            return Ok(());
        }

        if response.requested.is_empty() {
            // Fully installed: resume normal replication after it.
            if let Some(leader_state) = &mut self.state.leader_state {
                if let Some(progress) = leader_state.followers.get_mut(&sender) {
                    progress.snapshot_transfer = None;
                    progress.match_index = progress.match_index.max(response.snapshot_index);
                    progress.next_index = progress.match_index + 1;
                }
            }
            tracing::info!(follower = %sender, snapshot_index = response.snapshot_index, "snapshot transfer complete");
            self.try_advance_commit_index();
            self.send_append_entries_to(&sender);
        } else {
            self.send_install_snapshot_to(&sender, Some(&response.requested));
        }
        Ok(())
    }

    fn check_install(&mut self, result: Result<(), StoreError>) -> Result<(), StoreError> {
        // A snapshot decode failure is the same failure class as a store
        // write error: fatal to the node.
        self.check_store(result)
    }
}
