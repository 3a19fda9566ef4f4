//! Assembles a [`RaftNode`] from its collaborators.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::membership::GroupMembers;
use crate::membership::MembershipState;
use crate::model::Endpoint;
use crate::node::pending::PendingRegistry;
use crate::node::query::QueryState;
use crate::node::state::NodeState;
use crate::node::state::Timers;
use crate::node::RaftNode;
use crate::raft_log::RaftLog;
use crate::raft_log::SnapshotRecord;
use crate::state_machine::StateMachine;
use crate::storage::RaftStore;
use crate::transport::Transport;

/// Builder for a [`RaftNode`].
///
/// Two construction paths, decided by what the store holds:
/// - **Bootstrap**: the store is empty; `initial_members` becomes the
///   founding membership and is persisted before the node activates. A
///   node joining an existing group passes the founders' list (without
///   itself) and runs as a non-member until admitted.
/// - **Restart**: the store has state; term, vote, log, snapshot and
///   membership are restored from it and `initial_members` is ignored.
pub struct RaftNodeBuilder<SM, ST, TP>
where
    SM: StateMachine,
    ST: RaftStore<SM::Operation>,
    TP: Transport<SM::Operation>,
{
    group_id: String,
    local: Endpoint,
    initial_members: BTreeSet<Endpoint>,
    config: RaftConfig,
    store: ST,
    state_machine: SM,
    transport: TP,
    rng_seed: Option<u64>,
}

impl<SM, ST, TP> RaftNodeBuilder<SM, ST, TP>
where
    SM: StateMachine,
    ST: RaftStore<SM::Operation>,
    TP: Transport<SM::Operation>,
{
    pub fn new(
        group_id: impl Into<String>,
        local: Endpoint,
        store: ST,
        state_machine: SM,
        transport: TP,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            local,
            initial_members: BTreeSet::new(),
            config: RaftConfig::default(),
            store,
            state_machine,
            transport,
            rng_seed: None,
        }
    }

    pub fn with_config(mut self, config: RaftConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_initial_members(mut self, members: BTreeSet<Endpoint>) -> Self {
        self.initial_members = members;
        self
    }

    /// Pins election timeout randomness, so tests can reproduce schedules.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Opens the store, bootstraps or restores, and returns an `Active`
    /// node ready to be driven.
    pub fn build(self) -> Result<RaftNode<SM, ST, TP>, RaftError> {
        let config = Arc::new(
            self.config
                .validate()
                .map_err(|e| RaftError::InvalidArgument(e.to_string()))?,
        );

        let mut store = self.store;
        let mut state_machine = self.state_machine;
        store.open().map_err(RaftError::Store)?;
        let restored = store.load().map_err(RaftError::Store)?;

        let mut state = NodeState::new();
        let log;
        let membership;

        match restored {
            Some(r) => {
                if r.local != self.local {
                    return Err(RaftError::InvalidArgument(format!(
                        "store belongs to {}, not {}",
                        r.local, self.local
                    )));
                }
                tracing::info!(
                    term = r.term,
                    entries = r.entries.len(),
                    has_snapshot = r.snapshot.is_some(),
                    "restoring node from store"
                );

                state.term = r.term;
                state.voted_for = r.voted_for;

                let snapshot = r.snapshot.map(|s| {
                    // The state machine restarts from the snapshot image.
                    SnapshotRecord {
                        index: s.index,
                        term: s.term,
                        group_members: s.group_members,
                        chunks: s.chunks,
                    }
                });
                if let Some(s) = &snapshot {
                    let payloads: Vec<Vec<u8>> =
                        s.chunks.iter().map(|c| c.payload.clone()).collect();
                    state_machine
                        .install_snapshot(s.index, &payloads)
                        .map_err(RaftError::Store)?;
                    state.commit_index = s.index;
                    state.last_applied = s.index;
                }

                let base_members = snapshot
                    .as_ref()
                    .map(|s| s.group_members.clone())
                    .unwrap_or(r.initial_members);
                membership = MembershipState::restore(base_members);
                log = RaftLog::restore(snapshot, r.entries);
            }
            None => {
                // A founding member bootstraps with itself in the list; a
                // node joining an existing group bootstraps with the
                // founders' list and runs as a non-member until a
                // membership change admits it.
                if self.initial_members.is_empty() {
                    return Err(RaftError::InvalidArgument(
                        "initial members must not be empty".to_string(),
                    ));
                }
                let initial = GroupMembers::bootstrap(self.initial_members);
                tracing::info!(members = %initial, "bootstrapping new group");
                store
                    .persist_initial_members(&self.local, &initial)
                    .map_err(RaftError::Store)?;
                store.flush().map_err(RaftError::Store)?;
                membership = MembershipState::restore(initial);
                log = RaftLog::new();
            }
        }

        let election_min_ticks = config.ticks_of(config.min_election_timeout).max(1);
        let election_max_ticks = config
            .ticks_of(config.max_election_timeout)
            .max(election_min_ticks + 1);
        let timers = Timers {
            tick_count: 0,
            election_deadline: 0,
            heartbeat_due: 0,
            report_due: config.ticks_of(config.report_publish_period).max(1),
            leader_heard_tick: None,
            election_min_ticks,
            election_max_ticks,
            heartbeat_ticks: config.ticks_of(config.leader_heartbeat_period).max(1),
            heartbeat_timeout_ticks: config.ticks_of(config.leader_heartbeat_timeout).max(2),
            report_ticks: config.ticks_of(config.report_publish_period).max(1),
        };

        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut node = RaftNode {
            group_id: self.group_id,
            local: self.local,
            config,
            store,
            sm: state_machine,
            transport: self.transport,
            log,
            membership,
            state,
            timers,
            pending: PendingRegistry::new(),
            queries: QueryState::new(),
            partial_snapshot: None,
            rng,
            report_tx: watch::channel(placeholder_report()).0,
            take_snapshot_count: 0,
            install_snapshot_count: 0,
        };

        // Uncommitted protocol entries restored with the log tail take
        // effect again.
        let latest = node.latest_membership_in_window();
        if latest.log_index() > node.membership.effective().log_index() {
            node.membership.set_effective(latest);
        }
        node.recompute_termination_status();
        node.state.role = node.follower_role();
        node.reset_election_deadline();
        node.publish_report();

        Ok(node)
    }
}

fn placeholder_report() -> crate::report::RaftNodeReport {
    use crate::report::RaftLogStats;
    use crate::report::RaftNodeReport;

    let empty = Arc::new(GroupMembers::bootstrap(BTreeSet::new()));
    RaftNodeReport {
        group_id: String::new(),
        endpoint: Endpoint::new("", ""),
        role: crate::node::Role::Follower,
        status: crate::node::NodeStatus::Initial,
        term: 0,
        leader: None,
        committed_members: empty.clone(),
        effective_members: empty,
        log: RaftLogStats {
            commit_index: 0,
            last_applied: 0,
            first_log_index: 1,
            last_log_index: 0,
            snapshot_index: 0,
            take_snapshot_count: 0,
            install_snapshot_count: 0,
        },
    }
}
