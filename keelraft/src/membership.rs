//! Group membership model: who is in the group, and who votes.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::model::Endpoint;
use crate::model::LogIndex;

/// The members of a Raft group as of a specific log index.
///
/// `members` is everyone receiving replication; `voting_members` is the
/// subset counted toward election and commit quorums. A member present in
/// `members` but not in `voting_members` is a learner.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct GroupMembers {
    log_index: LogIndex,
    members: BTreeSet<Endpoint>,
    voting_members: BTreeSet<Endpoint>,
}

impl GroupMembers {
    pub fn new(
        log_index: LogIndex,
        members: BTreeSet<Endpoint>,
        voting_members: BTreeSet<Endpoint>,
    ) -> Self {
        debug_assert!(voting_members.is_subset(&members));
        Self {
            log_index,
            members,
            voting_members,
        }
    }

    /// Bootstrap membership: every initial member is a voter, at index 0.
    pub fn bootstrap(initial: BTreeSet<Endpoint>) -> Self {
        Self {
            log_index: 0,
            voting_members: initial.clone(),
            members: initial,
        }
    }

    pub fn log_index(&self) -> LogIndex {
        self.log_index
    }

    pub fn members(&self) -> &BTreeSet<Endpoint> {
        &self.members
    }

    pub fn voting_members(&self) -> &BTreeSet<Endpoint> {
        &self.voting_members
    }

    pub fn is_member(&self, endpoint: &Endpoint) -> bool {
        self.members.contains(endpoint)
    }

    pub fn is_voting_member(&self, endpoint: &Endpoint) -> bool {
        self.voting_members.contains(endpoint)
    }

    pub fn is_learner(&self, endpoint: &Endpoint) -> bool {
        self.is_member(endpoint) && !self.is_voting_member(endpoint)
    }

    /// Replication targets as seen from `local`: every member but itself.
    pub fn peers_of<'a>(&'a self, local: &'a Endpoint) -> impl Iterator<Item = &'a Endpoint> {
        self.members.iter().filter(move |m| *m != local)
    }
}

impl fmt::Display for GroupMembers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let voters: Vec<&str> = self.voting_members.iter().map(|e| e.id()).collect();
        let learners: Vec<&str> = self
            .members
            .iter()
            .filter(|e| !self.voting_members.contains(*e))
            .map(|e| e.id())
            .collect();
        write!(
            f,
            "{{at:{}, voters:[{}], learners:[{}]}}",
            self.log_index,
            voters.join(","),
            learners.join(",")
        )
    }
}

/// Payload of a membership-change log entry: the full member sets that take
/// effect at the entry's index.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct UpdateGroupMembersOp {
    pub members: BTreeSet<Endpoint>,
    pub voting_members: BTreeSet<Endpoint>,
}

impl UpdateGroupMembersOp {
    pub fn at_index(&self, log_index: LogIndex) -> GroupMembers {
        GroupMembers::new(log_index, self.members.clone(), self.voting_members.clone())
    }
}

/// The kind of single-server membership change a client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(derive_more::Display)]
pub enum MembershipChangeMode {
    /// Add a new voting member.
    #[display("AddVoter")]
    AddVoter,
    /// Add a new non-voting member.
    #[display("AddLearner")]
    AddLearner,
    /// Turn an existing learner into a voting member.
    #[display("PromoteToVoter")]
    PromoteToVoter,
    /// Remove an existing member.
    #[display("RemoveMember")]
    RemoveMember,
}

/// The committed membership plus the effective one, which may additionally
/// contain one not-yet-committed change.
///
/// Invariants: `effective.log_index() >= committed.log_index()`, and the two
/// differ by at most one membership-change entry.
#[derive(Debug, Clone)]
pub struct MembershipState {
    committed: Arc<GroupMembers>,
    effective: Arc<GroupMembers>,
}

impl MembershipState {
    pub fn new(committed: Arc<GroupMembers>, effective: Arc<GroupMembers>) -> Self {
        debug_assert!(effective.log_index() >= committed.log_index());
        Self {
            committed,
            effective,
        }
    }

    pub fn restore(committed: GroupMembers) -> Self {
        let committed = Arc::new(committed);
        Self {
            effective: committed.clone(),
            committed,
        }
    }

    pub fn committed(&self) -> &Arc<GroupMembers> {
        &self.committed
    }

    pub fn effective(&self) -> &Arc<GroupMembers> {
        &self.effective
    }

    /// True while an uncommitted membership change is in flight.
    pub fn change_in_progress(&self) -> bool {
        self.effective.log_index() != self.committed.log_index()
    }

    /// A membership entry was appended; it becomes effective immediately.
    pub(crate) fn set_effective(&mut self, effective: GroupMembers) {
        debug_assert!(effective.log_index() >= self.committed.log_index());
        self.effective = Arc::new(effective);
    }

    /// The entry at `effective`'s index committed.
    pub(crate) fn commit_effective(&mut self) {
        self.committed = self.effective.clone();
    }

    /// Both sets move at once: snapshot install or restore.
    pub(crate) fn reset(&mut self, members: GroupMembers) {
        let members = Arc::new(members);
        self.committed = members.clone();
        self.effective = members;
    }

    /// The effective membership entry was truncated from the log; fall back
    /// to `previous` (the newest surviving membership record).
    pub(crate) fn revert_effective(&mut self, previous: GroupMembers) {
        debug_assert!(previous.log_index() >= self.committed.log_index());
        self.effective = Arc::new(previous);
    }
}
