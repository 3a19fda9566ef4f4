/// A set of ids that can decide whether a group of granted ids forms a
/// quorum.
///
/// This crate only uses majority quorums over the voting members of the
/// effective group membership, but commit and election decisions go through
/// this trait so that the rule lives in exactly one place.
pub trait QuorumSet<ID: PartialOrd + Ord + 'static> {
    /// Returns true if `granted` contains a quorum of this set.
    ///
    /// Ids in `granted` that are not in this set are ignored, so a response
    /// from a removed or non-voting member never counts toward a decision.
    fn is_quorum<'a, I: Iterator<Item = &'a ID> + Clone>(&self, granted: I) -> bool;

    /// Ids of this quorum set.
    fn ids(&self) -> Vec<ID>;
}
