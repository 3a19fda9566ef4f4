use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;

use keelraft::Endpoint;
use keelraft::MembershipChangeMode;

use crate::fixtures::RaftRouter;

/// Grow a 3-member group to 4 voters. The joiner starts from the founding
/// member list, is admitted via a single-server change, and ends up with
/// the full replicated state.
#[tokio::test]
async fn grow_cluster_to_four_voters() -> Result<()> {
    let mut router = RaftRouter::new_cluster(3)?;
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;

    let mut last_commit = 0;
    for i in 0..5 {
        last_commit = router.put(&format!("k{i}"), &format!("v{i}")).await?;
    }

    let founders: BTreeSet<Endpoint> =
        ["n1", "n2", "n3"].iter().map(|id| router.endpoint(id)).collect();
    router.spawn_node("n4", founders)?;

    let expected = router
        .group(&leader)
        .report()
        .await?
        .committed_members
        .log_index();
    let members = router
        .group(&leader)
        .change_membership(router.endpoint("n4"), MembershipChangeMode::AddVoter, expected)
        .await?;
    assert_eq!(4, members.voting_members().len());
    assert_eq!(4, members.members().len());

    // The joiner catches up with all five keys.
    router.wait_for_applied("n4", last_commit, Duration::from_secs(5)).await?;
    for i in 0..5 {
        let value = router.read_from("n4", &format!("k{i}"), last_commit).await?;
        assert_eq!(Some(format!("v{i}")), value);
    }
    Ok(())
}
