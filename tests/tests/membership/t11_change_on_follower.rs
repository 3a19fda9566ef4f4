use std::time::Duration;

use anyhow::Result;

use keelraft::MembershipChangeMode;
use keelraft::RaftError;

use crate::fixtures::RaftRouter;

/// A membership change submitted to a follower fails with `NotLeader`
/// (never `InvalidArgument`), and names the leader.
#[tokio::test]
async fn remove_member_on_follower_fails_with_not_leader() -> Result<()> {
    let router = RaftRouter::new_cluster(3)?;
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;

    // Let the leader announce itself to everyone first.
    router.put("warmup", "1").await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let follower = router
        .node_ids()
        .into_iter()
        .find(|id| *id != leader)
        .expect("a follower exists");

    let result = router
        .group(&follower)
        .change_membership(router.endpoint(&leader), MembershipChangeMode::RemoveMember, 0)
        .await;

    match result {
        Err(RaftError::NotLeader { leader: hint }) => {
            assert_eq!(Some(router.endpoint(&leader)), hint);
        }
        other => panic!("expected NotLeader, got {other:?}"),
    }
    Ok(())
}
