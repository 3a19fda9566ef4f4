use std::time::Duration;

use anyhow::Result;

use crate::fixtures::RaftRouter;

/// A graceful handoff moves leadership to the requested member without
/// waiting for any timeout to expire.
#[tokio::test]
async fn leadership_transfer() -> Result<()> {
    let router = RaftRouter::new_cluster(3)?;

    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;
    router.put("k", "v").await?;

    let target = router
        .node_ids()
        .into_iter()
        .find(|id| *id != leader)
        .expect("a follower exists");

    router.group(&leader).transfer_leadership(router.endpoint(&target)).await?;

    let new_leader = router.wait_for_leader(Duration::from_secs(5)).await?;
    assert_eq!(target, new_leader);

    // The group still accepts writes after the handoff.
    router.put("after", "transfer").await?;
    Ok(())
}
