use std::time::Duration;

use anyhow::Result;

use crate::fixtures::RaftRouter;

/// A partitioned follower misses a batch of writes, then converges after
/// the partition heals, with no client-visible failures.
#[tokio::test]
async fn follower_rejoins_after_partition() -> Result<()> {
    let router = RaftRouter::new_cluster(3)?;
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;

    let follower = router
        .node_ids()
        .into_iter()
        .find(|id| *id != leader)
        .expect("a follower exists");
    router.isolate(&follower);

    let mut last_commit = 0;
    for i in 0..10 {
        last_commit = router.put(&format!("p{i}"), &format!("v{i}")).await?;
    }

    router.heal();
    router.wait_for_applied(&follower, last_commit, Duration::from_secs(5)).await?;
    for i in 0..10 {
        let value = router.read_from(&follower, &format!("p{i}"), last_commit).await?;
        assert_eq!(Some(format!("v{i}")), value);
    }
    Ok(())
}
