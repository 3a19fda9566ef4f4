use std::time::Duration;

use anyhow::Result;

use crate::fixtures::RaftRouter;

/// Committed writes become visible on every member's state machine, in the
/// same apply order.
#[tokio::test]
async fn replicate_to_followers() -> Result<()> {
    let router = RaftRouter::new_cluster(3)?;
    router.wait_for_leader(Duration::from_secs(5)).await?;

    let mut last_commit = 0;
    for i in 0..10 {
        last_commit = router.put(&format!("k{i}"), &format!("v{i}")).await?;
    }

    for id in router.node_ids() {
        router.wait_for_applied(&id, last_commit, Duration::from_secs(5)).await?;
        for i in 0..10 {
            let value = router.read_from(&id, &format!("k{i}"), last_commit).await?;
            assert_eq!(Some(format!("v{i}")), value, "key k{i} on {id}");
        }
    }
    Ok(())
}
