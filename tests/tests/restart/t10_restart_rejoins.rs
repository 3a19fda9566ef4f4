use std::time::Duration;

use anyhow::Result;

use crate::fixtures::RaftRouter;

/// A crashed member restarts from its store, rejoins the group and catches
/// up with writes it missed while down.
#[tokio::test]
async fn restart_rejoins_and_catches_up() -> Result<()> {
    let mut router = RaftRouter::new_cluster(3)?;
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;
    router.put("before", "crash").await?;

    let victim = router
        .node_ids()
        .into_iter()
        .find(|id| *id != leader)
        .expect("a follower exists");
    router.shutdown(&victim).await;

    let mut last_commit = 0;
    for i in 0..5 {
        last_commit = router.put(&format!("down{i}"), &format!("v{i}")).await?;
    }

    router.restart_node(&victim)?;
    router.wait_for_applied(&victim, last_commit, Duration::from_secs(5)).await?;

    assert_eq!(
        Some("crash".to_string()),
        router.read_from(&victim, "before", last_commit).await?
    );
    for i in 0..5 {
        let value = router.read_from(&victim, &format!("down{i}"), last_commit).await?;
        assert_eq!(Some(format!("v{i}")), value);
    }
    Ok(())
}
