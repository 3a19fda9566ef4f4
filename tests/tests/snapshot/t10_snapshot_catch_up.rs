use std::time::Duration;

use anyhow::Result;

use keelraft::RaftConfig;

use crate::fixtures::fast_config;
use crate::fixtures::RaftRouter;

/// A follower partitioned across a snapshot boundary catches up via the
/// chunked snapshot install protocol and converges on the full state.
#[tokio::test]
async fn snapshot_catch_up() -> Result<()> {
    let config = RaftConfig {
        commit_count_to_take_snapshot: 10,
        ..fast_config()
    };
    let mut router = RaftRouter::new(config);
    let members: std::collections::BTreeSet<keelraft::Endpoint> =
        ["n1", "n2", "n3"].iter().map(|id| router.endpoint(id)).collect();
    for id in ["n1", "n2", "n3"] {
        router.spawn_node(id, members.clone())?;
    }
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;

    let follower = router
        .node_ids()
        .into_iter()
        .find(|id| *id != leader)
        .expect("a follower exists");
    router.isolate(&follower);

    let mut last_commit = 0;
    for i in 0..25 {
        last_commit = router.put(&format!("s{i}"), &format!("v{i}")).await?;
    }

    // The leader compacted at least twice behind the follower's back.
    let leader_report = router.group(&leader).report().await?;
    assert!(leader_report.log.take_snapshot_count >= 2);
    assert!(leader_report.log.snapshot_index >= 20);

    router.heal();
    router.wait_for_applied(&follower, last_commit, Duration::from_secs(10)).await?;

    let follower_report = router.group(&follower).report().await?;
    assert!(follower_report.log.install_snapshot_count >= 1, "must catch up via snapshot");
    for i in 0..25 {
        let value = router.read_from(&follower, &format!("s{i}"), last_commit).await?;
        assert_eq!(Some(format!("v{i}")), value, "key s{i}");
    }
    Ok(())
}
