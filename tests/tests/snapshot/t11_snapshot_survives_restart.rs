use std::time::Duration;

use anyhow::Result;

use keelraft::RaftConfig;

use crate::fixtures::fast_config;
use crate::fixtures::RaftRouter;

/// After a crash, a member restores term, log and snapshot from its store
/// and serves the full state again.
#[tokio::test]
async fn snapshot_survives_restart() -> Result<()> {
    let config = RaftConfig {
        commit_count_to_take_snapshot: 10,
        ..fast_config()
    };
    let mut router = RaftRouter::new(config);
    let members: std::collections::BTreeSet<keelraft::Endpoint> =
        [router.endpoint("n1")].into_iter().collect();
    router.spawn_node("n1", members)?;
    router.wait_for_leader(Duration::from_secs(5)).await?;

    let mut last_commit = 0;
    for i in 0..15 {
        last_commit = router.put(&format!("r{i}"), &format!("v{i}")).await?;
    }
    let report = router.group("n1").report().await?;
    assert!(report.log.snapshot_index >= 10);
    let term_before = report.term;

    // Crash and restart from the surviving store.
    router.shutdown("n1").await;
    router.restart_node("n1")?;
    router.wait_for_leader(Duration::from_secs(5)).await?;

    let report = router.group("n1").report().await?;
    assert!(report.term > term_before, "restart re-elects at a later term");
    assert!(report.log.snapshot_index >= 10);

    router.wait_for_applied("n1", last_commit, Duration::from_secs(5)).await?;
    for i in 0..15 {
        let value = router.read_from("n1", &format!("r{i}"), last_commit).await?;
        assert_eq!(Some(format!("v{i}")), value, "key r{i}");
    }
    Ok(())
}
