use std::time::Duration;

use anyhow::Result;

use crate::fixtures::fast_config;
use crate::fixtures::RaftRouter;

/// Shutting the leader down yields a new leader, at a higher term, within
/// twice the leader heartbeat timeout.
#[tokio::test]
async fn leader_failover() -> Result<()> {
    let mut router = RaftRouter::new_cluster(3)?;

    let old_leader = router.wait_for_leader(Duration::from_secs(5)).await?;
    let old_term = router.group(&old_leader).report().await?.term;

    router.shutdown(&old_leader).await;

    let failover_window = 2 * fast_config().leader_heartbeat_timeout;
    let new_leader = router.wait_for_new_leader(&old_leader, failover_window).await?;

    assert_ne!(old_leader, new_leader);
    let new_term = router.group(&new_leader).report().await?.term;
    assert!(new_term > old_term, "term must advance: {old_term} -> {new_term}");
    Ok(())
}
