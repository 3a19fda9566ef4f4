use std::time::Duration;

use anyhow::Result;

use keelraft::QueryPolicy;
use keelraft::RaftError;

use crate::fixtures::kv_get;
use crate::fixtures::RaftRouter;

/// Leader-local reads answer immediately on the leader; eventual reads run
/// on any member once its commit index reaches the caller's floor, and time
/// out when it never does.
#[tokio::test]
async fn read_policies() -> Result<()> {
    let router = RaftRouter::new_cluster(3)?;
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;
    let commit_index = router.put("y", "2").await?;

    let read = router
        .group(&leader)
        .query(kv_get("y"), QueryPolicy::LeaderLocal, 0)
        .await?;
    assert_eq!(Some("2".to_string()), read.result);

    // Eventual read on a follower, gated on the write's commit index.
    let follower = router
        .node_ids()
        .into_iter()
        .find(|id| *id != leader)
        .expect("a follower exists");
    let read = router
        .group(&follower)
        .query(kv_get("y"), QueryPolicy::EventualConsistency, commit_index)
        .await?;
    assert_eq!(Some("2".to_string()), read.result);

    // A floor that can never be reached fails with a timeout.
    let result = router
        .group(&follower)
        .query(kv_get("y"), QueryPolicy::EventualConsistency, 1_000_000)
        .await;
    assert!(matches!(result, Err(RaftError::Timeout(_))));
    Ok(())
}
