use std::time::Duration;

use anyhow::Result;

use keelraft::QueryPolicy;
use keelraft::RaftError;

use crate::fixtures::kv_get;
use crate::fixtures::RaftRouter;

/// A linearizable read through the leader observes every write committed
/// before it; on a follower it fails with `NotLeader`.
#[tokio::test]
async fn linearizable_read() -> Result<()> {
    let router = RaftRouter::new_cluster(3)?;
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;

    let commit_index = router.put("x", "1").await?;

    let read = router
        .group(&leader)
        .query(kv_get("x"), QueryPolicy::Linearizable, 0)
        .await?;
    assert_eq!(Some("1".to_string()), read.result);
    assert!(read.commit_index >= commit_index);

    let follower = router
        .node_ids()
        .into_iter()
        .find(|id| *id != leader)
        .expect("a follower exists");
    let result = router
        .group(&follower)
        .query(kv_get("x"), QueryPolicy::Linearizable, 0)
        .await;
    assert!(matches!(result, Err(RaftError::NotLeader { .. })));
    Ok(())
}
