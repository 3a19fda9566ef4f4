use std::time::Duration;

use anyhow::Result;

use keelraft::QueryPolicy;

use crate::fixtures::kv_get;
use crate::fixtures::kv_put;
use crate::fixtures::RaftRouter;

/// A single-member group: the first client write commits at index 2, right
/// after the leader's own term-start entry.
#[tokio::test]
async fn singleton_commit() -> Result<()> {
    let router = RaftRouter::new_cluster(1)?;
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;

    let outcome = router.group(&leader).submit(kv_put("k", "v")).await?;
    assert_eq!(2, outcome.commit_index);
    assert_eq!(Some("v".to_string()), outcome.result);

    let read = router
        .group(&leader)
        .query(kv_get("k"), QueryPolicy::Linearizable, 0)
        .await?;
    assert_eq!(Some("v".to_string()), read.result);
    Ok(())
}
