use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use keelraft::Endpoint;
use keelraft::MembershipChangeMode;

use crate::fixtures::RaftRouter;

/// Cluster concurrently writes new logs and churns a learner in and out of
/// the membership. Writes must keep committing and the group must stay
/// consistent throughout.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_write_and_change_membership() -> Result<()> {
    let mut router = RaftRouter::new_cluster(3)?;
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;

    let founders: BTreeSet<Endpoint> =
        ["n1", "n2", "n3"].iter().map(|id| router.endpoint(id)).collect();
    router.spawn_node("n4", founders)?;
    let n4 = router.endpoint("n4");

    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let writer = {
        let group = router.group(&leader);
        tokio::spawn(async move {
            let mut written = 0u64;
            loop {
                match stop_rx.try_recv() {
                    Err(TryRecvError::Closed) => break,
                    _ => {}
                }
                let key = format!("w{written}");
                if group.submit(crate::fixtures::kv_put(&key, "x")).await.is_ok() {
                    written += 1;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            written
        })
    };

    // Churn the learner in and out while the writer runs.
    let group = router.group(&leader);
    for _ in 0..3 {
        let committed = group.report().await?.committed_members;
        if committed.is_member(&n4) {
            let _ = group
                .change_membership(
                    n4.clone(),
                    MembershipChangeMode::RemoveMember,
                    committed.log_index(),
                )
                .await;
        } else {
            let _ = group
                .change_membership(
                    n4.clone(),
                    MembershipChangeMode::AddLearner,
                    committed.log_index(),
                )
                .await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    drop(stop_tx);
    let written = writer.await?;
    assert!(written > 0, "writer must have made progress");

    // Every voter converges on the same applied state.
    let last_commit = router.put("fence", "done").await?;
    for id in ["n1", "n2", "n3"] {
        router.wait_for_applied(id, last_commit, Duration::from_secs(5)).await?;
        let value = router.read_from(id, "fence", last_commit).await?;
        assert_eq!(Some("done".to_string()), value, "{id}");
    }
    Ok(())
}
