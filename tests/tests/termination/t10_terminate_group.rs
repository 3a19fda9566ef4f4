use std::time::Duration;

use anyhow::Result;

use keelraft::NodeStatus;
use keelraft::RaftError;

use crate::fixtures::kv_put;
use crate::fixtures::RaftRouter;

/// Terminating the group replicates the terminate marker; every member
/// ends up `Terminated` and new writes are rejected.
#[tokio::test]
async fn terminate_group() -> Result<()> {
    let router = RaftRouter::new_cluster(3)?;
    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;
    router.put("k", "v").await?;

    let commit_index = router.group(&leader).terminate_group().await?;
    assert!(commit_index > 1);

    // Followers apply the marker and terminate too.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    'outer: loop {
        let mut terminated = 0;
        for id in router.node_ids() {
            let report = router.group(&id).last_report();
            if report.status == NodeStatus::Terminated {
                terminated += 1;
            }
        }
        if terminated == 3 {
            break 'outer;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("not all members terminated");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // A terminated group serves nothing.
    let result = router.group(&leader).submit(kv_put("after", "x")).await;
    assert!(matches!(
        result,
        Err(RaftError::Terminated) | Err(RaftError::CannotReplicate { .. })
    ));
    Ok(())
}
