use std::time::Duration;

use anyhow::Result;

use crate::fixtures::RaftRouter;

/// A fresh 3-member group elects exactly one leader; the other members
/// follow it.
#[tokio::test]
async fn initial_election() -> Result<()> {
    let router = RaftRouter::new_cluster(3)?;

    let leader = router.wait_for_leader(Duration::from_secs(5)).await?;

    let leader_report = router.group(&leader).report().await?;
    assert_eq!(keelraft::Role::Leader, leader_report.role);
    assert!(leader_report.term >= 1);

    // Followers converge on the same leader and term.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut leader_count = 0;
    for id in router.node_ids() {
        let report = router.group(&id).report().await?;
        if report.role == keelraft::Role::Leader {
            leader_count += 1;
        } else {
            assert_eq!(Some(router.endpoint(&leader)), report.leader, "{id}");
            assert_eq!(leader_report.term, report.term, "{id}");
        }
    }
    assert_eq!(1, leader_count);
    Ok(())
}
