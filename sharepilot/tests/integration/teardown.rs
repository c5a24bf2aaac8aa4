//! Teardown failure handling across many pairs.

use crate::fakes::{FakeCluster, clients};
use sharepilot::RunContext;
use sharepilot::error::TeardownStage;
use sharepilot::lifecycle::{
    Provisioner, ResourceState, ResourceStateMachine, TeardownCoordinator, TeardownOps,
};
use sharepilot::share::{ShareTemplate, allocate};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

const CLUSTER: &str = "cephfs-nfs";

fn template() -> ShareTemplate {
    ShareTemplate::new("share", "/export", "/mnt/share")
}

fn coordinator(ops: &Arc<FakeCluster>) -> TeardownCoordinator<FakeCluster> {
    TeardownCoordinator::new(Arc::new(RunContext::new(CLUSTER)), Arc::clone(ops))
}

#[tokio::test(start_paused = true)]
async fn test_one_stuck_unmount_does_not_stop_the_others() {
    let mut fake = FakeCluster::with_service(CLUSTER);
    fake.stuck_unmounts.insert("share_2".to_string());
    let ops = Arc::new(fake);
    let assignment = allocate(&clients(5), 5, &template()).unwrap();

    let provisioned = Provisioner::new(Arc::clone(&ops))
        .provision(&assignment)
        .await;
    assert!(provisioned.is_success());

    let report = coordinator(&ops)
        .teardown_pairs(provisioned.into_pairs())
        .await;

    for pair in &report.pairs {
        if pair.share().name == "share_2" {
            assert_eq!(pair.state(), ResourceState::Verified);
        } else {
            assert_eq!(pair.state(), ResourceState::TornDown, "{}", pair.share().name);
        }
    }

    let calls = ops.calls();
    assert!(calls.contains(&"umount share_2".to_string()));
    assert!(calls.contains(&"umount -l share_2".to_string()));
    // The export backing a still-mounted share stays.
    assert!(!calls.contains(&"delete share_2".to_string()));
    assert_eq!(
        ops.exports().into_iter().collect::<Vec<_>>(),
        vec!["share_2".to_string()]
    );
    // The cluster goes regardless.
    assert!(calls.contains(&format!("delete cluster {}", CLUSTER)));

    let err = report.into_result().unwrap_err();
    assert_eq!(err.failures.len(), 1);
    let failure = &err.failures[0];
    assert_eq!(failure.stage, TeardownStage::Unmount);
    assert_eq!(failure.client, "client-2");
    assert_eq!(failure.attempts, 2);
    assert_eq!(err.failed_shares().collect::<Vec<_>>(), vec!["share_2"]);
    assert!(err.to_string().contains("share_2"));
}

#[tokio::test(start_paused = true)]
async fn test_busy_mounts_are_cleared_after_retries() {
    let mut fake = FakeCluster::with_service(CLUSTER);
    fake.busy_clears.insert("share_0".to_string(), 3);
    let ops = Arc::new(fake);
    let assignment = allocate(&clients(1), 2, &template()).unwrap();

    let start = Instant::now();
    let result = coordinator(&ops).teardown(&assignment).await;
    assert!(result.is_ok(), "{:?}", result);

    // Three failures on share_0 and one clean pass on share_1.
    assert_eq!(ops.clear_attempts.load(Ordering::SeqCst), 5);
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_of_previous_run_deletes_missing_exports_quietly() {
    // Nothing was ever created; teardown still walks every step and succeeds.
    let ops = Arc::new(FakeCluster::with_service(CLUSTER));
    let assignment = allocate(&clients(2), 3, &template()).unwrap();

    coordinator(&ops).teardown(&assignment).await.unwrap();

    let deletes = ops
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("delete share_"))
        .count();
    assert_eq!(deletes, 3);
    assert!(ops.services().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rerun_after_partial_teardown_removes_remaining_exports() {
    let ops = Arc::new(FakeCluster::with_service(CLUSTER));
    let assignment = allocate(&clients(2), 4, &template()).unwrap();
    let provisioned = Provisioner::new(Arc::clone(&ops))
        .provision(&assignment)
        .await;
    assert!(provisioned.is_success());

    // An interrupted teardown unmounted share_1 and stopped there.
    let (client, share) = assignment
        .pairs()
        .find(|(_, s)| s.name == "share_1")
        .unwrap();
    ops.unmount(client, share, false).await.unwrap();

    coordinator(&ops).teardown(&assignment).await.unwrap();

    assert!(ops.exports().is_empty());
    assert!(ops.mounts().is_empty());
    let umounts = ops
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("umount") && c.ends_with("share_1"))
        .count();
    assert_eq!(umounts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_pairs_are_left_alone() {
    let ops = Arc::new(FakeCluster::with_service(CLUSTER));
    let assignment = allocate(&clients(1), 2, &template()).unwrap();
    let pairs = assignment
        .pairs()
        .map(|(c, s)| ResourceStateMachine::new(c.clone(), s.clone()))
        .collect();

    let report = coordinator(&ops).teardown_pairs(pairs).await;
    assert!(report.is_clean());
    assert!(
        ops.calls()
            .iter()
            .all(|c| c.starts_with("delete cluster"))
    );
}
