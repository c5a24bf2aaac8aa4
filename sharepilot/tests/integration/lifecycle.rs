//! Provisioning and teardown of whole assignments against the fake cluster.

use crate::fakes::{FakeCluster, clients};
use sharepilot::RunContext;
use sharepilot::lifecycle::{Provisioner, ResourceState, Stage, TeardownCoordinator};
use sharepilot::share::{ShareTemplate, allocate};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

const CLUSTER: &str = "cephfs-nfs";

const SETUP_ORDER: [ResourceState; 4] = [
    ResourceState::Pending,
    ResourceState::Created,
    ResourceState::Mounted,
    ResourceState::Verified,
];

fn template() -> ShareTemplate {
    ShareTemplate::new("data", "/data", "/mnt/data")
}

/// Setup states a pair went through, in order, with Failed/TornDown removed.
fn setup_states(history: &[ResourceState]) -> Vec<ResourceState> {
    history
        .iter()
        .copied()
        .filter(|s| !matches!(s, ResourceState::Failed | ResourceState::TornDown))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_full_run_leaves_nothing_behind() {
    let ops = Arc::new(FakeCluster::with_service(CLUSTER));
    let assignment = allocate(&clients(2), 5, &template()).unwrap();

    let report = Provisioner::new(Arc::clone(&ops))
        .provision(&assignment)
        .await;
    assert!(report.is_success());
    assert_eq!(report.verified().count(), 5);
    for pair in report.pairs() {
        assert_eq!(pair.history(), SETUP_ORDER.as_slice());
    }
    assert_eq!(ops.exports().len(), 5);
    assert_eq!(ops.mounts().len(), 5);

    let ctx = Arc::new(RunContext::new(CLUSTER));
    let torn = TeardownCoordinator::new(ctx, Arc::clone(&ops))
        .teardown_pairs(report.into_pairs())
        .await;
    assert!(torn.is_clean(), "{:?}", torn.failures);
    assert!(
        torn.pairs
            .iter()
            .all(|p| p.state() == ResourceState::TornDown)
    );
    assert!(ops.exports().is_empty());
    assert!(ops.mounts().is_empty());
    assert!(ops.services().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unmountable_share_is_attempted_exactly_four_times() {
    let mut fake = FakeCluster::with_service(CLUSTER);
    fake.broken_mounts.insert("data_0".to_string());
    let ops = Arc::new(fake);
    let assignment = allocate(&clients(1), 1, &template()).unwrap();

    let start = Instant::now();
    let report = Provisioner::new(Arc::clone(&ops))
        .provision(&assignment)
        .await;

    assert_eq!(ops.mount_attempts.load(Ordering::SeqCst), 4);
    // 5s + 10s + 20s between the four attempts
    assert_eq!(start.elapsed(), Duration::from_secs(35));

    let pair = &report.pairs()[0];
    assert_eq!(pair.state(), ResourceState::Failed);
    assert_eq!(pair.reached(), ResourceState::Created);
    let failure = pair.failure().unwrap();
    assert_eq!(failure.stage, Stage::Mount);
    assert_eq!(failure.attempts, 4);
    assert!(
        failure
            .last_error
            .as_ref()
            .unwrap()
            .message
            .contains("timed out")
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_mount_does_not_hold_up_other_pairs() {
    let mut fake = FakeCluster::with_service(CLUSTER);
    fake.broken_mounts.insert("data_1".to_string());
    let ops = Arc::new(fake);
    let assignment = allocate(&clients(3), 6, &template()).unwrap();

    let report = Provisioner::new(Arc::clone(&ops))
        .provision(&assignment)
        .await;

    assert!(!report.is_success());
    assert_eq!(report.verified().count(), 5);
    let failed: Vec<_> = report.failed().map(|p| p.share().name.as_str()).collect();
    assert_eq!(failed, vec!["data_1"]);
}

#[tokio::test(start_paused = true)]
async fn test_state_sequences_follow_setup_order() {
    let mut fake = FakeCluster::with_service(CLUSTER);
    fake.broken_mounts.insert("data_2".to_string());
    fake.broken_mounts.insert("data_5".to_string());
    let ops = Arc::new(fake);
    let assignment = allocate(&clients(4), 7, &template()).unwrap();

    let report = Provisioner::new(Arc::clone(&ops))
        .with_max_parallel(2)
        .provision(&assignment)
        .await;
    let ctx = Arc::new(RunContext::new(CLUSTER));
    let torn = TeardownCoordinator::new(ctx, Arc::clone(&ops))
        .teardown_pairs(report.into_pairs())
        .await;

    for pair in &torn.pairs {
        let states = setup_states(pair.history());
        assert!(!states.is_empty());
        assert!(
            SETUP_ORDER.starts_with(&states),
            "{} went through {:?}",
            pair.share().name,
            pair.history()
        );
        assert_eq!(pair.history().last(), Some(&ResourceState::TornDown));
    }

    // Exports of pairs that failed to mount were still removed.
    assert!(ops.exports().is_empty());
    let calls = ops.calls();
    assert!(!calls.contains(&"umount data_2".to_string()));
    assert!(calls.contains(&"delete data_2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_report_keeps_assignment_order() {
    let ops = Arc::new(FakeCluster::with_service(CLUSTER));
    let assignment = allocate(&clients(3), 8, &template()).unwrap();

    let report = Provisioner::new(ops).provision(&assignment).await;
    let reported: Vec<_> = report
        .pairs()
        .iter()
        .map(|p| (p.client().hostname.clone(), p.share().name.clone()))
        .collect();
    let expected: Vec<_> = assignment
        .pairs()
        .map(|(c, s)| (c.hostname.clone(), s.name.clone()))
        .collect();
    assert_eq!(reported, expected);
}
