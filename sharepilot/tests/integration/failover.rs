//! Float-address failover with several candidate survivors.

use crate::fakes::FloatingNodes;
use sharepilot::failover::{self, FailoverWatcher};
use sharepilot::share::ClientRef;
use sharepilot::{PilotError, RunContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const VIP: &str = "10.8.128.100";

fn nodes(names: &[&str]) -> Vec<ClientRef> {
    names
        .iter()
        .map(|n| ClientRef::new(*n, format!("{}.lab", n)))
        .collect()
}

fn watcher(ops: FloatingNodes) -> (FailoverWatcher<FloatingNodes>, Arc<FloatingNodes>) {
    let ops = Arc::new(ops);
    let watcher = FailoverWatcher::new(Arc::new(RunContext::new("cephfs-nfs")), Arc::clone(&ops));
    (watcher, ops)
}

#[tokio::test(start_paused = true)]
async fn test_first_node_to_take_the_address_wins() {
    let ops = FloatingNodes::new(VIP, &[("b", 10), ("c", 15)], Duration::from_secs(60));
    let (watcher, ops) = watcher(ops);
    let all = nodes(&["a", "b", "c"]);

    let start = Instant::now();
    let record = watcher
        .trigger_and_wait(&all, &all[0], &format!("{}/21", VIP), failover::DEFAULT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(record.survivor.as_ref().unwrap().hostname, "b");
    // The 60s reboot is cancelled, not waited for.
    assert!(start.elapsed() < Duration::from_secs(15));
    assert_eq!(record.elapsed, start.elapsed());
    assert_eq!(record.float_address, VIP);
    assert_eq!(record.failed_node.hostname, "a");
    assert_eq!(*ops.disrupted.lock().unwrap(), vec!["a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_order_does_not_hide_an_earlier_survivor() {
    // c is scanned first but only gets the address at 15s.
    let ops = FloatingNodes::new(VIP, &[("b", 10), ("c", 15)], Duration::from_secs(5));
    let (watcher, _) = watcher(ops);
    let all = nodes(&["a", "c", "b"]);

    let record = watcher
        .trigger_and_wait(&all, &all[0], VIP, failover::DEFAULT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(record.survivor.unwrap().hostname, "b");
    assert_eq!(record.elapsed, Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_disrupted_node_is_never_the_survivor() {
    let ops = FloatingNodes::new(VIP, &[("a", 0), ("c", 20)], Duration::from_secs(5));
    let (watcher, _) = watcher(ops);
    let all = nodes(&["a", "b", "c"]);

    let record = watcher
        .trigger_and_wait(&all, &all[0], VIP, failover::DEFAULT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(record.survivor.unwrap().hostname, "c");
}

#[tokio::test(start_paused = true)]
async fn test_no_survivor_times_out() {
    let ops = FloatingNodes::new(VIP, &[], Duration::from_secs(300));
    let (watcher, _) = watcher(ops);
    let all = nodes(&["a", "b", "c"]);
    let timeout = failover::DEFAULT_TIMEOUT;
    let interval = failover::DEFAULT_INTERVAL;

    let start = Instant::now();
    let err = watcher
        .trigger_and_wait(&all, &all[1], VIP, timeout)
        .await
        .unwrap_err();

    match err {
        PilotError::FailoverTimeout {
            record, attempts, ..
        } => {
            assert!(record.survivor.is_none());
            assert_eq!(record.failed_node.hostname, "b");
            assert!(start.elapsed() >= timeout);
            assert!(start.elapsed() < timeout + interval);
            assert!(record.elapsed >= timeout);
            // 0s, 5s, .., 120s
            assert_eq!(attempts, 25);
        }
        other => panic!("expected a failover timeout, got {other:?}"),
    }
}
