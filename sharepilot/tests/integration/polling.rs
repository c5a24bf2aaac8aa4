//! Deadline behaviour of the convergence poller and retry loop.

use crate::fakes::exit_error;
use sharepilot::health::{HealthCheck, wait_until_healthy};
use sharepilot::poll::ConvergencePoller;
use sharepilot::retry::{RetryPolicy, run_with_retries};
use sharepilot::share::ClientRef;
use sharepilot::{PilotError, RemoteError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_never_true_condition_stops_at_the_deadline() {
    for (timeout, interval) in [(60, 7), (60, 10), (5, 10), (300, 10)] {
        let timeout = Duration::from_secs(timeout);
        let interval = Duration::from_secs(interval);
        let poller = ConvergencePoller::new(timeout, interval);

        let start = Instant::now();
        let result = poller
            .await_condition(|| async { Ok::<_, RemoteError>(false) })
            .await;

        assert!(!result.satisfied);
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < timeout + interval);
        assert_eq!(result.elapsed, start.elapsed());
    }
}

#[tokio::test(start_paused = true)]
async fn test_errors_are_retried_until_the_condition_holds() {
    let checks = AtomicU32::new(0);
    let poller = ConvergencePoller::new(Duration::from_secs(60), Duration::from_secs(5));

    let result = poller
        .await_condition(|| async {
            match checks.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(exit_error("node-1", "ceph health", "monclient: timed out")),
                2 => Ok(false),
                _ => Ok(true),
            }
        })
        .await;

    assert!(result.satisfied);
    assert_eq!(result.attempts, 4);
    assert_eq!(result.elapsed, Duration::from_secs(15));
    assert_eq!(result.last_error.unwrap().command, "ceph health");
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_counts_every_call() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::fixed(3, Duration::from_secs(10));

    let start = Instant::now();
    let outcome = run_with_retries(&policy, "create export", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(exit_error("admin", "ceph nfs export create", "EAGAIN"))
    })
    .await;

    assert!(outcome.result.is_err());
    assert_eq!(outcome.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(20));
}

struct FlakyHealth {
    healthy_after: u32,
    checks: AtomicU32,
}

#[async_trait::async_trait]
impl HealthCheck for FlakyHealth {
    async fn is_cluster_healthy(&self, _: &ClientRef) -> Result<bool, RemoteError> {
        let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(n > self.healthy_after)
    }
}

#[tokio::test(start_paused = true)]
async fn test_health_wait_reports_a_timeout_as_an_error() {
    let health = FlakyHealth {
        healthy_after: u32::MAX,
        checks: AtomicU32::new(0),
    };
    let admin = ClientRef::new("admin", "10.0.0.1");
    let poller = ConvergencePoller::new(Duration::from_secs(30), Duration::from_secs(10));

    let err = wait_until_healthy(&health, &admin, &poller).await.unwrap_err();
    assert!(matches!(
        err,
        PilotError::ConvergenceTimeout { attempts: 4, .. }
    ));
}
