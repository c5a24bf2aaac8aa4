use super::Session;
use anyhow::{Context, Result};
use sharepilot::health::wait_until_healthy;
use sharepilot::poll::ConvergencePoller;
use std::path::Path;
use std::time::Duration;

pub async fn wait_healthy(config: &Path, timeout_secs: Option<u64>) -> Result<()> {
    let session = Session::open(config)?;
    let mut poller = session.settings.policy.health();
    if let Some(secs) = timeout_secs {
        poller = ConvergencePoller::new(Duration::from_secs(secs), poller.interval());
    }

    let admin = session.settings.cluster.admin.to_client_ref();
    let result = wait_until_healthy(session.ceph.as_ref(), &admin, &poller)
        .await
        .context("Cluster did not become healthy")?;
    println!(
        "✓ Cluster healthy after {:?} ({} check(s))",
        result.elapsed, result.attempts
    );
    Ok(())
}
