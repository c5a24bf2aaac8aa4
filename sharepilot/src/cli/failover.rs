use super::Session;
use anyhow::{Context, Result};
use sharepilot::failover::FailoverWatcher;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn failover(config: &Path, node: &str, timeout_secs: Option<u64>) -> Result<()> {
    let session = Session::open(config)?;
    let failover = session
        .settings
        .failover
        .as_ref()
        .context("No [failover] section in config file")?;

    let nodes = session.settings.nfs_nodes();
    let failed = nodes
        .iter()
        .find(|n| n.hostname == node)
        .with_context(|| format!("{} is not one of the configured NFS nodes", node))?
        .clone();
    let timeout = Duration::from_secs(timeout_secs.unwrap_or(failover.timeout_secs));

    let watcher = FailoverWatcher::new(Arc::clone(&session.ctx), Arc::clone(&session.ceph))
        .with_interval(Duration::from_secs(failover.interval_secs));
    let record = watcher
        .trigger_and_wait(&nodes, &failed, &failover.float_address, timeout)
        .await
        .context("Failover check failed")?;

    if let Some(survivor) = &record.survivor {
        println!(
            "✓ {} moved from {} to {} in {:?}",
            record.float_address, record.failed_node.hostname, survivor.hostname, record.elapsed
        );
    }
    Ok(())
}
