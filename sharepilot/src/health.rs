use crate::error::{RemoteError, Result};
use crate::poll::{ConvergencePoller, ConvergenceResult};
use crate::share::ClientRef;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Asks the cluster, from `client`, whether it reports itself healthy.
    async fn is_cluster_healthy(&self, client: &ClientRef) -> std::result::Result<bool, RemoteError>;
}

/// Polls `health` until the cluster is healthy. Timeout is a
/// [`ConvergenceTimeout`](crate::error::PilotError::ConvergenceTimeout).
pub async fn wait_until_healthy<P: HealthCheck + ?Sized>(
    health: &P,
    client: &ClientRef,
    poller: &ConvergencePoller,
) -> Result<ConvergenceResult<RemoteError>> {
    let result = poller
        .await_condition_with(|| health.is_cluster_healthy(client), RemoteError::is_fatal)
        .await?
        .ok_or_timeout("cluster health")?;
    info!(attempts = result.attempts, elapsed_ms = result.elapsed.as_millis() as u64, "cluster healthy");
    Ok(result)
}
