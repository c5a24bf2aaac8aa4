//! Float-address failover check.
//!
//! One node is disrupted (rebooted) in a background task while the caller
//! scans the remaining nodes for the float address. The first node seen
//! holding it is the survivor.

use crate::context::RunContext;
use crate::error::{PilotError, RemoteError, RemoteErrorKind, Result};
use crate::poll::ConvergencePoller;
use crate::share::ClientRef;
use crate::task::spawn_named;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long a survivor gets to pick up the float address.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[async_trait]
pub trait FailoverOps: Send + Sync {
    /// Takes `node` down. Returns once the node is back or the disruption failed.
    async fn disrupt(&self, node: &ClientRef) -> std::result::Result<(), RemoteError>;

    /// Addresses currently bound to any interface of `node`, without prefix length.
    async fn bound_addresses(&self, node: &ClientRef)
        -> std::result::Result<Vec<String>, RemoteError>;
}

/// Outcome of one failover check.
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverRecord {
    pub failed_node: ClientRef,
    pub float_address: String,
    pub survivor: Option<ClientRef>,
    pub elapsed: Duration,
}

pub struct FailoverWatcher<O> {
    ctx: Arc<RunContext>,
    ops: Arc<O>,
    interval: Duration,
}

impl<O> FailoverWatcher<O>
where
    O: FailoverOps + 'static,
{
    pub fn new(ctx: Arc<RunContext>, ops: Arc<O>) -> Self {
        Self {
            ctx,
            ops,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Disrupts `failed` and waits up to `timeout` for another node in
    /// `nodes` to hold `float_address`. Once the poll settles, a disruption
    /// still in flight is aborted and joined before this returns.
    pub async fn trigger_and_wait(
        &self,
        nodes: &[ClientRef],
        failed: &ClientRef,
        float_address: &str,
        timeout: Duration,
    ) -> Result<FailoverRecord> {
        if !nodes.contains(failed) {
            return Err(PilotError::invalid(format!(
                "failover node {} is not one of the NFS nodes",
                failed
            )));
        }
        let address = strip_prefix_len(float_address);
        if address.is_empty() {
            return Err(PilotError::invalid("float address must not be empty"));
        }
        let candidates: Vec<ClientRef> = nodes.iter().filter(|n| *n != failed).cloned().collect();

        info!(
            cluster = %self.ctx.cluster(),
            node = %failed,
            address,
            timeout_secs = timeout.as_secs(),
            "triggering failover"
        );

        let start = Instant::now();
        let ops = Arc::clone(&self.ops);
        let target = failed.clone();
        let mut disruption = spawn_named(&format!("disrupt-{}", failed), async move {
            ops.disrupt(&target).await
        });

        let survivor: Mutex<Option<ClientRef>> = Mutex::new(None);
        let poller = ConvergencePoller::new(timeout, self.interval);
        let poll = poller.await_condition(|| self.scan(&candidates, address, &survivor));
        tokio::pin!(poll);

        let mut disruption_done = false;
        let polled = tokio::select! {
            result = &mut poll => result,
            joined = &mut disruption => {
                disruption_done = true;
                match joined {
                    Ok(Ok(())) => {
                        info!(node = %failed, "disruption finished, still waiting for the address");
                        poll.await
                    }
                    Ok(Err(e)) => {
                        warn!(node = %failed, error = %e, "disruption failed");
                        return Err(e.into());
                    }
                    Err(e) => {
                        return Err(RemoteError::new(
                            &failed.hostname,
                            "disrupt",
                            RemoteErrorKind::Spawn,
                            e.to_string(),
                        )
                        .into());
                    }
                }
            }
        };

        let survivor = survivor.lock().await.clone();
        let record = FailoverRecord {
            failed_node: failed.clone(),
            float_address: address.to_string(),
            survivor: survivor.clone(),
            elapsed: start.elapsed(),
        };

        if !disruption_done {
            disruption.abort();
            match disruption.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if survivor.is_some() => {
                    warn!(node = %failed, error = %e, "disruption reported an error after the address moved");
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(e) if e.is_cancelled() => {
                    debug!(node = %failed, "disruption still running, cancelled");
                }
                Err(e) => warn!(node = %failed, error = %e, "disruption task did not finish cleanly"),
            }
        }

        match survivor {
            Some(node) => {
                info!(
                    survivor = %node,
                    address,
                    elapsed_ms = record.elapsed.as_millis() as u64,
                    "float address moved"
                );
                Ok(record)
            }
            None => Err(PilotError::FailoverTimeout {
                record: Box::new(record),
                attempts: polled.attempts,
                last_error: polled.last_error.map(|e| e.to_string()),
            }),
        }
    }

    /// One pass over the candidates, in order. Stops at the first node that
    /// holds the address. Per-node errors are skipped.
    async fn scan(
        &self,
        candidates: &[ClientRef],
        address: &str,
        survivor: &Mutex<Option<ClientRef>>,
    ) -> std::result::Result<bool, RemoteError> {
        let mut last_error = None;
        for node in candidates {
            match self.ops.bound_addresses(node).await {
                Ok(addresses) if addresses.iter().any(|a| a == address) => {
                    *survivor.lock().await = Some(node.clone());
                    return Ok(true);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(node = %node, error = %e, "could not read addresses");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }
}

/// `10.8.128.100/21` -> `10.8.128.100`
fn strip_prefix_len(address: &str) -> &str {
    address.split('/').next().unwrap_or(address).trim()
}
