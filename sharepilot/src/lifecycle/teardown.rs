//! Unwinds what provisioning created, innermost first.
//!
//! Per pair: clear the mount, unmount, remove the mount directory, delete the
//! export. Steps for stages a pair never reached are skipped. Pairs are torn
//! down concurrently; the cluster is deleted only after every pair task has
//! been joined. Nothing is rolled back: each failed step is recorded and the
//! run carries on with the next pair.

use super::machine::{ResourceStateMachine, ShareOps};
use super::state::ResourceState;
use crate::context::RunContext;
use crate::error::{RemoteError, TeardownFailedError, TeardownFailure, TeardownStage};
use crate::poll::ConvergencePoller;
use crate::retry::{run_with_retries, RetryPolicy};
use crate::share::{Assignment, ClientRef, ShareSpec};
use crate::task::spawn_named_in;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Undoes what [`ShareOps`] set up. The mount-table query comes from there.
#[async_trait]
pub trait TeardownOps: ShareOps {
    /// Removes everything below the mount path. Fails transiently with
    /// "directory not empty" while the client still has writes in flight.
    async fn clear_mount(&self, client: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError>;

    async fn unmount(
        &self,
        client: &ClientRef,
        share: &ShareSpec,
        lazy: bool,
    ) -> Result<(), RemoteError>;

    async fn remove_mount_dir(&self, client: &ClientRef, share: &ShareSpec)
        -> Result<(), RemoteError>;

    /// Must succeed if the export is already gone.
    async fn delete_export(&self, cluster: &str, share: &ShareSpec) -> Result<(), RemoteError>;

    async fn delete_cluster(&self, cluster: &str) -> Result<(), RemoteError>;

    /// Service names known to the orchestrator.
    async fn list_services(&self) -> Result<Vec<String>, RemoteError>;

    /// Name the orchestrator lists `cluster` under.
    fn service_name(&self, cluster: &str) -> String {
        cluster.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeardownPolicy {
    pub clear: RetryPolicy,
    pub service_removal: ConvergencePoller,
    /// Delete the cluster once every pair is done.
    pub delete_cluster: bool,
}

impl TeardownPolicy {
    pub const DEFAULT_CLEAR_ATTEMPTS: u32 = 60;
    pub const DEFAULT_CLEAR_DELAY: Duration = Duration::from_secs(10);
    pub const DEFAULT_REMOVAL_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_REMOVAL_INTERVAL: Duration = Duration::from_secs(10);
}

impl Default for TeardownPolicy {
    fn default() -> Self {
        Self {
            clear: RetryPolicy::fixed(Self::DEFAULT_CLEAR_ATTEMPTS, Self::DEFAULT_CLEAR_DELAY),
            service_removal: ConvergencePoller::new(
                Self::DEFAULT_REMOVAL_TIMEOUT,
                Self::DEFAULT_REMOVAL_INTERVAL,
            ),
            delete_cluster: true,
        }
    }
}

/// What teardown did to each pair, plus every step that failed.
#[derive(Debug, Clone)]
pub struct TeardownReport {
    pub pairs: Vec<ResourceStateMachine>,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<ResourceStateMachine>, TeardownFailedError> {
        if self.failures.is_empty() {
            Ok(self.pairs)
        } else {
            Err(TeardownFailedError {
                failures: self.failures,
            })
        }
    }
}

pub struct TeardownCoordinator<O> {
    ctx: Arc<RunContext>,
    ops: Arc<O>,
    policy: Arc<TeardownPolicy>,
}

impl<O> TeardownCoordinator<O>
where
    O: TeardownOps + 'static,
{
    pub fn new(ctx: Arc<RunContext>, ops: Arc<O>) -> Self {
        Self {
            ctx,
            ops,
            policy: Arc::new(TeardownPolicy::default()),
        }
    }

    pub fn with_policy(mut self, policy: TeardownPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Tears down an assignment provisioned by an earlier process. Every pair
    /// is assumed fully set up.
    pub async fn teardown(&self, assignment: &Assignment) -> Result<(), TeardownFailedError> {
        let pairs = assignment
            .pairs()
            .map(|(client, share)| {
                ResourceStateMachine::starting_at(
                    client.clone(),
                    share.clone(),
                    ResourceState::Verified,
                )
            })
            .collect();
        self.teardown_pairs(pairs).await.into_result().map(|_| ())
    }

    pub async fn teardown_pairs(&self, pairs: Vec<ResourceStateMachine>) -> TeardownReport {
        info!(
            cluster = %self.ctx.cluster(),
            run_id = %self.ctx.run_id(),
            pairs = pairs.len(),
            "tearing down"
        );

        let total = pairs.len();
        let fallbacks = pairs.clone();
        let mut slots: Vec<Option<(ResourceStateMachine, Vec<TeardownFailure>)>> =
            vec![None; total];
        let mut tasks = JoinSet::new();

        for (index, machine) in pairs.into_iter().enumerate() {
            let ops = Arc::clone(&self.ops);
            let ctx = Arc::clone(&self.ctx);
            let policy = Arc::clone(&self.policy);
            let name = format!("teardown-{}-{}", machine.client(), machine.share().name);
            spawn_named_in(&mut tasks, &name, async move {
                let outcome = teardown_pair(machine, ops.as_ref(), ctx.cluster(), &policy).await;
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!(error = %e, "teardown worker did not finish"),
            }
        }

        let mut machines = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (slot, fallback) in slots.into_iter().zip(fallbacks) {
            match slot {
                Some((machine, pair_failures)) => {
                    failures.extend(pair_failures);
                    machines.push(machine);
                }
                None => {
                    failures.push(pair_failure(
                        &fallback,
                        TeardownStage::Worker,
                        0,
                        "teardown worker panicked",
                    ));
                    machines.push(fallback);
                }
            }
        }

        if self.policy.delete_cluster {
            failures.extend(self.remove_cluster().await);
        }

        if failures.is_empty() {
            info!(cluster = %self.ctx.cluster(), "teardown complete");
        } else {
            warn!(
                cluster = %self.ctx.cluster(),
                failures = failures.len(),
                "teardown finished with failures"
            );
        }

        TeardownReport {
            pairs: machines,
            failures,
        }
    }

    async fn remove_cluster(&self) -> Vec<TeardownFailure> {
        let cluster = self.ctx.cluster();
        if let Err(e) = self.ops.delete_cluster(cluster).await {
            return vec![cluster_failure(TeardownStage::DeleteCluster, 1, e.to_string())];
        }
        info!(cluster, "cluster deleted, waiting for the service to go away");

        let service = self.ops.service_name(cluster);
        let ops = self.ops.as_ref();
        let result = self
            .policy
            .service_removal
            .await_condition_with(
                || {
                    let service = service.as_str();
                    async move {
                        let services = ops.list_services().await?;
                        Ok::<_, RemoteError>(!services.iter().any(|s| s == service))
                    }
                },
                RemoteError::is_fatal,
            )
            .await;
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                return vec![cluster_failure(
                    TeardownStage::AwaitServiceRemoval,
                    1,
                    e.to_string(),
                )];
            }
        };

        match result.ok_or_timeout(format!("removal of service {}", service)) {
            Ok(_) => Vec::new(),
            Err(e) => {
                let attempts = match &e {
                    crate::error::PilotError::ConvergenceTimeout { attempts, .. } => *attempts,
                    _ => 1,
                };
                vec![cluster_failure(
                    TeardownStage::AwaitServiceRemoval,
                    attempts,
                    e.to_string(),
                )]
            }
        }
    }
}

async fn teardown_pair<O: TeardownOps + ?Sized>(
    mut machine: ResourceStateMachine,
    ops: &O,
    cluster: &str,
    policy: &TeardownPolicy,
) -> (ResourceStateMachine, Vec<TeardownFailure>) {
    let mut failures = Vec::new();
    let client = machine.client().clone();
    let share = machine.share().clone();

    if machine.is_mounted() {
        let cleared = run_with_retries(&policy.clear, "clear mount", || {
            ops.clear_mount(&client, &share)
        })
        .await;
        if let Err(e) = cleared.result {
            failures.push(pair_failure(
                &machine,
                TeardownStage::ClearMount,
                cleared.attempts,
                e.to_string(),
            ));
            return (machine, failures);
        }

        if let Err(e) = unmount_with_fallback(ops, &client, &share).await {
            failures.push(pair_failure(&machine, TeardownStage::Unmount, 2, e.to_string()));
            return (machine, failures);
        }

        if let Err(e) = ops.remove_mount_dir(&client, &share).await {
            warn!(client = %client, share = %share.name, error = %e, "mount dir left behind");
            failures.push(pair_failure(
                &machine,
                TeardownStage::RemoveMountDir,
                1,
                e.to_string(),
            ));
        }
    }

    if machine.export_exists() {
        if let Err(e) = ops.delete_export(cluster, &share).await {
            failures.push(pair_failure(
                &machine,
                TeardownStage::DeleteExport,
                1,
                e.to_string(),
            ));
        }
    }

    if failures.is_empty() {
        machine.mark_torn_down();
        info!(client = %client, share = %share.name, "pair torn down");
    }
    (machine, failures)
}

/// Plain unmount first; a busy mount gets a lazy unmount. A path that is
/// not mounted (an earlier teardown got this far) counts as unmounted.
async fn unmount_with_fallback<O: TeardownOps + ?Sized>(
    ops: &O,
    client: &ClientRef,
    share: &ShareSpec,
) -> Result<(), RemoteError> {
    match ops.is_mounted(client, share).await {
        Ok(true) => {}
        Ok(false) => {
            info!(client = %client, share = %share.name, "not mounted, skipping unmount");
            return Ok(());
        }
        Err(e) => {
            warn!(client = %client, share = %share.name, error = %e, "mount table unreadable, unmounting anyway");
        }
    }
    match ops.unmount(client, share, false).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(client = %client, share = %share.name, error = %e, "unmount failed, trying lazy unmount");
            ops.unmount(client, share, true).await
        }
    }
}

fn pair_failure(
    machine: &ResourceStateMachine,
    stage: TeardownStage,
    attempts: u32,
    message: impl Into<String>,
) -> TeardownFailure {
    let failure = TeardownFailure {
        client: machine.client().hostname.clone(),
        share: machine.share().name.clone(),
        stage,
        attempts,
        message: message.into(),
    };
    warn!("{}", failure);
    failure
}

fn cluster_failure(stage: TeardownStage, attempts: u32, message: String) -> TeardownFailure {
    let failure = TeardownFailure {
        client: String::new(),
        share: String::new(),
        stage,
        attempts,
        message,
    };
    warn!("{}", failure);
    failure
}
