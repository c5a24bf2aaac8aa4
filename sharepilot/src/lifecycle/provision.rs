use super::machine::{LifecyclePolicy, ResourceStateMachine, ShareOps};
use super::state::ResourceState;
use crate::share::Assignment;
use crate::task::spawn_named_in;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs one state machine per pair of an [`Assignment`], in parallel.
pub struct Provisioner<O> {
    ops: Arc<O>,
    policy: Arc<LifecyclePolicy>,
    max_parallel: Option<usize>,
    shutdown: CancellationToken,
}

impl<O> Provisioner<O>
where
    O: ShareOps + 'static,
{
    pub fn new(ops: Arc<O>) -> Self {
        Self {
            ops,
            policy: Arc::new(LifecyclePolicy::default()),
            max_parallel: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// At most `limit` pairs are between Pending and a settled state at once.
    /// `0` means no limit.
    pub fn with_max_parallel(mut self, limit: usize) -> Self {
        self.max_parallel = (limit > 0).then_some(limit);
        self
    }

    /// Cancelling `token` aborts pairs still in flight; they are reported as Failed.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub async fn provision(&self, assignment: &Assignment) -> ProvisionReport {
        let machines: Vec<ResourceStateMachine> = assignment
            .pairs()
            .map(|(client, share)| ResourceStateMachine::new(client.clone(), share.clone()))
            .collect();
        self.provision_pairs(machines).await
    }

    /// Advances each machine from wherever it currently is. The report keeps
    /// the input order.
    pub async fn provision_pairs(&self, machines: Vec<ResourceStateMachine>) -> ProvisionReport {
        let limiter = self.max_parallel.map(|n| Arc::new(Semaphore::new(n)));
        let total = machines.len();
        info!(pairs = total, max_parallel = ?self.max_parallel, "provisioning");

        let mut slots: Vec<Option<ResourceStateMachine>> = vec![None; total];
        let fallbacks = machines.clone();
        let mut tasks = JoinSet::new();

        for (index, mut machine) in machines.into_iter().enumerate() {
            let ops = Arc::clone(&self.ops);
            let policy = Arc::clone(&self.policy);
            let limiter = limiter.clone();
            let name = format!("provision-{}-{}", machine.client(), machine.share().name);
            spawn_named_in(&mut tasks, &name, async move {
                // The semaphore is never closed, so acquire only fails if it is dropped.
                let _permit = match &limiter {
                    Some(sem) => sem.acquire().await.ok(),
                    None => None,
                };
                machine.advance(ops.as_ref(), &policy).await;
                (index, machine)
            });
        }

        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled(), if !cancelled => {
                    warn!("provisioning cancelled, aborting pairs still in flight");
                    cancelled = true;
                    tasks.abort_all();
                }
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok((index, machine))) => slots[index] = Some(machine),
                        Some(Err(e)) if e.is_cancelled() => {}
                        Some(Err(e)) => error!(error = %e, "provisioning worker panicked"),
                        None => break,
                    }
                }
            }
        }

        let pairs = slots
            .into_iter()
            .zip(fallbacks)
            .map(|(slot, mut fallback)| match slot {
                Some(machine) => machine,
                None => {
                    let detail = if cancelled {
                        "provisioning cancelled"
                    } else {
                        "worker panicked"
                    };
                    fallback.mark_aborted(detail);
                    fallback
                }
            })
            .collect();

        let report = ProvisionReport { pairs };
        info!(
            verified = report.verified().count(),
            failed = report.failed().count(),
            "provisioning finished"
        );
        report
    }
}

/// Per-pair outcome of a provisioning run, in assignment order.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pairs: Vec<ResourceStateMachine>,
}

impl ProvisionReport {
    pub fn pairs(&self) -> &[ResourceStateMachine] {
        &self.pairs
    }

    pub fn verified(&self) -> impl Iterator<Item = &ResourceStateMachine> {
        self.pairs
            .iter()
            .filter(|m| m.state() == ResourceState::Verified)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ResourceStateMachine> {
        self.pairs
            .iter()
            .filter(|m| m.state() == ResourceState::Failed)
    }

    /// Every pair reached Verified.
    pub fn is_success(&self) -> bool {
        self.pairs
            .iter()
            .all(|m| m.state() == ResourceState::Verified)
    }

    pub fn into_pairs(self) -> Vec<ResourceStateMachine> {
        self.pairs
    }
}
