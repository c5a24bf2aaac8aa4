//! Create → Mount → Verify for a single (client, share) pair.

use super::state::{ResourceState, Stage, StageFailure};
use crate::error::RemoteError;
use crate::poll::ConvergencePoller;
use crate::retry::{run_with_retries, RetryPolicy};
use crate::share::{ClientRef, ShareSpec};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Cluster side of setup: the three remote steps a pair goes through.
#[async_trait]
pub trait ShareOps: Send + Sync {
    /// Creates the export backing `share`. Called again on retry, so it must
    /// tolerate a half-finished earlier attempt.
    async fn create_share(&self, client: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError>;

    /// Mounts the export on `client` at `share.mount_path`.
    async fn mount(&self, client: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError>;

    /// Whether `share.mount_path` is in the client's mount table.
    async fn is_mounted(&self, client: &ClientRef, share: &ShareSpec) -> Result<bool, RemoteError>;
}

/// Retry budgets for each setup stage.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecyclePolicy {
    pub create: RetryPolicy,
    pub mount: RetryPolicy,
    pub verify: ConvergencePoller,
}

impl LifecyclePolicy {
    pub const DEFAULT_CREATE_ATTEMPTS: u32 = 3;
    pub const DEFAULT_CREATE_DELAY: Duration = Duration::from_secs(10);
    pub const DEFAULT_MOUNT_ATTEMPTS: u32 = 4;
    pub const DEFAULT_MOUNT_BASE_DELAY: Duration = Duration::from_secs(5);
    pub const DEFAULT_MOUNT_MULTIPLIER: u32 = 2;
    pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DEFAULT_VERIFY_INTERVAL: Duration = Duration::from_secs(5);
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            create: RetryPolicy::fixed(Self::DEFAULT_CREATE_ATTEMPTS, Self::DEFAULT_CREATE_DELAY),
            mount: RetryPolicy::exponential(
                Self::DEFAULT_MOUNT_ATTEMPTS,
                Self::DEFAULT_MOUNT_BASE_DELAY,
                Self::DEFAULT_MOUNT_MULTIPLIER,
            ),
            verify: ConvergencePoller::new(
                Self::DEFAULT_VERIFY_TIMEOUT,
                Self::DEFAULT_VERIFY_INTERVAL,
            ),
        }
    }
}

/// Owns the state of one pair. Nothing else mutates it.
#[derive(Debug, Clone)]
pub struct ResourceStateMachine {
    client: ClientRef,
    share: ShareSpec,
    state: ResourceState,
    history: Vec<ResourceState>,
    failure: Option<StageFailure>,
}

impl ResourceStateMachine {
    pub fn new(client: ClientRef, share: ShareSpec) -> Self {
        Self::starting_at(client, share, ResourceState::Pending)
    }

    /// A pair whose setup happened elsewhere, e.g. a previous process that
    /// mounted everything and now needs cleaning up.
    pub fn starting_at(client: ClientRef, share: ShareSpec, state: ResourceState) -> Self {
        Self {
            client,
            share,
            state,
            history: vec![state],
            failure: None,
        }
    }

    pub fn client(&self) -> &ClientRef {
        &self.client
    }

    pub fn share(&self) -> &ShareSpec {
        &self.share
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Every state the pair has been in, oldest first.
    pub fn history(&self) -> &[ResourceState] {
        &self.history
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    /// Furthest setup state reached before any failure.
    pub fn reached(&self) -> ResourceState {
        self.history
            .iter()
            .rev()
            .copied()
            .find(|s| {
                matches!(
                    s,
                    ResourceState::Pending
                        | ResourceState::Created
                        | ResourceState::Mounted
                        | ResourceState::Verified
                )
            })
            .unwrap_or(ResourceState::Pending)
    }

    pub fn export_exists(&self) -> bool {
        !matches!(self.reached(), ResourceState::Pending)
    }

    pub fn is_mounted(&self) -> bool {
        matches!(
            self.reached(),
            ResourceState::Mounted | ResourceState::Verified
        )
    }

    fn transition(&mut self, next: ResourceState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, failure: StageFailure) {
        warn!(
            client = %self.client,
            share = %self.share.name,
            "{}",
            failure
        );
        self.failure = Some(failure);
        self.transition(ResourceState::Failed);
    }

    pub(crate) fn mark_torn_down(&mut self) {
        if self.state != ResourceState::TornDown {
            self.transition(ResourceState::TornDown);
        }
    }

    pub(crate) fn mark_aborted(&mut self, detail: impl Into<String>) {
        if !self.state.is_settled() {
            self.fail(StageFailure {
                stage: self.next_stage(),
                attempts: 0,
                elapsed: Duration::ZERO,
                last_error: None,
                detail: detail.into(),
            });
        }
    }

    fn next_stage(&self) -> Stage {
        match self.state {
            ResourceState::Pending => Stage::Create,
            ResourceState::Created => Stage::Mount,
            _ => Stage::Verify,
        }
    }

    /// Runs the remaining stages from the current state. Stages already done
    /// are never repeated; a settled pair is returned as is.
    pub async fn advance<O>(&mut self, ops: &O, policy: &LifecyclePolicy) -> ResourceState
    where
        O: ShareOps + ?Sized,
    {
        loop {
            match self.state {
                ResourceState::Pending => self.run_create(ops, &policy.create).await,
                ResourceState::Created => self.run_mount(ops, &policy.mount).await,
                ResourceState::Mounted => self.run_verify(ops, &policy.verify).await,
                ResourceState::Verified | ResourceState::Failed | ResourceState::TornDown => {
                    return self.state;
                }
            }
        }
    }

    async fn run_create<O: ShareOps + ?Sized>(&mut self, ops: &O, policy: &RetryPolicy) {
        let start = Instant::now();
        let (client, share) = (&self.client, &self.share);
        let out = run_with_retries(policy, "create export", || ops.create_share(client, share)).await;
        match out.result {
            Ok(()) => {
                info!(client = %self.client, share = %self.share.name, attempts = out.attempts, "export created");
                self.transition(ResourceState::Created);
            }
            Err(e) => self.fail(StageFailure {
                stage: Stage::Create,
                attempts: out.attempts,
                elapsed: start.elapsed(),
                detail: format!("export {} was not created", self.share.export_path),
                last_error: Some(e),
            }),
        }
    }

    async fn run_mount<O: ShareOps + ?Sized>(&mut self, ops: &O, policy: &RetryPolicy) {
        let start = Instant::now();
        let (client, share) = (&self.client, &self.share);
        let out = run_with_retries(policy, "mount", || ops.mount(client, share)).await;
        match out.result {
            Ok(()) => {
                info!(
                    client = %self.client,
                    share = %self.share.name,
                    mount = %self.share.mount_path,
                    attempts = out.attempts,
                    "export mounted"
                );
                self.transition(ResourceState::Mounted);
            }
            Err(e) => self.fail(StageFailure {
                stage: Stage::Mount,
                attempts: out.attempts,
                elapsed: start.elapsed(),
                detail: format!(
                    "{} could not be mounted at {}",
                    self.share.export_path, self.share.mount_path
                ),
                last_error: Some(e),
            }),
        }
    }

    async fn run_verify<O: ShareOps + ?Sized>(&mut self, ops: &O, poller: &ConvergencePoller) {
        let (client, share) = (&self.client, &self.share);
        let polled = poller
            .await_condition_with(|| ops.is_mounted(client, share), RemoteError::is_fatal)
            .await;
        match polled {
            Ok(result) if result.satisfied => {
                info!(
                    client = %self.client,
                    share = %self.share.name,
                    attempts = result.attempts,
                    "mount verified"
                );
                self.transition(ResourceState::Verified);
            }
            Ok(result) => self.fail(StageFailure {
                stage: Stage::Verify,
                attempts: result.attempts,
                elapsed: result.elapsed,
                detail: format!(
                    "{} never appeared in the mount table",
                    self.share.mount_path
                ),
                last_error: result.last_error,
            }),
            Err(e) => self.fail(StageFailure {
                stage: Stage::Verify,
                attempts: 1,
                elapsed: Duration::ZERO,
                detail: "mount table could not be read".to_string(),
                last_error: Some(e),
            }),
        }
    }
}
