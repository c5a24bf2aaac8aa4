//! "Retry until a condition holds or a deadline passes."
//!
//! Every wait in the crate goes through [`ConvergencePoller`]: mount table
//! checks, service removal, cluster health, replica counts and float-address
//! relocation. The first check runs immediately; later checks are spaced by
//! `interval`, and the final sleep is clipped so one last check lands exactly
//! on the deadline.

use crate::error::PilotError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of one poll. `last_error` is the most recent predicate error, kept
/// even when a later check succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceResult<E> {
    pub satisfied: bool,
    pub attempts: u32,
    pub elapsed: Duration,
    pub last_error: Option<E>,
}

impl<E: Display> ConvergenceResult<E> {
    /// Turns an unsatisfied result into [`PilotError::ConvergenceTimeout`].
    pub fn ok_or_timeout(self, what: impl Into<String>) -> Result<Self, PilotError> {
        if self.satisfied {
            return Ok(self);
        }
        Err(PilotError::ConvergenceTimeout {
            what: what.into(),
            attempts: self.attempts,
            elapsed: self.elapsed,
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePoller {
    timeout: Duration,
    interval: Duration,
}

impl ConvergencePoller {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls `predicate` until it returns `Ok(true)` or the timeout passes.
    /// Predicate errors count as "not yet".
    pub async fn await_condition<F, Fut, E>(&self, predicate: F) -> ConvergenceResult<E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: Display,
    {
        match self.await_condition_with(predicate, |_: &E| false).await {
            Ok(result) => result,
            Err(_) => unreachable!("no error is classified as fatal"),
        }
    }

    /// Like [`await_condition`](Self::await_condition), but errors for which
    /// `is_fatal` returns true abort the poll and are returned as `Err`.
    pub async fn await_condition_with<F, Fut, E, C>(
        &self,
        mut predicate: F,
        is_fatal: C,
    ) -> Result<ConvergenceResult<E>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: Display,
        C: Fn(&E) -> bool,
    {
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            attempts += 1;
            match predicate().await {
                Ok(true) => {
                    return Ok(ConvergenceResult {
                        satisfied: true,
                        attempts,
                        elapsed: start.elapsed(),
                        last_error,
                    });
                }
                Ok(false) => {
                    debug!(attempts, "condition not yet satisfied");
                }
                Err(e) if is_fatal(&e) => {
                    warn!(attempts, error = %e, "fatal error while polling, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempts, error = %e, "condition check failed, will retry");
                    last_error = Some(e);
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Ok(ConvergenceResult {
                    satisfied: false,
                    attempts,
                    elapsed,
                    last_error,
                });
            }
            let remaining = self.timeout - elapsed;
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}
