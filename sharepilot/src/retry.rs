//! Bounded retry policies for remote operations.
//!
//! A [`RetryPolicy`] is a value; each retried operation takes its own
//! [`RetryHandle`], which counts attempts and hands out the delay before the
//! next one. `max_attempts` counts every call of the operation, including the
//! first, so a policy of 4 attempts performs at most 3 sleeps.

use crate::error::RemoteError;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// Same delay before every retry.
    Fixed,
    /// `base * multiplier^(n-1)` before the n-th retry.
    Exponential { multiplier: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter_fraction: f64,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(RetryStrategy::Fixed, max_attempts, delay)
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self::new(
            RetryStrategy::Exponential {
                multiplier: multiplier.max(1),
            },
            max_attempts,
            base_delay,
        )
    }

    fn new(strategy: RetryStrategy, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            strategy,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
            jitter_fraction: 0.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = if max_delay.is_zero() {
            None
        } else {
            Some(max_delay)
        };
        self
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn strategy(&self) -> RetryStrategy {
        self.strategy
    }

    pub fn handle(&self) -> RetryHandle {
        RetryHandle {
            policy: self.clone(),
            attempts: 0,
        }
    }

    /// Delay before retry number `retry` (1-based).
    fn delay_for_retry(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let raw = match self.strategy {
            RetryStrategy::Fixed => self.base_delay,
            RetryStrategy::Exponential { multiplier } => {
                let exp = retry.saturating_sub(1).min(31);
                let factor = u128::from(multiplier).saturating_pow(exp);
                let scaled = self.base_delay.as_millis().saturating_mul(factor);
                Duration::from_millis(scaled.min(u128::from(u64::MAX)) as u64)
            }
        };
        let bounded = match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        };
        if bounded.is_zero() || self.jitter_fraction <= 0.0 {
            return bounded;
        }
        let min = 1.0 - self.jitter_fraction;
        let max = 1.0 + self.jitter_fraction;
        let factor = thread_rng().gen_range(min..=max);
        let millis = (bounded.as_millis() as f64 * factor).round().max(0.0);
        Duration::from_millis(millis.min(u64::MAX as f64) as u64)
    }
}

pub struct RetryHandle {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryHandle {
    /// Records a failed attempt. Returns the delay before the next attempt, or
    /// `None` once the policy is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.delay_for_retry(self.attempts))
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Result of [`run_with_retries`]: how many calls were made and how the last one went.
#[derive(Debug)]
pub struct Attempted<T> {
    pub attempts: u32,
    pub result: Result<T, RemoteError>,
}

/// Calls `op` until it succeeds or `policy` is exhausted, sleeping between
/// attempts. Errors the runner flags as fatal stop the loop at once.
pub async fn run_with_retries<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut handle = policy.handle();
    loop {
        match op().await {
            Ok(value) => {
                return Attempted {
                    attempts: handle.attempts() + 1,
                    result: Ok(value),
                };
            }
            Err(e) if e.is_fatal() => {
                return Attempted {
                    attempts: handle.attempts() + 1,
                    result: Err(e),
                };
            }
            Err(e) => match handle.next_delay() {
                Some(delay) => {
                    warn!(
                        what,
                        attempt = handle.attempts(),
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Attempted {
                        attempts: handle.attempts(),
                        result: Err(e),
                    };
                }
            },
        }
    }
}
