//! Bounded retries for API calls made outside a controller's scheduler
//!
//! CRD installation at startup and cleanup for routes that have already left
//! the cache have no requeue to fall back on, so they retry in place. Only
//! errors that [`Error::is_retryable`] accepts are retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::Error;

/// How many times to try a call and how long to wait in between
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Wait after the first failure
    pub first_delay: Duration,
    /// Upper bound for any wait before jitter
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Waiting for the API server to accept CRDs at startup
    pub const STARTUP: Self = Self {
        attempts: 10,
        first_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(30),
    };

    /// Cleanup for an object that is gone from the cache
    pub const CLEANUP: Self = Self {
        attempts: 5,
        first_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
    };

    /// Wait before retrying after the `failures`-th failure (1-based):
    /// doubled each time, capped, then jittered to 50-150%
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let capped = self
            .first_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay));
        capped.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or runs
/// out of attempts; the last error is returned
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut call: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut failures = 0u32;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        failures += 1;
        if !err.is_retryable() || failures >= policy.attempts {
            return Err(err);
        }

        let delay = policy.delay(failures);
        warn!(
            what,
            attempt = failures,
            error = %err,
            delay_ms = delay.as_millis(),
            "call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
