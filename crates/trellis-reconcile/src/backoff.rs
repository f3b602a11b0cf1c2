//! Per-key exponential backoff for failing reconciles

use std::time::Duration;

use dashmap::DashMap;

use crate::key::ObjectKey;

/// Exponential backoff bounds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub base: Duration,
    /// Upper bound for any delay
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    /// Delay for the `failures`-th consecutive failure (1-based)
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Consecutive-failure counters keyed by object
#[derive(Debug, Default)]
pub struct KeyedBackoff {
    policy: BackoffPolicy,
    failures: DashMap<ObjectKey, u32>,
}

impl KeyedBackoff {
    /// Create counters using `policy`
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: DashMap::new(),
        }
    }

    /// Record a failure and return the delay before the next attempt
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.entry(key.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        self.policy.delay(*failures)
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).map_or(0, |f| *f)
    }

    /// Forget failures after a success
    pub fn reset(&self, key: &ObjectKey) {
        self.failures.remove(key);
    }
}
