//! Ready condition construction
//!
//! The engine runs the builder for every callback outcome, so every object
//! that reached the callback carries a Ready condition describing its latest
//! attempt.

use kube::Resource;
use trellis_common::crd::{Condition, ConditionStatus};
use trellis_common::{Error, CONDITION_READY};

/// Reason used when a failure carries no reason of its own
pub const UNKNOWN_ERROR_REASON: &str = "UnknownError";

/// Reason used for a successful reconcile
pub const READY_REASON: &str = "Ready";

/// Reason used before anything is known
pub const UNKNOWN_REASON: &str = "Unknown";

/// Builds the `Ready` condition for one reconcile attempt
#[derive(Debug, Clone)]
pub struct ReadyConditionBuilder {
    status: ConditionStatus,
    reason: Option<String>,
    message: String,
    observed_generation: Option<i64>,
}

impl ReadyConditionBuilder {
    /// Start an `Unknown` condition for `obj`, recording its generation
    pub fn new<K: Resource>(obj: &K) -> Self {
        Self {
            status: ConditionStatus::Unknown,
            reason: None,
            message: String::new(),
            observed_generation: obj.meta().generation,
        }
    }

    /// Set the reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Record a failure; `None` leaves the builder untouched
    pub fn with_error(mut self, err: Option<&Error>) -> Self {
        if let Some(err) = err {
            self.status = ConditionStatus::False;
            self.message = err.to_string();
            if self.reason.is_none() {
                self.reason = Some(UNKNOWN_ERROR_REASON.to_string());
            }
        }
        self
    }

    /// Mark the object ready
    pub fn ready(mut self) -> Self {
        self.status = ConditionStatus::True;
        self.message.clear();
        self
    }

    /// Produce the condition
    pub fn build(self) -> Condition {
        let reason = self.reason.unwrap_or_else(|| match self.status {
            ConditionStatus::True => READY_REASON.to_string(),
            ConditionStatus::False => UNKNOWN_ERROR_REASON.to_string(),
            ConditionStatus::Unknown => UNKNOWN_REASON.to_string(),
        });
        let mut condition = Condition::new(CONDITION_READY, self.status, reason, self.message);
        condition.observed_generation = self.observed_generation;
        condition
    }
}
