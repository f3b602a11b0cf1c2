//! Error types for Trellis controllers
//!
//! Errors are structured with fields to aid debugging in production. The
//! reconcile engine classifies them into retry decisions:
//!
//! - [`Error::Conflict`] (or a 409 from the API server): retry immediately
//! - [`Error::NotReady`]: the object is not ready yet, report a reason and requeue
//! - anything else: unexpected, reported as `UnknownError` and backed off

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Trellis operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Optimistic concurrency conflict on a write
    #[error("conflict writing {kind} {key}")]
    Conflict {
        /// Kind of the object whose write was rejected
        kind: String,
        /// `namespace/name` of the object
        key: String,
    },

    /// A recoverable "not ready yet" outcome with a machine-readable reason
    #[error(transparent)]
    NotReady(#[from] NotReadyError),

    /// Validation error for a resource spec
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "engine", "dispatcher", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a conflict error for the given kind and object key
    pub fn conflict(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True for optimistic concurrency failures, including a conflict wrapped
    /// as the cause of a [`NotReadyError`]
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            Error::NotReady(nr) => nr.cause().is_some_and(Error::is_conflict),
            _ => false,
        }
    }

    /// True when the API server reported the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(ae)
            } if ae.code == 404
        )
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (require a spec fix).
    /// Kubernetes errors depend on the status code; conflicts always are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
                )
            }
            Error::Conflict { .. } => true,
            Error::NotReady(nr) => !nr.no_requeue(),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

/// A recoverable failure: the object cannot become ready yet.
///
/// Carries the condition reason to publish, an optional cause, and the
/// requeue policy. Built fluently:
///
/// ```ignore
/// NotReadyError::new()
///     .with_cause(err)
///     .with_reason("CreatePatchServices")
///     .with_requeue_after(Duration::from_secs(5))
/// ```
#[derive(Debug, Default)]
pub struct NotReadyError {
    cause: Option<Box<Error>>,
    reason: Option<String>,
    message: Option<String>,
    requeue_after: Option<Duration>,
    no_requeue: bool,
}

impl NotReadyError {
    /// Create an empty not-ready error
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the underlying cause
    pub fn with_cause(mut self, cause: impl Into<Error>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Set the condition reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set a human-readable message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Requeue after a fixed delay instead of backing off
    pub fn with_requeue_after(mut self, after: Duration) -> Self {
        self.requeue_after = Some(after);
        self.no_requeue = false;
        self
    }

    /// Do not requeue; a later watch event will retrigger reconciliation
    pub fn with_no_requeue(mut self) -> Self {
        self.no_requeue = true;
        self.requeue_after = None;
        self
    }

    /// The underlying cause, if any
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// The condition reason, if set
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Fixed requeue delay, if set
    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }

    /// Whether requeueing is suppressed
    pub fn no_requeue(&self) -> bool {
        self.no_requeue
    }
}

impl std::fmt::Display for NotReadyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.message, &self.cause) {
            (Some(message), Some(cause)) => write!(f, "{message}: {cause}"),
            (Some(message), None) => write!(f, "{message}"),
            (None, Some(cause)) => write!(f, "{cause}"),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for NotReadyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
