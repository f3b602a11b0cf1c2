//! Common types for Trellis: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::{Error, NotReadyError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply issued by Trellis
pub const FIELD_MANAGER: &str = "trellis-controller";

/// Label carrying the GUID of the app a backend Service selects
pub const APP_GUID_LABEL: &str = "trellis.dev/app-guid";

/// Label carrying the name of the route that owns a Service or proxy
pub const ROUTE_GUID_LABEL: &str = "trellis.dev/route-guid";

/// Label carrying the process type a backend Service selects
pub const PROCESS_TYPE_LABEL: &str = "trellis.dev/process-type";

/// Finalizer left on routes by earlier releases; only ever removed
pub const ROUTE_FINALIZER: &str = "route.trellis.dev";

/// Condition type published on every reconciled object
pub const CONDITION_READY: &str = "Ready";
