//! Generic reconciliation engine for Trellis controllers
//!
//! One reconcile attempt per object key: fetch, snapshot, run the domain
//! callback, publish a Ready condition, send exactly one conditional patch,
//! then turn the outcome into a requeue decision. [`controller`] plugs the
//! engine into kube-runtime's `Controller`, which supplies deduplication and
//! per-key single flight, while [`KeyedBackoff`] tracks per-key failures.

pub mod backoff;
pub mod controller;
pub mod diff;
pub mod engine;
pub mod index;
pub mod key;
pub mod ready;
pub mod store;

pub use backoff::{BackoffPolicy, KeyedBackoff};
pub use controller::{error_policy, handle_result, reconcile, ControllerConfig, ReconcileContext};
pub use engine::{ObjectReconciler, PatchingReconciler, Reconcilable, Requeue};
pub use index::{Indexer, StoreIndexer};
pub use key::ObjectKey;
pub use ready::{ReadyConditionBuilder, UNKNOWN_ERROR_REASON};
pub use store::{KubeStore, ObjectStore, StatusPatch};
