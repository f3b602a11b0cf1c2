//! Drives the patching engine from kube-runtime's `Controller`
//!
//! kube-runtime owns scheduling: triggers are deduplicated, at most one
//! reconcile runs per object, and requeues are delayed by the returned
//! [`Action`]. This module turns engine [`Requeue`] decisions into actions
//! and keeps the per-key failure counters the error policy backs off with.

use std::future::Ready;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::ResourceExt;
use tracing::{debug, error, warn};
use trellis_common::retry::{retry, RetryPolicy};
use trellis_common::Error;

use crate::backoff::{BackoffPolicy, KeyedBackoff};
use crate::engine::{PatchingReconciler, Reconcilable, Requeue};
use crate::key::ObjectKey;

/// Server-side watch timeout; must stay below the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Watcher configuration shared by every Trellis watch
pub fn watch_config() -> watcher::Config {
    watcher::Config::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Controller tuning
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Reconciles allowed to run at once; distinct keys reconcile in parallel
    pub workers: usize,
    /// Backoff applied to failing keys
    pub backoff: BackoffPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ControllerConfig {
    /// kube-runtime settings for this configuration
    pub fn runtime_config(&self) -> controller::Config {
        let concurrency = u16::try_from(self.workers.max(1)).unwrap_or(u16::MAX);
        controller::Config::default().concurrency(concurrency)
    }
}

/// Shared state handed to every reconcile of one controller
pub struct ReconcileContext<K> {
    name: String,
    engine: PatchingReconciler<K>,
    backoff: KeyedBackoff,
}

impl<K: Reconcilable> ReconcileContext<K> {
    /// Context for the controller `name` driving `engine`
    pub fn new(name: impl Into<String>, engine: PatchingReconciler<K>, config: &ControllerConfig) -> Self {
        Self {
            name: name.into(),
            engine,
            backoff: KeyedBackoff::new(config.backoff),
        }
    }

    /// Failure counters per key
    pub fn backoff(&self) -> &KeyedBackoff {
        &self.backoff
    }

    fn action(&self, key: &ObjectKey, requeue: Requeue) -> Action {
        match requeue {
            Requeue::Never => {
                self.backoff.reset(key);
                Action::await_change()
            }
            Requeue::After(delay) => {
                self.backoff.reset(key);
                Action::requeue(delay)
            }
            Requeue::Immediately => Action::requeue(Duration::ZERO),
            Requeue::Backoff => {
                let delay = self.backoff.next_delay(key);
                debug!(
                    controller = %self.name,
                    key = %key,
                    attempt = self.backoff.failures(key),
                    delay_ms = delay.as_millis(),
                    "backing off"
                );
                Action::requeue(delay)
            }
        }
    }
}

/// Reconcile one object through the engine
pub async fn reconcile<K: Reconcilable>(
    obj: Arc<K>,
    ctx: Arc<ReconcileContext<K>>,
) -> Result<Action, Error> {
    let key = ObjectKey::from_resource(obj.as_ref())
        .ok_or_else(|| Error::validation_for(obj.name_any(), "object must be namespaced"))?;
    let requeue = ctx.engine.reconcile(&key).await?;
    Ok(ctx.action(&key, requeue))
}

/// Requeue a failed object after its next backoff delay
pub fn error_policy<K: Reconcilable>(
    obj: Arc<K>,
    error: &Error,
    ctx: Arc<ReconcileContext<K>>,
) -> Action {
    let Some(key) = ObjectKey::from_resource(obj.as_ref()) else {
        return Action::await_change();
    };
    let delay = ctx.backoff.next_delay(&key);
    error!(
        controller = %ctx.name,
        key = %key,
        attempt = ctx.backoff.failures(&key),
        delay_ms = delay.as_millis(),
        error = %error,
        "reconcile failed"
    );
    Action::requeue(delay)
}

/// Item of the stream returned by `Controller::run`
pub type RunResult<K> = Result<(ObjectRef<K>, Action), controller::Error<Error, watcher::Error>>;

/// Consumer for `Controller::run` results.
///
/// Triggers for objects missing from the cache (deleted routes, stale
/// includes) never reach [`reconcile`]; they are handed to the engine here so
/// its absent hook runs.
pub fn handle_result<K: Reconcilable>(
    ctx: Arc<ReconcileContext<K>>,
) -> impl Fn(RunResult<K>) -> Ready<()> {
    move |result| {
        match result {
            Ok((obj, action)) => {
                debug!(controller = %ctx.name, object = %obj.name, ?action, "reconcile completed");
            }
            Err(controller::Error::ObjectNotFound(obj)) => {
                if let Some(namespace) = obj.namespace {
                    let key = ObjectKey::new(namespace, obj.name);
                    tokio::spawn(reconcile_absent(ctx.clone(), key));
                }
            }
            // already logged by error_policy
            Err(controller::Error::ReconcilerFailed(..)) => {}
            Err(e) => warn!(controller = %ctx.name, error = %e, "controller error"),
        }
        std::future::ready(())
    }
}

async fn reconcile_absent<K: Reconcilable>(ctx: Arc<ReconcileContext<K>>, key: ObjectKey) {
    debug!(controller = %ctx.name, key = %key, "object left the cache");
    let result = retry(&RetryPolicy::CLEANUP, "reconcile absent object", || {
        ctx.engine.reconcile(&key)
    })
    .await;
    if let Err(e) = result {
        error!(controller = %ctx.name, key = %key, error = %e, "cleanup for absent object failed");
    }
}
