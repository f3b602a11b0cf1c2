//! The patching reconciler
//!
//! Wraps a domain [`ObjectReconciler`] with the fetch/patch loop:
//!
//! 1. fetch by key (absent: run the absent hook, done)
//! 2. snapshot the patchable projection
//! 3. run the callback, which mutates the object in place
//! 4. publish the Ready condition and send one conditional merge patch
//! 5. classify the callback result into a [`Requeue`] decision

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument};
use trellis_common::crd::{set_condition, HasConditions};
use trellis_common::Error;

use crate::diff;
use crate::key::ObjectKey;
use crate::ready::ReadyConditionBuilder;
use crate::store::ObjectStore;

/// What to do with a key after an attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /// Done until the next watch event
    Never,
    /// Reconcile again after a fixed delay
    After(Duration),
    /// Reconcile again right away, without touching the backoff counter
    Immediately,
    /// Reconcile again after the key's next exponential backoff delay
    Backoff,
}

/// Objects the engine can reconcile
pub trait Reconcilable:
    Resource<DynamicType = ()>
    + HasConditions
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<T> Reconcilable for T where
    T: Resource<DynamicType = ()>
        + HasConditions
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// Domain logic invoked by the engine
#[async_trait]
pub trait ObjectReconciler<K>: Send + Sync {
    /// Drive the world toward `obj`'s spec, recording results on `obj`.
    ///
    /// Status and metadata changes made here are persisted by the engine even
    /// when an error is returned.
    async fn reconcile_resource(&self, obj: &mut K) -> Result<Requeue, Error>;

    /// Clean up shared state for an object that no longer exists
    async fn reconcile_absent(&self, _key: &ObjectKey) -> Result<(), Error> {
        Ok(())
    }
}

/// Runs one reconcile attempt per call
pub struct PatchingReconciler<K> {
    store: Arc<dyn ObjectStore<K>>,
    reconciler: Arc<dyn ObjectReconciler<K>>,
}

impl<K: Reconcilable> PatchingReconciler<K> {
    /// Create an engine over `store` driving `reconciler`
    pub fn new(store: Arc<dyn ObjectStore<K>>, reconciler: Arc<dyn ObjectReconciler<K>>) -> Self {
        Self { store, reconciler }
    }

    /// Reconcile the object at `key` once
    ///
    /// `Err` is only returned for unexpected failures; the caller logs it and
    /// backs the key off.
    #[instrument(skip(self), fields(kind = %K::kind(&())))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue, Error> {
        let Some(mut obj) = self.store.get(key).await? else {
            debug!("object not found, nothing to reconcile");
            self.reconciler.reconcile_absent(key).await?;
            return Ok(Requeue::Never);
        };

        let resource_version = obj.meta().resource_version.clone();
        let baseline = diff::project(&obj)?;

        let result = self.reconciler.reconcile_resource(&mut obj).await;

        let mut ready = ReadyConditionBuilder::new(&obj);
        match &result {
            Ok(_) => ready = ready.ready(),
            Err(e) => {
                if let Some(reason) = not_ready_reason(e) {
                    ready = ready.with_reason(reason);
                }
                ready = ready.with_error(Some(e));
            }
        }
        set_condition(obj.conditions_mut(), ready.build());

        let patch = diff::compute_patch(&baseline, &diff::project(&obj)?);
        match self
            .store
            .patch(key, &patch, resource_version.as_deref())
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!("object changed since it was read, retrying");
                return Ok(Requeue::Immediately);
            }
            Err(e) if e.is_not_found() => {
                debug!("object deleted before its status could be written");
                return Ok(Requeue::Never);
            }
            Err(e) => return Err(e),
        }

        let decision = classify(result)?;
        if patch.deferred_status && matches!(decision, Requeue::Never | Requeue::After(_)) {
            return Ok(Requeue::Immediately);
        }
        Ok(decision)
    }
}

fn not_ready_reason(err: &Error) -> Option<&str> {
    match err {
        Error::NotReady(nr) => nr.reason(),
        _ => None,
    }
}

/// Map a callback result to a requeue decision; unexpected errors pass through
fn classify(result: Result<Requeue, Error>) -> Result<Requeue, Error> {
    match result {
        Ok(hint) => Ok(hint),
        Err(e) if e.is_conflict() => {
            debug!(error = %e, "conflict during reconcile, retrying");
            Ok(Requeue::Immediately)
        }
        Err(Error::NotReady(nr)) => {
            info!(
                reason = nr.reason().unwrap_or_default(),
                error = %nr,
                "object not ready"
            );
            if nr.no_requeue() {
                Ok(Requeue::Never)
            } else if let Some(after) = nr.requeue_after() {
                Ok(Requeue::After(after))
            } else {
                Ok(Requeue::Backoff)
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{merge_apply, PatchTarget};
    use crate::store::StatusPatch;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use trellis_common::crd::{ConditionStatus, TrellisRoute, TrellisRouteSpec};
    use trellis_common::NotReadyError;

    // =========================================================================
    // Test doubles
    // =========================================================================

    #[derive(Default)]
    struct FakeStore {
        objects: Mutex<HashMap<ObjectKey, TrellisRoute>>,
        patches: Mutex<Vec<(StatusPatch, Option<String>)>>,
        fail_get: bool,
        conflict_on_patch: bool,
    }

    impl FakeStore {
        fn with(route: TrellisRoute) -> Self {
            let store = Self::default();
            store.objects.lock().insert(key(), route);
            store
        }

        fn patch_count(&self) -> usize {
            self.patches.lock().len()
        }

        fn last_patch(&self) -> StatusPatch {
            self.patches.lock().last().cloned().unwrap().0
        }

        fn stored(&self) -> TrellisRoute {
            self.objects.lock().get(&key()).cloned().unwrap()
        }
    }

    #[async_trait]
    impl ObjectStore<TrellisRoute> for FakeStore {
        async fn get(&self, key: &ObjectKey) -> Result<Option<TrellisRoute>, Error> {
            if self.fail_get {
                return Err(Error::internal("store unavailable"));
            }
            Ok(self.objects.lock().get(key).cloned())
        }

        async fn patch(
            &self,
            key: &ObjectKey,
            patch: &StatusPatch,
            resource_version: Option<&str>,
        ) -> Result<(), Error> {
            self.patches
                .lock()
                .push((patch.clone(), resource_version.map(String::from)));
            if self.conflict_on_patch {
                return Err(Error::conflict("TrellisRoute", key.to_string()));
            }
            let mut objects = self.objects.lock();
            let Some(current) = objects.get(key) else {
                return Ok(());
            };
            // Apply the merge patch to the stored projection
            let mut json = serde_json::to_value(current).unwrap();
            merge_apply(&mut json, &patch.body);
            let updated: TrellisRoute = serde_json::from_value(json).unwrap();
            objects.insert(key.clone(), updated);
            Ok(())
        }
    }

    type Callback = dyn Fn(&mut TrellisRoute) -> Result<Requeue, Error> + Send + Sync;

    struct FnReconciler {
        callback: Box<Callback>,
        calls: Mutex<usize>,
        absent_calls: Mutex<Vec<ObjectKey>>,
    }

    impl FnReconciler {
        fn new(
            f: impl Fn(&mut TrellisRoute) -> Result<Requeue, Error> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                callback: Box::new(f),
                calls: Mutex::new(0),
                absent_calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ObjectReconciler<TrellisRoute> for FnReconciler {
        async fn reconcile_resource(&self, obj: &mut TrellisRoute) -> Result<Requeue, Error> {
            *self.calls.lock() += 1;
            (self.callback)(obj)
        }

        async fn reconcile_absent(&self, key: &ObjectKey) -> Result<(), Error> {
            self.absent_calls.lock().push(key.clone());
            Ok(())
        }
    }

    fn key() -> ObjectKey {
        ObjectKey::new("space-1", "route-1")
    }

    fn route() -> TrellisRoute {
        let mut route = TrellisRoute::new("route-1", TrellisRouteSpec::default());
        route.metadata.namespace = Some("space-1".to_string());
        route.metadata.resource_version = Some("10".to_string());
        route.metadata.generation = Some(2);
        route
    }

    fn engine(
        store: Arc<FakeStore>,
        reconciler: Arc<FnReconciler>,
    ) -> PatchingReconciler<TrellisRoute> {
        PatchingReconciler::new(store, reconciler)
    }

    fn ready_condition(route: &TrellisRoute) -> trellis_common::crd::Condition {
        route
            .conditions()
            .iter()
            .find(|c| c.type_ == "Ready")
            .cloned()
            .unwrap()
    }

    // =========================================================================
    // Story Tests: Fetch
    // =========================================================================

    /// Story: a deleted object is a successful no-op; only the absent hook
    /// runs and nothing is patched
    #[tokio::test]
    async fn story_missing_object_is_success_without_patch() {
        let store = Arc::new(FakeStore::default());
        let reconciler = FnReconciler::new(|_| Ok(Requeue::Never));
        let result = engine(store.clone(), reconciler.clone())
            .reconcile(&key())
            .await;

        assert_eq!(result.unwrap(), Requeue::Never);
        assert_eq!(*reconciler.calls.lock(), 0);
        assert_eq!(*reconciler.absent_calls.lock(), vec![key()]);
        assert_eq!(store.patch_count(), 0);
    }

    #[tokio::test]
    async fn test_get_failure_skips_callback_and_returns_error() {
        let store = Arc::new(FakeStore {
            fail_get: true,
            ..Default::default()
        });
        let reconciler = FnReconciler::new(|_| Ok(Requeue::Never));
        let result = engine(store.clone(), reconciler.clone())
            .reconcile(&key())
            .await;

        assert!(result.is_err());
        assert_eq!(*reconciler.calls.lock(), 0);
        assert_eq!(store.patch_count(), 0);
    }

    // =========================================================================
    // Story Tests: Patch and Ready condition
    // =========================================================================

    /// Story: success publishes Ready=True with the observed generation in one
    /// status patch guarded by the resourceVersion that was read
    #[tokio::test]
    async fn story_success_marks_ready_with_one_conditional_patch() {
        let store = Arc::new(FakeStore::with(route()));
        let reconciler = FnReconciler::new(|r| {
            r.status_mut().fqdn = Some("my-app.example.com".to_string());
            Ok(Requeue::Never)
        });
        let result = engine(store.clone(), reconciler).reconcile(&key()).await;

        assert_eq!(result.unwrap(), Requeue::Never);
        assert_eq!(store.patch_count(), 1);
        let (patch, rv) = store.patches.lock()[0].clone();
        assert_eq!(patch.target, PatchTarget::Status);
        assert_eq!(rv.as_deref(), Some("10"));

        let stored = store.stored();
        let ready = ready_condition(&stored);
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.observed_generation, Some(2));
        assert_eq!(stored.fqdn(), Some("my-app.example.com"));
    }

    /// Story: running the same reconcile twice yields an empty second patch
    #[tokio::test]
    async fn story_second_reconcile_is_an_empty_patch() {
        let store = Arc::new(FakeStore::with(route()));
        let reconciler = FnReconciler::new(|r| {
            r.status_mut().uri = Some("my-app.example.com/".to_string());
            Ok(Requeue::Never)
        });
        let engine = engine(store.clone(), reconciler);

        engine.reconcile(&key()).await.unwrap();
        assert!(!store.last_patch().is_empty());

        engine.reconcile(&key()).await.unwrap();
        assert_eq!(store.patch_count(), 2);
        assert!(store.last_patch().is_empty());
    }

    #[tokio::test]
    async fn test_callback_hint_is_honored() {
        let store = Arc::new(FakeStore::with(route()));
        let reconciler = FnReconciler::new(|_| Ok(Requeue::After(Duration::from_secs(10))));
        let result = engine(store, reconciler).reconcile(&key()).await;
        assert_eq!(result.unwrap(), Requeue::After(Duration::from_secs(10)));
    }

    /// Story: a version conflict on the patch retries immediately without an
    /// error and without backoff
    #[tokio::test]
    async fn story_patch_conflict_retries_immediately() {
        let store = Arc::new(FakeStore {
            conflict_on_patch: true,
            ..FakeStore::with(route())
        });
        let reconciler = FnReconciler::new(|_| Ok(Requeue::Never));
        let result = engine(store.clone(), reconciler).reconcile(&key()).await;
        assert_eq!(result.unwrap(), Requeue::Immediately);
        assert_eq!(store.patch_count(), 1);
    }

    // =========================================================================
    // Story Tests: Error classification
    // =========================================================================

    /// Story: a not-ready error is persisted with its reason even though the
    /// callback failed, and its requeue-after is honored
    #[tokio::test]
    async fn story_not_ready_persists_reason_and_requeue_after() {
        let store = Arc::new(FakeStore::with(route()));
        let reconciler = FnReconciler::new(|r| {
            r.status_mut().observed_generation = Some(2);
            Err(NotReadyError::new()
                .with_reason("InvalidDomainRef")
                .with_message("domain not found")
                .with_requeue_after(Duration::from_secs(5))
                .into())
        });
        let result = engine(store.clone(), reconciler).reconcile(&key()).await;

        assert_eq!(result.unwrap(), Requeue::After(Duration::from_secs(5)));
        let stored = store.stored();
        let ready = ready_condition(&stored);
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "InvalidDomainRef");
        assert_eq!(ready.message, "domain not found");
        assert_eq!(stored.status.unwrap().observed_generation, Some(2));
    }

    #[tokio::test]
    async fn test_not_ready_without_delay_backs_off() {
        let store = Arc::new(FakeStore::with(route()));
        let reconciler = FnReconciler::new(|_| {
            Err(NotReadyError::new()
                .with_reason("CreatePatchServices")
                .with_cause(Error::internal("apply failed"))
                .into())
        });
        let result = engine(store, reconciler).reconcile(&key()).await;
        assert_eq!(result.unwrap(), Requeue::Backoff);
    }

    #[tokio::test]
    async fn test_not_ready_with_no_requeue() {
        let store = Arc::new(FakeStore::with(route()));
        let reconciler =
            FnReconciler::new(|_| Err(NotReadyError::new().with_no_requeue().into()));
        let result = engine(store, reconciler).reconcile(&key()).await;
        assert_eq!(result.unwrap(), Requeue::Never);
    }

    /// Story: a conflict raised by the callback (e.g. writing a shared proxy)
    /// still publishes status, then retries right away
    #[tokio::test]
    async fn story_callback_conflict_retries_immediately() {
        let store = Arc::new(FakeStore::with(route()));
        let reconciler = FnReconciler::new(|_| {
            Err(NotReadyError::new()
                .with_reason("ReconcileFQDNProxy")
                .with_cause(Error::conflict("HTTPProxy", "space-1/my-app.example.com"))
                .into())
        });
        let result = engine(store.clone(), reconciler).reconcile(&key()).await;
        assert_eq!(result.unwrap(), Requeue::Immediately);
        assert_eq!(store.patch_count(), 1);
        assert_eq!(ready_condition(&store.stored()).reason, "ReconcileFQDNProxy");
    }

    /// Story: unexpected errors mark the object UnknownError and surface to
    /// the dispatcher for backoff
    #[tokio::test]
    async fn story_unknown_error_is_reported_and_returned() {
        let store = Arc::new(FakeStore::with(route()));
        let reconciler = FnReconciler::new(|_| Err(Error::internal("boom")));
        let result = engine(store.clone(), reconciler).reconcile(&key()).await;

        assert!(result.is_err());
        let ready = ready_condition(&store.stored());
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "UnknownError");
        assert!(ready.message.contains("boom"));
    }

    /// Story: removing a finalizer goes to the main resource; the status part
    /// is written by an immediate follow-up attempt
    #[tokio::test]
    async fn story_finalizer_removal_patches_metadata_then_requeues() {
        let mut initial = route();
        initial.metadata.finalizers = Some(vec!["route.trellis.dev".to_string()]);
        let store = Arc::new(FakeStore::with(initial));
        let reconciler = FnReconciler::new(|r| {
            trellis_common::kube_utils::remove_finalizer(&mut r.metadata, "route.trellis.dev");
            Ok(Requeue::Never)
        });
        let result = engine(store.clone(), reconciler).reconcile(&key()).await;

        assert_eq!(result.unwrap(), Requeue::Immediately);
        let patch = store.last_patch();
        assert_eq!(patch.target, PatchTarget::Object);
        assert_eq!(
            patch.body,
            serde_json::json!({"metadata": {"finalizers": []}})
        );
    }
}
