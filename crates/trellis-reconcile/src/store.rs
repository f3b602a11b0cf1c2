//! Resource store seam used by the engine
//!
//! The engine only needs two verbs: fetch by key and a conditional merge
//! patch. Listing, watching and deletion belong to the domain reconcilers and
//! the watch glue.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::debug;
use trellis_common::kube_utils::conflict_on_409;
use trellis_common::Error;

pub use crate::diff::{PatchTarget, StatusPatch};
use crate::key::ObjectKey;

/// Fetch and conditionally patch objects of kind `K`
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, Error>;

    /// Send `patch` guarded by `resource_version`.
    ///
    /// Returns [`Error::Conflict`] when the object changed since it was read.
    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &StatusPatch,
        resource_version: Option<&str>,
    ) -> Result<(), Error>;
}

/// [`ObjectStore`] backed by the Kubernetes API server
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    /// Create a store using `client`
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &StatusPatch,
        resource_version: Option<&str>,
    ) -> Result<(), Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        let body = patch.with_resource_version(resource_version);
        let params = PatchParams::default();

        debug!(key = %key, target = ?patch.target, empty = patch.is_empty(), "patching object");
        let result = match patch.target {
            PatchTarget::Status => api.patch_status(&key.name, &params, &Patch::Merge(&body)).await,
            PatchTarget::Object => api.patch(&key.name, &params, &Patch::Merge(&body)).await,
        };
        result
            .map(|_| ())
            .map_err(|e| conflict_on_409(e, &K::kind(&()), &key.to_string()))
    }
}
