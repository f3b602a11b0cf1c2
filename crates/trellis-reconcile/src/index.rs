//! Secondary indexes over a reflector cache
//!
//! An index maps each cached object to zero or more string values; a lookup
//! returns the keys of every object producing the value. Used to find the
//! routes that depend on an app or domain when that object changes.

use std::collections::HashMap;
use std::sync::Arc;

use kube::runtime::reflector::Store;
use kube::Resource;

use crate::key::ObjectKey;

/// Reverse lookups from a referenced value to dependent object keys
pub trait Indexer: Send + Sync {
    /// Keys of objects whose `index` contains `value`
    fn lookup(&self, index: &str, value: &str) -> Vec<ObjectKey>;
}

type IndexFn<K> = Arc<dyn Fn(&K) -> Vec<String> + Send + Sync>;

/// [`Indexer`] evaluating index functions over a reflector [`Store`]
pub struct StoreIndexer<K>
where
    K: Resource<DynamicType = ()> + 'static,
{
    store: Store<K>,
    indexes: HashMap<String, IndexFn<K>>,
}

impl<K> StoreIndexer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    /// Create an indexer with no indexes over `store`
    pub fn new(store: Store<K>) -> Self {
        Self {
            store,
            indexes: HashMap::new(),
        }
    }

    /// Register `name` computed by `index_fn`
    pub fn with_index(
        mut self,
        name: impl Into<String>,
        index_fn: impl Fn(&K) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        self.indexes.insert(name.into(), Arc::new(index_fn));
        self
    }
}

impl<K> Indexer for StoreIndexer<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn lookup(&self, index: &str, value: &str) -> Vec<ObjectKey> {
        let Some(index_fn) = self.indexes.get(index) else {
            tracing::warn!(index, "lookup on unregistered index");
            return Vec::new();
        };
        let mut keys: Vec<ObjectKey> = self
            .store
            .state()
            .iter()
            .map(|obj| obj.as_ref())
            .filter(|obj| index_fn(*obj).iter().any(|v| v == value))
            .filter_map(ObjectKey::from_resource)
            .collect();
        keys.sort();
        keys
    }
}
