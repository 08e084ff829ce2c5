use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::key::ResourceKey;
use crate::object::Object;

/// Read-only view of the objects an informer has observed.
///
/// Objects are handed out as `Arc<K>`; clone the inner value before
/// modifying it.
#[derive(Clone)]
pub struct Store<K: Object>(Arc<RwLock<HashMap<ResourceKey, Arc<K>>>>);

impl<K: Object> Default for Store<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Object> Store<K> {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn get(&self, key: &ResourceKey) -> Option<Arc<K>> {
        self.0.read().await.get(key).cloned()
    }

    pub async fn get_namespaced(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<Arc<K>> {
        self.get(&ResourceKey::new(namespace, name)).await
    }

    pub async fn list(&self) -> Vec<Arc<K>> {
        self.0.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.0.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.0.read().await.is_empty()
    }

    pub(crate) async fn upsert(
        &self,
        key: ResourceKey,
        obj: Arc<K>,
    ) -> Option<Arc<K>> {
        self.0.write().await.insert(key, obj)
    }

    pub(crate) async fn remove(&self, key: &ResourceKey) -> Option<Arc<K>> {
        self.0.write().await.remove(key)
    }

    /// Swap in a full listing; returns the previous contents.
    pub(crate) async fn replace(
        &self,
        objects: HashMap<ResourceKey, Arc<K>>,
    ) -> HashMap<ResourceKey, Arc<K>> {
        std::mem::replace(&mut *self.0.write().await, objects)
    }
}
