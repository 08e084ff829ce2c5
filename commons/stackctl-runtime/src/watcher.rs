use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::client::ClientError;
use crate::key::ResourceKey;
use crate::object::Object;

/// Raw change reported by the backing store.
#[derive(Clone, Debug)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

/// A full listing plus every change that happened after it.
pub struct ListWatch<K> {
    pub items: Vec<K>,
    pub events: BoxStream<'static, WatchEvent<K>>,
}

#[async_trait]
pub trait WatchSource<K: Object>: Send + Sync {
    /// List objects in `namespace` (all when `None`) and open a watch
    /// that starts exactly where the listing ends.
    async fn list_watch(
        &self,
        namespace: Option<&str>,
    ) -> Result<ListWatch<K>, ClientError>;
}

/// Object removed while the watch was down; only its key is certain.
#[derive(Clone, Debug)]
pub struct Tombstone<K> {
    pub key: ResourceKey,
    pub last_known: Option<Arc<K>>,
}

/// Change notification delivered to informer handlers.
#[derive(Clone, Debug)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
    Tombstone(Tombstone<K>),
}

impl<K> ResourceEvent<K> {
    /// The newest known state of the object, if any.
    pub fn object(&self) -> Option<&Arc<K>> {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Deleted(obj) => Some(obj),
            ResourceEvent::Updated { new, .. } => Some(new),
            ResourceEvent::Tombstone(t) => t.last_known.as_ref(),
        }
    }
}
