//! In-process backing store.
//!
//! Behaves like a minimal API server for one kind: it owns uids and
//! resource versions, detects stale updates, serves a status endpoint
//! for kinds that have one, and streams watch events. Call counters and
//! one-shot fault injection make it usable as a test double.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use futures_util::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use crate::client::{ClientError, ObjectClient};
use crate::key::ResourceKey;
use crate::object::{Object, ObjectExt};
use crate::watcher::{ListWatch, WatchEvent, WatchSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallStats {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub status_updates: usize,
    pub deletes: usize,
}

impl CallStats {
    /// Calls that could have changed stored state.
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.status_updates + self.deletes
    }
}

pub struct MemoryStore<K: Object> {
    inner: Arc<Inner<K>>,
}

impl<K: Object> Clone for MemoryStore<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<K> {
    data: Mutex<Data<K>>,
    faults: Mutex<HashMap<Operation, VecDeque<ClientError>>>,
    stats: Mutex<CallStats>,
}

struct Data<K> {
    objects: BTreeMap<ResourceKey, K>,
    watchers: Vec<Watcher<K>>,
    next_version: u64,
    next_uid: u64,
}

struct Watcher<K> {
    namespace: Option<String>,
    tx: flume::Sender<WatchEvent<K>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn describe<K: Object>(key: &ResourceKey) -> String {
    format!("{} {}", K::kind(&()), key)
}

impl<K: Object> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Object> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(Data {
                    objects: BTreeMap::new(),
                    watchers: Vec::new(),
                    next_version: 0,
                    next_uid: 0,
                }),
                faults: Mutex::new(HashMap::new()),
                stats: Mutex::new(CallStats::default()),
            }),
        }
    }

    /// Fail the next `op` call with `err`. Faults queue up per operation.
    pub fn inject_fault(&self, op: Operation, err: ClientError) {
        lock(&self.inner.faults)
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn stats(&self) -> CallStats {
        *lock(&self.inner.stats)
    }

    pub fn reset_stats(&self) {
        *lock(&self.inner.stats) = CallStats::default();
    }

    /// Objects currently stored, optionally limited to one namespace.
    pub fn list(&self, namespace: Option<&str>) -> Vec<K> {
        lock(&self.inner.data)
            .objects
            .values()
            .filter(|o| namespace.is_none_or(|ns| o.ns() == ns))
            .cloned()
            .collect()
    }

    /// End every open watch stream; watchers have to list again.
    pub fn close_watches(&self) {
        lock(&self.inner.data).watchers.clear();
    }

    fn record(&self, op: Operation) -> Result<(), ClientError> {
        {
            let mut stats = lock(&self.inner.stats);
            match op {
                Operation::Get => stats.gets += 1,
                Operation::Create => stats.creates += 1,
                Operation::Update => stats.updates += 1,
                Operation::UpdateStatus => stats.status_updates += 1,
                Operation::Delete => stats.deletes += 1,
            }
        }
        match lock(&self.inner.faults).get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn broadcast(data: &mut Data<K>, ev: WatchEvent<K>) {
        let ns = match &ev {
            WatchEvent::Added(o)
            | WatchEvent::Modified(o)
            | WatchEvent::Deleted(o) => o.ns().to_string(),
        };
        data.watchers.retain(|w| {
            if w.namespace.as_deref().is_some_and(|n| n != ns) {
                return !w.tx.is_disconnected();
            }
            w.tx.send(ev.clone()).is_ok()
        });
    }

    fn bump_version(data: &mut Data<K>, obj: &mut K) {
        data.next_version += 1;
        obj.meta_mut().resource_version = Some(data.next_version.to_string());
    }

    fn check_version(current: &K, incoming: &K) -> Result<(), ClientError> {
        match incoming.resource_version() {
            Some(rv) if Some(&rv) != current.resource_version().as_ref() => {
                Err(ClientError::Conflict(describe::<K>(&current.key())))
            }
            _ => Ok(()),
        }
    }

    pub fn get_object(&self, namespace: &str, name: &str) -> Result<K, ClientError> {
        self.record(Operation::Get)?;
        let key = ResourceKey::new(namespace, name);
        lock(&self.inner.data)
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(describe::<K>(&key)))
    }

    pub fn create_object(&self, namespace: &str, obj: &K) -> Result<K, ClientError> {
        self.record(Operation::Create)?;
        let Some(name) = obj.meta().name.as_deref().filter(|n| !n.is_empty()) else {
            return Err(ClientError::Invalid(format!(
                "{}: metadata.name is required",
                K::kind(&())
            )));
        };
        let key = ResourceKey::new(namespace, name);
        let mut data = lock(&self.inner.data);
        if data.objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists(describe::<K>(&key)));
        }
        let mut stored = obj.clone();
        data.next_uid += 1;
        let uid = format!("{}-{:08}", K::kind(&()).to_ascii_lowercase(), data.next_uid);
        {
            let meta = stored.meta_mut();
            meta.namespace = (!namespace.is_empty()).then(|| namespace.to_string());
            meta.uid = Some(uid);
            if meta.creation_timestamp.is_none() {
                meta.creation_timestamp = Some(Time(Utc::now().trunc_subsecs(0)));
            }
        }
        Self::bump_version(&mut data, &mut stored);
        data.objects.insert(key, stored.clone());
        Self::broadcast(&mut data, WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    pub fn update_object(&self, namespace: &str, obj: &K) -> Result<K, ClientError> {
        self.record(Operation::Update)?;
        let key = ResourceKey::new(namespace, &obj.name_any());
        let mut data = lock(&self.inner.data);
        let current = data
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(describe::<K>(&key)))?;
        Self::check_version(&current, obj)?;
        let mut stored = obj.clone();
        {
            let meta = stored.meta_mut();
            meta.namespace = current.meta().namespace.clone();
            meta.uid = current.meta().uid.clone();
            meta.creation_timestamp = current.meta().creation_timestamp.clone();
        }
        if K::has_status_subresource() {
            stored.copy_status_from(&current);
        }
        Self::bump_version(&mut data, &mut stored);
        data.objects.insert(key, stored.clone());
        Self::broadcast(&mut data, WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    pub fn update_object_status(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ClientError> {
        self.record(Operation::UpdateStatus)?;
        if !K::has_status_subresource() {
            return Err(ClientError::Unsupported("update_status"));
        }
        let key = ResourceKey::new(namespace, &obj.name_any());
        let mut data = lock(&self.inner.data);
        let mut stored = data
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(describe::<K>(&key)))?;
        Self::check_version(&stored, obj)?;
        stored.copy_status_from(obj);
        Self::bump_version(&mut data, &mut stored);
        data.objects.insert(key, stored.clone());
        Self::broadcast(&mut data, WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    pub fn delete(&self, namespace: &str, name: &str) -> Result<K, ClientError> {
        self.record(Operation::Delete)?;
        let key = ResourceKey::new(namespace, name);
        let mut data = lock(&self.inner.data);
        let removed = data
            .objects
            .remove(&key)
            .ok_or_else(|| ClientError::NotFound(describe::<K>(&key)))?;
        Self::broadcast(&mut data, WatchEvent::Deleted(removed.clone()));
        Ok(removed)
    }
}

#[async_trait]
impl<K: Object> ObjectClient<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K, ClientError> {
        self.get_object(namespace, name)
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, ClientError> {
        self.create_object(namespace, obj)
    }

    async fn update(&self, namespace: &str, obj: &K) -> Result<K, ClientError> {
        self.update_object(namespace, obj)
    }

    async fn update_status(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ClientError> {
        self.update_object_status(namespace, obj)
    }
}

#[async_trait]
impl<K: Object> WatchSource<K> for MemoryStore<K> {
    async fn list_watch(
        &self,
        namespace: Option<&str>,
    ) -> Result<ListWatch<K>, ClientError> {
        let (tx, rx) = flume::unbounded();
        let mut data = lock(&self.inner.data);
        let items = data
            .objects
            .values()
            .filter(|o| namespace.is_none_or(|ns| o.ns() == ns))
            .cloned()
            .collect();
        data.watchers.push(Watcher {
            namespace: namespace.map(str::to_string),
            tx,
        });
        Ok(ListWatch {
            items,
            events: rx.into_stream().boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};

    use super::*;
    use crate::object::tests::deployment;

    fn replicas(d: &Deployment) -> Option<i32> {
        d.spec.as_ref().and_then(|s| s.replicas)
    }

    fn available(d: &Deployment) -> Option<i32> {
        d.status.as_ref().and_then(|s| s.available_replicas)
    }

    fn set_replicas(d: &mut Deployment, n: i32) {
        d.spec.get_or_insert_with(DeploymentSpec::default).replicas = Some(n);
    }

    fn set_available(d: &mut Deployment, n: i32) {
        d.status.get_or_insert_with(DeploymentStatus::default).available_replicas = Some(n);
    }

    #[test]
    fn create_assigns_identity_and_rejects_duplicates() {
        let store = MemoryStore::<Deployment>::new();
        let created = store.create_object("ns", &deployment("", "a")).unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("ns"));
        assert_eq!(created.metadata.uid.as_deref(), Some("deployment-00000001"));
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.creation_timestamp.is_some());

        let err = store.create_object("ns", &deployment("", "a")).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.stats().creates, 2);

        let nameless = Deployment::default();
        assert!(matches!(
            store.create_object("ns", &nameless),
            Err(ClientError::Invalid(_))
        ));
    }

    #[test]
    fn stale_update_is_a_conflict() {
        let store = MemoryStore::<Deployment>::new();
        let v1 = store.create_object("ns", &deployment("ns", "a")).unwrap();
        let mut edit = v1.clone();
        set_replicas(&mut edit, 1);
        let v2 = store.update_object("ns", &edit).unwrap();
        assert_ne!(v1.metadata.resource_version, v2.metadata.resource_version);

        let mut stale = v1.clone();
        set_replicas(&mut stale, 2);
        assert!(store.update_object("ns", &stale).unwrap_err().is_conflict());
        assert_eq!(replicas(&store.get_object("ns", "a").unwrap()), Some(1));
    }

    #[test]
    fn status_is_only_written_through_the_status_endpoint() {
        let store = MemoryStore::<Deployment>::new();
        let created = store.create_object("ns", &deployment("ns", "a")).unwrap();

        let mut edit = created.clone();
        set_available(&mut edit, 9);
        set_replicas(&mut edit, 4);
        let updated = store.update_object("ns", &edit).unwrap();
        assert_eq!(available(&updated), None);
        assert_eq!(replicas(&updated), Some(4));

        let mut status = updated.clone();
        set_available(&mut status, 3);
        set_replicas(&mut status, 100);
        let after = store.update_object_status("ns", &status).unwrap();
        assert_eq!(available(&after), Some(3));
        assert_eq!(replicas(&after), Some(4));
        assert_eq!(after.metadata.uid, created.metadata.uid);
    }

    #[test]
    fn injected_faults_fire_once() {
        let store = MemoryStore::<Deployment>::new();
        store.inject_fault(
            Operation::Create,
            ClientError::Transport("connection reset".into()),
        );
        assert!(matches!(
            store.create_object("ns", &deployment("ns", "a")),
            Err(ClientError::Transport(_))
        ));
        assert!(store.create_object("ns", &deployment("ns", "a")).is_ok());
    }

    #[tokio::test]
    async fn watch_streams_changes_after_listing() {
        let store = MemoryStore::<Deployment>::new();
        store.create_object("ns", &deployment("ns", "before")).unwrap();
        store.create_object("other", &deployment("other", "skip")).unwrap();

        let ListWatch { items, mut events } =
            store.list_watch(Some("ns")).await.unwrap();
        assert_eq!(items.len(), 1);

        store.create_object("other", &deployment("other", "skip-2")).unwrap();
        store.create_object("ns", &deployment("ns", "after")).unwrap();
        store.delete("ns", "before").unwrap();

        match events.next().await {
            Some(WatchEvent::Added(o)) => assert_eq!(o.name_any(), "after"),
            other => panic!("unexpected {other:?}"),
        }
        match events.next().await {
            Some(WatchEvent::Deleted(o)) => assert_eq!(o.name_any(), "before"),
            other => panic!("unexpected {other:?}"),
        }

        store.close_watches();
        assert!(events.next().await.is_none());
    }
}
