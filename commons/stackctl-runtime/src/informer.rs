use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::{Instant, Interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::object::{Object, ObjectExt};
use crate::store::Store;
use crate::watcher::{ListWatch, ResourceEvent, Tombstone, WatchEvent, WatchSource};

const RELIST_BACKOFF_MIN: Duration = Duration::from_millis(200);
const RELIST_BACKOFF_MAX: Duration = Duration::from_secs(30);
const SYNC_POLL: Duration = Duration::from_millis(100);

pub type EventHandler<K> = Arc<dyn Fn(ResourceEvent<K>) + Send + Sync>;

pub trait HasSynced: Send + Sync {
    fn has_synced(&self) -> bool;
}

/// Keeps a [`Store`] in step with one kind in the backing store and
/// fans every change out to the registered handlers.
pub struct Informer<K: Object> {
    source: Arc<dyn WatchSource<K>>,
    namespace: Option<String>,
    resync: Option<Duration>,
    store: Store<K>,
    handlers: Mutex<Vec<EventHandler<K>>>,
    synced: AtomicBool,
}

impl<K: Object> Informer<K> {
    pub fn new(source: Arc<dyn WatchSource<K>>) -> Self {
        Self {
            source,
            namespace: None,
            resync: None,
            store: Store::new(),
            handlers: Mutex::new(Vec::new()),
            synced: AtomicBool::new(false),
        }
    }

    /// Restrict the informer to a single namespace.
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Re-deliver every cached object as an update at this period.
    pub fn with_resync(mut self, period: Option<Duration>) -> Self {
        self.resync = period.filter(|p| !p.is_zero());
        self
    }

    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Handlers must not block; they run on the informer task.
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ResourceEvent<K>) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut retry = RELIST_BACKOFF_MIN;
        loop {
            let listed = tokio::select! {
                _ = cancel.cancelled() => return,
                res = self.source.list_watch(self.namespace.as_deref()) => res,
            };
            let ListWatch { items, mut events } = match listed {
                Ok(lw) => {
                    retry = RELIST_BACKOFF_MIN;
                    lw
                }
                Err(e) => {
                    warn!(kind = %K::kind(&()), error = %e, ?retry, "informer: list failed; retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = sleep(retry) => {}
                    }
                    retry = (retry * 2).min(RELIST_BACKOFF_MAX);
                    continue;
                }
            };

            let count = items.len();
            self.replace(items).await;
            if !self.synced.swap(true, Ordering::SeqCst) {
                info!(kind = %K::kind(&()), count, "informer: initial sync complete");
            }

            let mut resync = self
                .resync
                .map(|p| tokio::time::interval_at(Instant::now() + p, p));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick(&mut resync) => self.resync_all().await,
                    ev = events.next() => match ev {
                        Some(ev) => self.apply(ev).await,
                        None => {
                            debug!(kind = %K::kind(&()), "informer: watch closed; relisting");
                            break;
                        }
                    },
                }
            }
        }
    }

    async fn apply(&self, ev: WatchEvent<K>) {
        match ev {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let obj = Arc::new(obj);
                match self.store.upsert(obj.key(), obj.clone()).await {
                    Some(old) => {
                        self.dispatch(ResourceEvent::Updated { old, new: obj })
                    }
                    None => self.dispatch(ResourceEvent::Added(obj)),
                }
            }
            WatchEvent::Deleted(obj) => {
                self.store.remove(&obj.key()).await;
                self.dispatch(ResourceEvent::Deleted(Arc::new(obj)));
            }
        }
    }

    async fn replace(&self, items: Vec<K>) {
        let fresh: HashMap<_, _> = items
            .into_iter()
            .map(|obj| (obj.key(), Arc::new(obj)))
            .collect();
        let mut previous = self.store.replace(fresh.clone()).await;
        for (key, obj) in fresh {
            match previous.remove(&key) {
                Some(old) => {
                    self.dispatch(ResourceEvent::Updated { old, new: obj })
                }
                None => self.dispatch(ResourceEvent::Added(obj)),
            }
        }
        // gone while we were not watching
        for (key, old) in previous {
            self.dispatch(ResourceEvent::Tombstone(Tombstone {
                key,
                last_known: Some(old),
            }));
        }
    }

    async fn resync_all(&self) {
        for obj in self.store.list().await {
            self.dispatch(ResourceEvent::Updated {
                old: obj.clone(),
                new: obj,
            });
        }
    }

    fn dispatch(&self, ev: ResourceEvent<K>) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for h in handlers {
            (*h)(ev.clone());
        }
    }
}

impl<K: Object> HasSynced for Informer<K> {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Wait until every informer finished its first listing. False when
/// cancelled or when `timeout` elapses first.
pub async fn wait_for_cache_sync(
    cancel: &CancellationToken,
    timeout: Duration,
    informers: &[&dyn HasSynced],
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if informers.iter().all(|i| i.has_synced()) {
            return true;
        }
        if cancel.is_cancelled() || Instant::now() >= deadline {
            return false;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = sleep(SYNC_POLL) => {}
        }
    }
}
