use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use super::Item;

/// Deduplicating FIFO of items awaiting processing.
///
/// An item is in at most one of three places: queued, processing, or
/// absent. `dirty` tracks everything that must be (re)processed, so an
/// `add` during processing is parked until `done` and never handed to
/// a second consumer concurrently.
pub struct WorkQueue<T: Item> {
    state: Mutex<State<T>>,
    notify: Notify,
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

impl<T: Item> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, item: T) {
        let mut st = self.lock();
        if st.shutting_down || st.dirty.contains(&item) {
            return;
        }
        st.dirty.insert(item.clone());
        if st.processing.contains(&item) {
            return;
        }
        st.queue.push_back(item);
        drop(st);
        self.notify.notify_one();
    }

    /// Wait for the next item. `None` once the queue is shut down and
    /// drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let mut st = self.lock();
                if let Some(item) = st.queue.pop_front() {
                    st.dirty.remove(&item);
                    st.processing.insert(item.clone());
                    return Some(item);
                }
                if st.shutting_down {
                    return None;
                }
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Mark `item` as processed; requeues it if it was re-added meanwhile.
    pub fn done(&self, item: &T) {
        let mut st = self.lock();
        st.processing.remove(item);
        if st.dirty.contains(item) {
            st.queue.push_back(item.clone());
            drop(st);
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn processing(&self) -> usize {
        self.lock().processing.len()
    }

    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn repeated_adds_collapse_into_one_entry() {
        let q = WorkQueue::new();
        for _ in 0..5 {
            q.add("ns/a".to_string());
        }
        q.add("ns/b".to_string());
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await.as_deref(), Some("ns/a"));
        assert_eq!(q.get().await.as_deref(), Some("ns/b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn add_while_processing_is_redelivered_once_after_done() {
        let q = WorkQueue::new();
        q.add("k".to_string());
        let item = q.get().await.unwrap();
        for _ in 0..3 {
            q.add("k".to_string());
        }
        // parked until done
        assert_eq!(q.len(), 0);
        let blocked =
            tokio::time::timeout(Duration::from_millis(20), q.get()).await;
        assert!(blocked.is_err());

        q.done(&item);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await.as_deref(), Some("k"));
        q.done(&"k".to_string());
        assert!(q.is_empty());
        assert_eq!(q.processing(), 0);
    }

    #[tokio::test]
    async fn shutdown_drains_then_releases_waiters() {
        let q = Arc::new(WorkQueue::new());
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down();
        assert_eq!(waiter.await.unwrap(), None::<String>);

        let q = WorkQueue::new();
        q.add("left".to_string());
        q.shut_down();
        q.add("ignored".to_string());
        assert_eq!(q.get().await.as_deref(), Some("left"));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_each_get_distinct_items() {
        let q = Arc::new(WorkQueue::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = q.get().await {
                    seen.push(item);
                    q.done(&item);
                }
                seen
            }));
        }
        for i in 0..100u32 {
            q.add(i);
        }
        while !q.is_empty() || q.processing() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        q.shut_down();
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
