use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::trace;

use super::{Item, MAX_DELAY, RateLimiter, WorkQueue, default_controller_rate_limiter};

/// [`WorkQueue`] with delayed and rate-limited re-adds.
///
/// Clones share the same queue. Construction spawns the waiting loop
/// that releases delayed items, so it must happen inside a tokio
/// runtime.
pub struct RateLimitingQueue<T: Item> {
    inner: Arc<Shared<T>>,
}

impl<T: Item> Clone for RateLimitingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Shared<T: Item> {
    queue: Arc<WorkQueue<T>>,
    limiter: Box<dyn RateLimiter<T>>,
    waiting: flume::Sender<(T, Duration)>,
    stop: CancellationToken,
}

impl<T: Item> Drop for Shared<T> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl<T: Item> RateLimitingQueue<T> {
    pub fn new<R: RateLimiter<T> + 'static>(limiter: R) -> Self {
        let queue = Arc::new(WorkQueue::new());
        let (tx, rx) = flume::unbounded();
        let stop = CancellationToken::new();
        tokio::spawn(waiting_loop(queue.clone(), rx, stop.clone()));
        Self {
            inner: Arc::new(Shared {
                queue,
                limiter: Box::new(limiter),
                waiting: tx,
                stop,
            }),
        }
    }

    pub fn with_default_rate_limiter() -> Self {
        Self::new(default_controller_rate_limiter())
    }

    pub fn add(&self, item: T) {
        self.inner.queue.add(item);
    }

    pub async fn get(&self) -> Option<T> {
        self.inner.queue.get().await
    }

    pub fn done(&self, item: &T) {
        self.inner.queue.done(item);
    }

    /// Add `item` once `delay` has elapsed. A pending delayed add of the
    /// same item keeps whichever deadline comes first. Delays are capped
    /// at [`MAX_DELAY`].
    pub fn add_after(&self, item: T, delay: Duration) {
        let delay = delay.min(MAX_DELAY);
        if self.inner.queue.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let _ = self.inner.waiting.send((item, delay));
    }

    pub fn add_rate_limited(&self, item: T) {
        let delay = self.inner.limiter.when(&item);
        trace!(?item, ?delay, "workqueue: rate limited requeue");
        self.add_after(item, delay);
    }

    pub fn forget(&self, item: &T) {
        self.inner.limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner.limiter.num_requeues(item)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    pub fn shut_down(&self) {
        self.inner.queue.shut_down();
        self.inner.stop.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.queue.is_shutting_down()
    }
}

async fn waiting_loop<T: Item>(
    queue: Arc<WorkQueue<T>>,
    rx: flume::Receiver<(T, Duration)>,
    stop: CancellationToken,
) {
    let mut delayed: DelayQueue<T> = DelayQueue::new();
    let mut pending: HashMap<T, (delay_queue::Key, Instant)> = HashMap::new();
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            msg = rx.recv_async() => {
                let Ok((item, delay)) = msg else { break };
                let ready_at = Instant::now() + delay;
                match pending.get_mut(&item) {
                    Some((key, at)) => {
                        if ready_at < *at {
                            delayed.reset(key, delay);
                            *at = ready_at;
                        }
                    }
                    None => {
                        let key = delayed.insert(item.clone(), delay);
                        pending.insert(item, (key, ready_at));
                    }
                }
            }
            Some(expired) = std::future::poll_fn(|cx| delayed.poll_expired(cx)) => {
                let item = expired.into_inner();
                pending.remove(&item);
                queue.add(item);
            }
        }
    }
    trace!("workqueue: waiting loop stopped");
}
