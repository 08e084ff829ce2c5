use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use super::Item;

/// Decides how long an item has to wait before it is retried.
pub trait RateLimiter<T>: Send + Sync {
    /// Delay for the next retry of `item`; records one more failure.
    fn when(&self, item: &T) -> Duration;
    /// Clear the failure history of `item`.
    fn forget(&self, item: &T);
    fn num_requeues(&self, item: &T) -> u32;
}

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`.
pub struct ItemExponentialFailureRateLimiter<T: Item> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: Item> ItemExponentialFailureRateLimiter<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Item> RateLimiter<T> for ItemExponentialFailureRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        let mut failures =
            self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let exp = failures.entry(item.clone()).or_insert(0);
        let n = *exp;
        *exp = exp.saturating_add(1);
        1u32.checked_shl(n)
            .and_then(|factor| self.base.checked_mul(factor))
            .filter(|d| *d <= self.max)
            .unwrap_or(self.max)
    }

    fn forget(&self, item: &T) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(item)
            .copied()
            .unwrap_or(0)
    }
}

/// Longest delay any limiter hands out, and the cap on `add_after`.
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Token bucket shared by every item; bounds overall retry pressure.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    state: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

impl BucketRateLimiter {
    /// Bucket refilled at `qps` tokens per second, starting full with
    /// `burst` tokens. A `qps` that is not a positive number never
    /// refills: once the burst is spent every reservation waits
    /// [`MAX_DELAY`].
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: if qps.is_finite() && qps > 0.0 { qps } else { 0.0 },
            burst,
            state: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Reserve one token and return how long the caller must wait for it.
    fn reserve(&self) -> Duration {
        let mut b = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(b.last).as_secs_f64();
        if self.qps > 0.0 {
            b.tokens = (b.tokens + elapsed * self.qps).min(self.burst);
        }
        b.last = now;
        b.tokens -= 1.0;
        if b.tokens >= 0.0 {
            Duration::ZERO
        } else if self.qps > 0.0 {
            Duration::try_from_secs_f64(-b.tokens / self.qps)
                .map_or(MAX_DELAY, |d| d.min(MAX_DELAY))
        } else {
            MAX_DELAY
        }
    }
}

impl<T> RateLimiter<T> for BucketRateLimiter {
    fn when(&self, _item: &T) -> Duration {
        self.reserve()
    }

    fn forget(&self, _item: &T) {}

    fn num_requeues(&self, _item: &T) -> u32 {
        0
    }
}

/// Delay is the largest delay of all inner limiters.
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Box<dyn RateLimiter<T>>>,
}

impl<T> MaxOfRateLimiter<T> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

impl<T> RateLimiter<T> for MaxOfRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(item))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, item: &T) {
        for l in &self.limiters {
            l.forget(item);
        }
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(5);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(1000);
pub const DEFAULT_BUCKET_QPS: f64 = 50.0;
pub const DEFAULT_BUCKET_BURST: u32 = 300;

/// Per-item exponential backoff combined with a global token bucket.
pub fn max_of_exponential_and_bucket<T: Item>(
    base: Duration,
    max: Duration,
    qps: f64,
    burst: u32,
) -> MaxOfRateLimiter<T> {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(base, max)),
        Box::new(BucketRateLimiter::new(qps, burst)),
    ])
}

pub fn default_controller_rate_limiter<T: Item>() -> MaxOfRateLimiter<T> {
    max_of_exponential_and_bucket(
        DEFAULT_BACKOFF_BASE,
        DEFAULT_BACKOFF_MAX,
        DEFAULT_BUCKET_QPS,
        DEFAULT_BUCKET_BURST,
    )
}
