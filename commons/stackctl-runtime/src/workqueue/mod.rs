//! Deduplicating, rate-limited work queue.
//!
//! Producers `add` item keys; consumers `get` one, process it, and call
//! `done`. While an item is being processed it is never handed out
//! again, but an `add` that arrives meanwhile is remembered and the
//! item is redelivered right after `done`. Failed items go back
//! through `add_rate_limited`, which waits for the delay computed by a
//! [`RateLimiter`]; `forget` resets that history.

mod queue;
mod rate_limiter;
mod rate_limiting;

use std::fmt::Debug;
use std::hash::Hash;

pub use queue::WorkQueue;
pub use rate_limiter::{
    BucketRateLimiter, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX,
    DEFAULT_BUCKET_BURST, DEFAULT_BUCKET_QPS,
    ItemExponentialFailureRateLimiter, MAX_DELAY, MaxOfRateLimiter, RateLimiter,
    default_controller_rate_limiter, max_of_exponential_and_bucket,
};
pub use rate_limiting::RateLimitingQueue;

/// Anything usable as a queue item.
pub trait Item: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + Debug + Send + Sync + 'static> Item for T {}
