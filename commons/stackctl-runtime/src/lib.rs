//! Building blocks for level-triggered controllers: watched caches,
//! a deduplicating rate-limited work queue, an object client
//! abstraction and an in-process backing store.

pub mod client;
pub mod events;
pub mod informer;
pub mod key;
pub mod memory;
pub mod object;
pub mod store;
pub mod watcher;
pub mod workqueue;

pub use client::{ClientError, ObjectClient};
pub use events::{LogRecorder, MemoryRecorder, Recorded, Recorder};
pub use informer::{HasSynced, Informer, wait_for_cache_sync};
pub use key::{KeyError, ResourceKey};
pub use memory::{CallStats, MemoryStore, Operation};
pub use object::{Object, ObjectExt};
pub use store::Store;
pub use watcher::{ListWatch, ResourceEvent, Tombstone, WatchEvent, WatchSource};
pub use workqueue::RateLimitingQueue;
