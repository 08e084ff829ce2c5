use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use stackctl_runtime::RateLimitingQueue;
use tracing::{debug, error};

use super::{ControllerContext, Outcome, ReconcileErr, reconcile};

/// Calls `done` for the key however processing ends.
struct DoneGuard<'a> {
    queue: &'a RateLimitingQueue<String>,
    key: String,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

pub async fn run_worker(
    id: usize,
    ctx: Arc<ControllerContext>,
    queue: RateLimitingQueue<String>,
) {
    debug!(worker = id, "worker: started");
    while process_next_item(&ctx, &queue).await {}
    debug!(worker = id, "worker: queue shut down; exiting");
}

/// Take one key off the queue and reconcile it. False once the queue
/// has shut down and drained.
pub async fn process_next_item(
    ctx: &ControllerContext,
    queue: &RateLimitingQueue<String>,
) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };
    let _done = DoneGuard {
        queue,
        key: key.clone(),
    };
    let result = AssertUnwindSafe(reconcile(ctx, &key))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(ReconcileErr::Panicked(panic_message(panic.as_ref())))
        });
    handle_result(queue, &key, result);
    true
}

fn handle_result(
    queue: &RateLimitingQueue<String>,
    key: &String,
    result: Result<Outcome, ReconcileErr>,
) {
    match result {
        Ok(outcome) => {
            queue.forget(key);
            debug!(%key, ?outcome, "worker: reconciled");
        }
        Err(e) if !e.is_retryable() => {
            queue.forget(key);
            error!(%key, error = %e, "worker: dropping item");
        }
        Err(e) => {
            queue.add_rate_limited(key.clone());
            error!(
                %key,
                error = %e,
                requeues = queue.num_requeues(key),
                "worker: reconcile failed; requeued"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
