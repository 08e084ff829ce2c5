use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType};
use tracing::{info, warn};

/// Sink for user-facing events. Publishing is best effort.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn publish(&self, event: &Event, regarding: &ObjectReference);
}

/// Writes events to the tracing log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogRecorder;

#[async_trait]
impl Recorder for LogRecorder {
    async fn publish(&self, event: &Event, regarding: &ObjectReference) {
        let note = event.note.as_deref().unwrap_or("");
        let kind = regarding.kind.as_deref().unwrap_or("");
        let ns = regarding.namespace.as_deref().unwrap_or("");
        let name = regarding.name.as_deref().unwrap_or("");
        if matches!(event.type_, EventType::Warning) {
            warn!(%kind, %ns, %name, reason = %event.reason, action = %event.action, "event: {note}");
        } else {
            info!(%kind, %ns, %name, reason = %event.reason, action = %event.action, "event: {note}");
        }
    }
}

/// One published event as seen by [`MemoryRecorder`].
#[derive(Clone, Debug, PartialEq)]
pub struct Recorded {
    pub regarding: ObjectReference,
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
    pub action: String,
}

/// Keeps every published event; for tests and the sandbox.
#[derive(Clone, Debug, Default)]
pub struct MemoryRecorder {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reasons of the events published for `name`, oldest first.
    pub fn reasons_for(&self, name: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|r| r.regarding.name.as_deref() == Some(name))
            .map(|r| r.reason)
            .collect()
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn publish(&self, event: &Event, regarding: &ObjectReference) {
        let recorded = Recorded {
            regarding: regarding.clone(),
            warning: matches!(event.type_, EventType::Warning),
            reason: event.reason.clone(),
            note: event.note.clone(),
            action: event.action.clone(),
        };
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(recorded);
    }
}
