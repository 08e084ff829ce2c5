use std::collections::HashMap;
use std::sync::Mutex;

use kube::runtime::events::{Event, EventType};
use kube::{Resource, ResourceExt};
use stackctl_runtime::{ObjectExt, Recorder};

use crate::crd::AppStack;

pub const REASON_SYNCED: &str = "Synced";
pub const REASON_RESOURCE_EXISTS: &str = "ErrResourceExists";
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";

pub const MESSAGE_SYNCED: &str = "AppStack synced successfully";

pub fn resource_exists_message(child: &str) -> String {
    format!("Resource {child:?} already exists and is not managed by AppStack")
}

pub async fn emit_event(
    recorder: &dyn Recorder,
    stack: &AppStack,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    tracing::trace!(ns = %stack.ns(), name = %stack.name_any(), %reason, "emit event");
    recorder
        .publish(
            &Event {
                type_,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
            &stack.object_ref(&()),
        )
        .await;
}

/// Resource version at which each AppStack's invalid spec was last
/// reported, keyed by `ns/name`.
///
/// Child events keep re-enqueueing a broken AppStack; it is warned
/// about once per version.
#[derive(Debug, Default)]
pub struct InvalidSpecLog(Mutex<HashMap<String, String>>);

impl InvalidSpecLog {
    /// True the first time `key` is reported at `version`.
    pub fn first_report(&self, key: &str, version: &str) -> bool {
        let mut seen = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if seen.get(key).is_some_and(|v| v == version) {
            return false;
        }
        seen.insert(key.to_string(), version.to_string());
        true
    }

    pub fn clear(&self, key: &str) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}
