//! Turns watch events into work-queue keys.
//!
//! Parent events enqueue the parent itself. Child events are walked
//! back to their controlling AppStack through the controller owner
//! reference and the parent cache.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use stackctl_runtime::{Object, ObjectExt, RateLimitingQueue, ResourceEvent, Store};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::crd::AppStack;

/// Event from any watched kind, tagged by the kind it came from.
#[derive(Clone, Debug)]
pub enum Watched {
    Parent(ResourceEvent<AppStack>),
    Deployment(ResourceEvent<Deployment>),
    Service(ResourceEvent<Service>),
}

#[derive(Clone)]
pub struct EventRouter {
    stacks: Store<AppStack>,
    queue: RateLimitingQueue<String>,
}

impl EventRouter {
    pub fn new(stacks: Store<AppStack>, queue: RateLimitingQueue<String>) -> Self {
        Self { stacks, queue }
    }

    pub async fn run(self, rx: flume::Receiver<Watched>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                ev = rx.recv_async() => match ev {
                    Ok(ev) => self.route(ev).await,
                    Err(_) => return,
                },
            }
        }
    }

    pub async fn route(&self, ev: Watched) {
        match ev {
            Watched::Parent(ev) => self.handle_parent(ev),
            Watched::Deployment(ev) => self.handle_child(ev).await,
            Watched::Service(ev) => self.handle_child(ev).await,
        }
    }

    fn handle_parent(&self, ev: ResourceEvent<AppStack>) {
        match ev {
            ResourceEvent::Added(obj) | ResourceEvent::Updated { new: obj, .. } => {
                self.enqueue(&obj)
            }
            // the next reconcile of a queued key sees the parent is gone
            ResourceEvent::Deleted(_) | ResourceEvent::Tombstone(_) => {}
        }
    }

    async fn handle_child<C: Object>(&self, ev: ResourceEvent<C>) {
        let child: Arc<C> = match ev {
            ResourceEvent::Updated { old, new } => {
                if old.resource_version() == new.resource_version() {
                    trace!(kind = %C::kind(&()), name = %new.name_any(), "router: resync noise");
                    return;
                }
                new
            }
            ResourceEvent::Added(obj) | ResourceEvent::Deleted(obj) => obj,
            ResourceEvent::Tombstone(t) => match t.last_known {
                Some(obj) => {
                    debug!(kind = %C::kind(&()), key = %t.key, "router: recovered deleted object");
                    obj
                }
                None => {
                    debug!(kind = %C::kind(&()), key = %t.key, "router: tombstone without final state");
                    return;
                }
            },
        };

        let Some(owner) = child.controller_of() else {
            return;
        };
        // same kind from another group is not ours
        if owner.kind != AppStack::kind(&())
            || owner.api_version != AppStack::api_version(&())
        {
            return;
        }
        let ns = child.ns();
        match self.stacks.get_namespaced(ns, &owner.name).await {
            Some(stack) => self.enqueue(&stack),
            None => {
                debug!(
                    kind = %C::kind(&()),
                    %ns,
                    name = %child.name_any(),
                    owner = %owner.name,
                    "router: ignoring orphaned object"
                );
            }
        }
    }

    fn enqueue(&self, stack: &AppStack) {
        let key = stack.key().to_string();
        trace!(%key, "router: enqueue");
        self.queue.add(key);
    }
}
