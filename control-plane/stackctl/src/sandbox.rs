//! In-process cluster the binary runs against: one backing store per
//! kind, owner-based garbage collection on AppStack deletion, and an
//! optional rollout simulator standing in for the Deployment controller.

use std::path::Path;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use stackctl_runtime::{
    ClientError, ListWatch, MemoryStore, Object, ObjectExt, WatchEvent,
    WatchSource,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::Backend;
use crate::crd::AppStack;
use crate::templates::deployment_replicas;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Children removed together with their AppStack.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub deployments: Vec<String>,
    pub services: Vec<String>,
}

#[derive(Clone, Default)]
pub struct SandboxCluster {
    pub stacks: MemoryStore<AppStack>,
    pub deployments: MemoryStore<Deployment>,
    pub services: MemoryStore<Service>,
}

impl SandboxCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backends(&self) -> (Backend<AppStack>, Backend<Deployment>, Backend<Service>) {
        (
            Backend::new(self.stacks.clone()),
            Backend::new(self.deployments.clone()),
            Backend::new(self.services.clone()),
        )
    }

    /// Create the AppStack, or replace the spec and labels of an
    /// existing one.
    pub fn apply_app_stack(&self, stack: &AppStack) -> Result<AppStack, ClientError> {
        let ns = match stack.ns() {
            "" => DEFAULT_NAMESPACE,
            ns => ns,
        };
        match self.stacks.get_object(ns, &stack.name_any()) {
            Ok(mut current) => {
                current.spec = stack.spec.clone();
                current.metadata.labels = stack.metadata.labels.clone();
                self.stacks.update_object(ns, &current)
            }
            Err(e) if e.is_not_found() => self.stacks.create_object(ns, stack),
            Err(e) => Err(e),
        }
    }

    /// Delete an AppStack and every child it controls. Children without
    /// a controller reference to it survive.
    pub fn delete_app_stack(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<CascadeReport, ClientError> {
        let stack = self.stacks.delete(namespace, name)?;
        let report = CascadeReport {
            deployments: collect_garbage(&self.deployments, &stack)?,
            services: collect_garbage(&self.services, &stack)?,
        };
        info!(
            ns = %namespace,
            %name,
            deployments = report.deployments.len(),
            services = report.services.len(),
            "sandbox: AppStack deleted"
        );
        Ok(report)
    }

    /// Apply every AppStack in a JSON array file.
    pub async fn seed_from_file(&self, path: &Path) -> Result<usize, SandboxError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let stacks: Vec<AppStack> = serde_json::from_str(&raw)?;
        for stack in &stacks {
            self.apply_app_stack(stack)?;
        }
        info!(path = %path.display(), count = stacks.len(), "sandbox: seeded AppStacks");
        Ok(stacks.len())
    }

    /// Report every Deployment as fully rolled out, as the real
    /// Deployment controller would once its pods are up.
    pub async fn simulate_rollouts(self, cancel: CancellationToken) {
        loop {
            let listed = tokio::select! {
                _ = cancel.cancelled() => return,
                res = self.deployments.list_watch(None) => res,
            };
            let ListWatch { items, mut events } = match listed {
                Ok(lw) => lw,
                Err(e) => {
                    warn!(error = %e, "rollout: list failed");
                    return;
                }
            };
            for d in &items {
                self.roll_out(d);
            }
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    ev = events.next() => match ev {
                        Some(WatchEvent::Added(d) | WatchEvent::Modified(d)) => {
                            self.roll_out(&d)
                        }
                        Some(WatchEvent::Deleted(_)) => {}
                        None => break,
                    },
                }
            }
        }
    }

    fn roll_out(&self, deployment: &Deployment) {
        let desired = deployment_replicas(deployment).unwrap_or(1);
        let status = DeploymentStatus {
            replicas: Some(desired),
            available_replicas: Some(desired),
            ..Default::default()
        };
        if deployment.status.as_ref() == Some(&status) {
            return;
        }
        let mut copy = deployment.clone();
        copy.status = Some(status);
        match self.deployments.update_object_status(deployment.ns(), &copy) {
            Ok(_) => debug!(
                ns = %deployment.ns(),
                name = %deployment.name_any(),
                replicas = desired,
                "rollout: deployment available"
            ),
            // a newer version is on its way through the watch
            Err(e) => debug!(error = %e, "rollout: status update skipped"),
        }
    }
}

fn collect_garbage<C: Object>(
    store: &MemoryStore<C>,
    owner: &AppStack,
) -> Result<Vec<String>, ClientError> {
    let mut removed = Vec::new();
    for child in store.list(Some(owner.ns())) {
        if child.is_controlled_by(owner) {
            let name = child.name_any();
            store.delete(child.ns(), &name)?;
            removed.push(name);
        }
    }
    Ok(removed)
}
