#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use stackctl::controller::{
    ControllerContext, InvalidSpecLog, Outcome, ReconcileErr, reconcile,
};
use stackctl::crd::{
    AppStack, AppStackSpec, DeletionPolicy, DeploymentConfig, ServiceConfig,
};
use stackctl::sandbox::SandboxCluster;
use stackctl_runtime::{
    Informer, MemoryRecorder, MemoryStore, Object, ObjectExt, Store,
    wait_for_cache_sync,
};
use tokio_util::sync::CancellationToken;

pub const NS: &str = "ns";

pub fn app_stack(name: &str, image: &str, replicas: i32, port: i32) -> AppStack {
    let mut stack = AppStack::new(
        name,
        AppStackSpec {
            deployment_config: DeploymentConfig {
                name: String::new(),
                replicas: Some(replicas),
                image: image.into(),
            },
            service_config: ServiceConfig {
                port,
                ..Default::default()
            },
            deletion_policy: None,
        },
    );
    stack.metadata.namespace = Some(NS.into());
    stack
}

pub fn with_policy(mut stack: AppStack, policy: DeletionPolicy) -> AppStack {
    stack.spec.deletion_policy = Some(policy);
    stack
}

/// Informers over a sandbox cluster plus a reconcile context, without
/// the queue and workers, so tests can drive single passes.
pub struct Harness {
    pub cluster: SandboxCluster,
    pub recorder: MemoryRecorder,
    pub ctx: ControllerContext,
    cancel: CancellationToken,
}

impl Harness {
    pub async fn start() -> Self {
        let cluster = SandboxCluster::new();
        let recorder = MemoryRecorder::new();
        let cancel = CancellationToken::new();
        let (stacks, deployments, services) = cluster.backends();

        let si = Arc::new(Informer::new(stacks.source.clone()));
        let di = Arc::new(Informer::new(deployments.source.clone()));
        let vi = Arc::new(Informer::new(services.source.clone()));
        {
            let (inf, token) = (si.clone(), cancel.clone());
            tokio::spawn(async move { inf.run(token).await });
            let (inf, token) = (di.clone(), cancel.clone());
            tokio::spawn(async move { inf.run(token).await });
            let (inf, token) = (vi.clone(), cancel.clone());
            tokio::spawn(async move { inf.run(token).await });
        }
        assert!(
            wait_for_cache_sync(
                &cancel,
                Duration::from_secs(5),
                &[&*si, &*di, &*vi]
            )
            .await,
            "caches did not sync"
        );

        let ctx = ControllerContext {
            stacks: stacks.client,
            deployments: deployments.client,
            services: services.client,
            stack_cache: si.store(),
            deployment_cache: di.store(),
            service_cache: vi.store(),
            recorder: Arc::new(recorder.clone()),
            invalid_specs: InvalidSpecLog::default(),
        };
        Self {
            cluster,
            recorder,
            ctx,
            cancel,
        }
    }

    /// Wait until every cache reflects its backing store.
    pub async fn settle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if in_sync(&self.cluster.stacks, &self.ctx.stack_cache).await
                && in_sync(&self.cluster.deployments, &self.ctx.deployment_cache).await
                && in_sync(&self.cluster.services, &self.ctx.service_cache).await
            {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "caches did not settle"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Settle, then run one reconcile pass.
    pub async fn reconcile(&self, key: &str) -> Result<Outcome, ReconcileErr> {
        self.settle().await;
        reconcile(&self.ctx, key).await
    }

    pub fn apply(&self, stack: &AppStack) -> AppStack {
        self.cluster.apply_app_stack(stack).expect("apply AppStack")
    }

    pub fn stack(&self, name: &str) -> AppStack {
        self.cluster.stacks.get_object(NS, name).expect("AppStack exists")
    }

    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.cluster.deployments.get_object(NS, name).ok()
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        self.cluster.services.get_object(NS, name).ok()
    }

    /// Report `available` ready replicas on a stored Deployment.
    pub fn set_available(&self, name: &str, available: i32) {
        let mut d = self.deployment(name).expect("Deployment exists");
        d.status = Some(DeploymentStatus {
            available_replicas: Some(available),
            ..Default::default()
        });
        self.cluster
            .deployments
            .update_object_status(NS, &d)
            .expect("status update");
    }

    pub fn reset_stats(&self) {
        self.cluster.stacks.reset_stats();
        self.cluster.deployments.reset_stats();
        self.cluster.services.reset_stats();
    }

    pub fn total_writes(&self) -> usize {
        self.cluster.stacks.stats().writes()
            + self.cluster.deployments.stats().writes()
            + self.cluster.services.stats().writes()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn in_sync<K: Object>(backing: &MemoryStore<K>, cache: &Store<K>) -> bool {
    let objects = backing.list(None);
    if cache.len().await != objects.len() {
        return false;
    }
    for obj in objects {
        match cache.get(&obj.key()).await {
            Some(cached) if cached.resource_version() == obj.resource_version() => {}
            _ => return false,
        }
    }
    true
}

pub fn target_port(service: &Service) -> Option<IntOrString> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|p| p.first())
        .and_then(|p| p.target_port.clone())
}

/// Poll `check` every 20ms until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
