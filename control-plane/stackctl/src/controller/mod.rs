pub mod events;
pub mod reconcile;
pub mod router;
pub mod status;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use stackctl_runtime::{
    ClientError, Informer, KeyError, Object, ObjectClient, RateLimitingQueue,
    Recorder, ResourceEvent, Store, WatchSource, wait_for_cache_sync,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ControllerConfig;
use crate::crd::AppStack;

pub use events::InvalidSpecLog;
pub use reconcile::{Outcome, reconcile};
pub use router::{EventRouter, Watched};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("invalid resource key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("{0}")]
    ResourceExists(String),
    #[error("store error: {0}")]
    Store(#[from] ClientError),
    #[error("reconcile panicked: {0}")]
    Panicked(String),
}

impl ReconcileErr {
    /// Malformed keys never become valid; everything else may.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileErr::InvalidKey(_))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error("failed to wait for caches to sync")]
    CacheSyncFailed,
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Read/write and watch access to one kind.
pub struct Backend<K: Object> {
    pub client: Arc<dyn ObjectClient<K>>,
    pub source: Arc<dyn WatchSource<K>>,
}

impl<K: Object> Clone for Backend<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            source: self.source.clone(),
        }
    }
}

impl<K: Object> Backend<K> {
    pub fn new<S>(store: S) -> Self
    where
        S: ObjectClient<K> + WatchSource<K> + 'static,
    {
        let store = Arc::new(store);
        Self {
            client: store.clone(),
            source: store,
        }
    }
}

/// Everything a reconcile pass needs, scoped to one controller.
pub struct ControllerContext {
    pub stacks: Arc<dyn ObjectClient<AppStack>>,
    pub deployments: Arc<dyn ObjectClient<Deployment>>,
    pub services: Arc<dyn ObjectClient<Service>>,
    pub stack_cache: Store<AppStack>,
    pub deployment_cache: Store<Deployment>,
    pub service_cache: Store<Service>,
    pub recorder: Arc<dyn Recorder>,
    pub invalid_specs: InvalidSpecLog,
}

pub struct Controller {
    ctx: Arc<ControllerContext>,
    queue: RateLimitingQueue<String>,
    stacks: Arc<Informer<AppStack>>,
    deployments: Arc<Informer<Deployment>>,
    services: Arc<Informer<Service>>,
    events: flume::Receiver<Watched>,
    cache_sync_timeout: Duration,
}

fn informer<K: Object>(
    backend: &Backend<K>,
    cfg: &ControllerConfig,
    tx: flume::Sender<Watched>,
    tag: fn(ResourceEvent<K>) -> Watched,
) -> Arc<Informer<K>> {
    let informer = Informer::new(backend.source.clone())
        .with_namespace(cfg.namespace.clone())
        .with_resync(cfg.resync());
    informer.add_event_handler(move |ev| {
        let _ = tx.send(tag(ev));
    });
    Arc::new(informer)
}

impl Controller {
    /// Must be called inside a tokio runtime; the queue starts its
    /// delay loop right away.
    pub fn new(
        stacks: Backend<AppStack>,
        deployments: Backend<Deployment>,
        services: Backend<Service>,
        recorder: Arc<dyn Recorder>,
        cfg: &ControllerConfig,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        let stack_informer = informer(&stacks, cfg, tx.clone(), Watched::Parent);
        let deployment_informer =
            informer(&deployments, cfg, tx.clone(), Watched::Deployment);
        let service_informer = informer(&services, cfg, tx, Watched::Service);

        let ctx = Arc::new(ControllerContext {
            stacks: stacks.client,
            deployments: deployments.client,
            services: services.client,
            stack_cache: stack_informer.store(),
            deployment_cache: deployment_informer.store(),
            service_cache: service_informer.store(),
            recorder,
            invalid_specs: InvalidSpecLog::default(),
        });
        Self {
            ctx,
            queue: RateLimitingQueue::new(cfg.rate_limit.build::<String>()),
            stacks: stack_informer,
            deployments: deployment_informer,
            services: service_informer,
            events: rx,
            cache_sync_timeout: cfg.cache_sync_timeout(),
        }
    }

    pub fn context(&self) -> Arc<ControllerContext> {
        self.ctx.clone()
    }

    pub fn queue(&self) -> RateLimitingQueue<String> {
        self.queue.clone()
    }

    /// Run until `cancel` fires. In-flight reconciles finish before
    /// this returns.
    pub async fn run(
        self,
        workers: usize,
        cancel: CancellationToken,
    ) -> Result<(), ControllerError> {
        let Controller {
            ctx,
            queue,
            stacks,
            deployments,
            services,
            events,
            cache_sync_timeout,
        } = self;

        let watch_stop = cancel.child_token();
        let mut background = JoinSet::new();
        {
            let (inf, token) = (stacks.clone(), watch_stop.clone());
            background.spawn(async move { inf.run(token).await });
            let (inf, token) = (deployments.clone(), watch_stop.clone());
            background.spawn(async move { inf.run(token).await });
            let (inf, token) = (services.clone(), watch_stop.clone());
            background.spawn(async move { inf.run(token).await });
        }
        let router = EventRouter::new(ctx.stack_cache.clone(), queue.clone());
        background.spawn(router.run(events, watch_stop.clone()));

        info!("controller: waiting for informer caches to sync");
        let synced = wait_for_cache_sync(
            &cancel,
            cache_sync_timeout,
            &[&*stacks, &*deployments, &*services],
        )
        .await;
        if !synced {
            watch_stop.cancel();
            queue.shut_down();
            while background.join_next().await.is_some() {}
            return Err(ControllerError::CacheSyncFailed);
        }

        info!(workers, "controller: starting workers");
        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(worker::run_worker(id, ctx.clone(), queue.clone()));
        }

        cancel.cancelled().await;
        info!("controller: shutting down workers");
        queue.shut_down();
        let mut result = Ok(());
        while let Some(res) = pool.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "controller: worker task failed");
                result = Err(e.into());
            }
        }
        watch_stop.cancel();
        while background.join_next().await.is_some() {}
        info!("controller: stopped");
        result
    }
}
