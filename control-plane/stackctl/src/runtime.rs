use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use stackctl_runtime::{LogRecorder, Recorder};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::sandbox::SandboxCluster;

/// Wire a controller to the cluster's backing stores.
pub fn build_controller(
    cluster: &SandboxCluster,
    recorder: Arc<dyn Recorder>,
    cfg: &ControllerConfig,
) -> Controller {
    let (stacks, deployments, services) = cluster.backends();
    Controller::new(stacks, deployments, services, recorder, cfg)
}

/// Spawn the stand-in for the Deployment controller.
pub fn spawn_rollout_simulator(
    cluster: SandboxCluster,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(cluster.simulate_rollouts(cancel))
}

/// Seed the sandbox, start the rollout simulator if enabled, and run the
/// controller until `cancel` fires.
pub async fn run_all(
    cfg: ControllerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    cfg.validate()?;
    let cluster = SandboxCluster::new();
    if let Some(path) = cfg.seed_file.as_deref() {
        cluster
            .seed_from_file(Path::new(path))
            .await
            .with_context(|| format!("seeding sandbox from {path}"))?;
    }

    let rollout = cfg
        .simulate_rollout
        .then(|| spawn_rollout_simulator(cluster.clone(), cancel.child_token()));

    let controller = build_controller(&cluster, Arc::new(LogRecorder), &cfg);
    let workers = cfg.effective_workers();
    info!(workers, namespace = ?cfg.namespace, "starting AppStack controller");
    let result = controller.run(workers, cancel.clone()).await;

    // also stops the simulator when the controller failed to start
    cancel.cancel();
    if let Some(handle) = rollout {
        handle.await?;
    }
    result?;
    Ok(())
}
