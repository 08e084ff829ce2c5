use envconfig::Envconfig;
use stackctl::{config::ControllerConfig, init_tracing, runtime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let cfg = ControllerConfig::init_from_env()?;
    info!(?cfg, "Starting stackctl");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl-C; shutting down");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "unable to listen for Ctrl-C"),
        }
    });

    runtime::run_all(cfg, cancel).await
}
