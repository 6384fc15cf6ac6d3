//! Worker binary: load configuration from the environment, run until
//! SIGINT/SIGTERM, then shut down gracefully.

use anyhow::Context;
use tracing::info;

use galaxy_node::config::WorkerConfig;
use galaxy_node::logging::init_tracing;
use galaxy_node::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = WorkerConfig::from_env().context("failed to load worker configuration")?;
    info!(
        host = %config.broker.host,
        port = config.broker.port,
        pool_size = config.worker_pool_size,
        "galaxy-node starting"
    );

    let mut worker = Worker::new(config);
    worker.start();

    wait_for_signal().await;
    worker.shutdown().await;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; using Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}
