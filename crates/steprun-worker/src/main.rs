use anyhow::{Context, Result};
use steprun_storage::{create_backends, RuntimeConfig};
use steprun_worker::run_sweeper;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "steprun_worker=info,steprun_storage=info,steprun_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("steprun-worker starting...");

    let config = RuntimeConfig::from_env().context("Failed to load runtime configuration")?;
    tracing::info!(mode = ?config.mode, "Backend mode configured");

    let backends = create_backends(&config)
        .await
        .context("Failed to create runtime backends")?;
    let coordinator = backends.coordinator();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(
        interval_secs = config.sweep_interval.as_secs(),
        "Worker ready, sweeping expired operations"
    );
    let removed = run_sweeper(&coordinator, config.sweep_interval, shutdown_rx).await;

    coordinator
        .disconnect()
        .await
        .context("Failed to disconnect runtime backends")?;

    tracing::info!(removed, "Worker shutdown complete");
    Ok(())
}
