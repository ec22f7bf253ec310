//! Vitals ML service - per-patient anomaly models
//!
//! Trains one isolation forest per patient from InfluxDB vitals, serves
//! anomaly predictions over HTTP and retrains every patient on a schedule.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vitals_lib::{
    health::{components, HealthRegistry},
    source::InfluxSource,
    store::FsArtifactStore,
    StructuredLogger,
};
use vitals_service::api::{self, AppState, Components};
use vitals_service::config::ServiceConfig;

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting vitals-ml");

    let config = ServiceConfig::load()?;
    info!(
        service_name = %config.service_name,
        api_port = config.api_port,
        model_dir = %config.model_dir.display(),
        min_samples = config.min_samples,
        contamination = config.contamination,
        "Service configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORE).await;
    health_registry.register(components::SOURCE).await;
    health_registry.register(components::SCHEDULER).await;

    let logger = StructuredLogger::new(&config.service_name);

    let store = Arc::new(
        FsArtifactStore::open(&config.model_dir).context("Failed to open model directory")?,
    );
    let source = Arc::new(InfluxSource::new(config.influx_config())?);

    let state = Arc::new(AppState::new(
        health_registry.clone(),
        Components {
            store,
            observations: source.clone(),
            entities: source,
            training: config.training_config(),
            sweep: config.sweep_config(),
            scheduler: config.scheduler_config(),
            logger: logger.clone(),
        },
    ));

    state.check_store().await;
    logger.log_startup(SERVICE_VERSION, &config.model_dir.display().to_string());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let scheduler_handle = tokio::spawn(state.scheduler.clone().run(shutdown_tx.subscribe()));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        state.clone(),
        shutdown_tx.subscribe(),
    ));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    // Receivers may already be gone if a task exited early
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Sweep scheduler task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
