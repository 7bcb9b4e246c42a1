//! NEO serving - hazard prediction with drift monitoring
//!
//! Loads the promoted model from the registry, scores incoming batches and
//! records drift statistics for every served batch.

use anyhow::{Context, Result};
use neo_server::{api, config::ServingConfig};
use serving_lib::{
    drift::{DriftMonitor, ReferenceDistribution},
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    predictor::FeatureEngineer,
    registry::{MlflowRegistry, ModelProvider, ModelRefreshWorker},
    store::MetricsStore,
    PipelineConfig, ServingPipeline,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_NAME: &str = "neo-server";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting {}", SERVICE_NAME);

    let config = ServingConfig::load().context("Invalid configuration")?;
    let endpoint = config.endpoint()?;
    info!(
        registry = %endpoint,
        model = %config.model_name,
        stage = %config.model_stage,
        "Service configured"
    );

    let health = HealthRegistry::new();
    health.register(components::MODEL).await;
    health.register(components::METRICS_STORE).await;

    let logger = StructuredLogger::new(SERVICE_NAME);

    // Reference distribution, fixed for the process lifetime
    let engineer = FeatureEngineer::new(config.degeneracy_policy);
    let reference = ReferenceDistribution::load(&config.reference_path, &engineer)
        .with_context(|| format!("Failed to load reference data from {}", config.reference_path))?;
    let monitor = DriftMonitor::new(Arc::new(reference), config.drift_test);
    info!(test = %monitor.effective_test(), "Drift monitor ready");

    let store = MetricsStore::connect(&config.database_url, config.store_write_timeout()).await?;
    if config.reset_metrics_on_startup {
        store.reset_schema().await?;
    } else {
        store.ensure_schema().await?;
    }

    let registry = MlflowRegistry::new(
        endpoint.as_str(),
        &config.artifact_path,
        config.registry_timeout(),
    )?;
    let provider =
        ModelProvider::with_health(Arc::new(registry), config.provider_config(), health.clone());

    let pipeline = Arc::new(ServingPipeline::new(
        engineer,
        provider.clone(),
        monitor,
        store.clone(),
        PipelineConfig {
            model: config.model_key(),
            monitoring_required: config.monitoring_required,
        },
        health.clone(),
        logger.clone(),
    ));

    health.set_started(true).await;
    logger.log_startup(SERVICE_VERSION, &config.model_name, &config.model_stage);

    let shutdown = CancellationToken::new();

    // Load the model in the background; readiness flips once it is cached
    tokio::spawn({
        let pipeline = pipeline.clone();
        async move {
            if let Err(e) = pipeline.warm_up().await {
                warn!(error = %e, "Initial model load failed, retrying on first request");
            }
        }
    });

    let refresh_handle = config.refresh_interval().map(|interval| {
        let worker = ModelRefreshWorker::new(provider.clone(), config.model_key(), interval);
        tokio::spawn(worker.run(shutdown.clone()))
    });

    let app_state = Arc::new(api::AppState::new(pipeline));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown.clone()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    shutdown.cancel();
    provider.shutdown();

    if let Some(handle) = refresh_handle {
        handle.await?;
    }
    api_handle.await??;
    store.close().await;

    Ok(())
}
