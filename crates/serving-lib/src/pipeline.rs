//! Request orchestration
//!
//! For each batch: derive features once, score them with the cached model,
//! evaluate drift on the same rows and persist the drift summary.
//! Predictions are returned even when monitoring fails, unless monitoring
//! is configured as required.

use crate::drift::{DriftMonitor, DriftReport};
use crate::health::{components, HealthRegistry, HealthResponse, ReadinessResponse};
use crate::models::{FeatureRecord, RawRecord};
use crate::observability::{ServingMetrics, StructuredLogger};
use crate::predictor::{Degeneracy, FeatureEngineer, FeatureError, ModelHandle};
use crate::registry::{ModelKey, ModelProvider, ProviderError};
use crate::store::{MetricsStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Input(#[from] FeatureError),

    #[error(transparent)]
    Model(#[from] ProviderError),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("metrics persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl PipelineError {
    /// Stable error class, used for metrics labels and error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "input",
            PipelineError::Model(ProviderError::ModelUnavailable { .. })
            | PipelineError::Model(ProviderError::Cancelled) => "model_unavailable",
            PipelineError::Model(_) => "registry",
            PipelineError::Inference(_) => "inference",
            PipelineError::Persistence(_) => "persistence",
        }
    }
}

/// Result of serving one batch
#[derive(Debug, Clone, Serialize)]
pub struct PredictionOutcome {
    /// One label per surviving row, in row order
    pub predictions: Vec<i64>,
    /// `None` when no row survived and no model was consulted
    pub model_version: Option<String>,
    pub drift: Option<DriftReport>,
    pub persisted: bool,
    pub degeneracies: Vec<Degeneracy>,
}

impl PredictionOutcome {
    fn empty(degeneracies: Vec<Degeneracy>) -> Self {
        Self {
            predictions: Vec::new(),
            model_version: None,
            drift: None,
            persisted: false,
            degeneracies,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: ModelKey,
    /// Fail requests whose drift row cannot be stored
    pub monitoring_required: bool,
}

/// Serving pipeline shared by every request handler
pub struct ServingPipeline {
    engineer: FeatureEngineer,
    provider: ModelProvider,
    monitor: DriftMonitor,
    store: MetricsStore,
    config: PipelineConfig,
    health: HealthRegistry,
    metrics: ServingMetrics,
    logger: StructuredLogger,
}

impl ServingPipeline {
    pub fn new(
        engineer: FeatureEngineer,
        provider: ModelProvider,
        monitor: DriftMonitor,
        store: MetricsStore,
        config: PipelineConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            engineer,
            provider,
            monitor,
            store,
            config,
            health,
            metrics: ServingMetrics::new(),
            logger,
        }
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn model_key(&self) -> &ModelKey {
        &self.config.model
    }

    /// Serve one raw batch
    pub async fn serve(&self, records: &[RawRecord]) -> Result<PredictionOutcome, PipelineError> {
        let start = Instant::now();
        let result = self.serve_batch(records).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(outcome) => {
                self.metrics.observe_prediction_latency(elapsed.as_secs_f64());
                self.logger.log_prediction(
                    records.len(),
                    outcome.predictions.len(),
                    outcome.predictions.iter().filter(|&&p| p == 1).count(),
                    outcome.degeneracies.len(),
                    outcome.model_version.as_deref().unwrap_or("none"),
                    elapsed.as_secs_f64() * 1000.0,
                );
            }
            Err(e) => {
                self.metrics.inc_request_errors(e.kind());
                warn!(kind = e.kind(), error = %e, "Prediction request failed");
            }
        }
        result
    }

    async fn serve_batch(&self, records: &[RawRecord]) -> Result<PredictionOutcome, PipelineError> {
        let batch = self.engineer.transform(records)?;
        self.metrics.record_batch(batch.len(), batch.dropped_rows());
        self.metrics.add_degeneracies(batch.degeneracies().len());

        if batch.is_empty() {
            debug!(input_rows = records.len(), "No rows left after feature derivation");
            return Ok(PredictionOutcome::empty(batch.degeneracies().to_vec()));
        }

        let model = self.model().await?;
        let predictions = model
            .predict(batch.records())
            .map_err(|e| PipelineError::Inference(format!("{e:#}")))?;

        let drift = self.evaluate_drift(batch.records());
        let persisted = match &drift {
            Some(report) => self.persist(report).await?,
            None => false,
        };

        Ok(PredictionOutcome {
            predictions,
            model_version: Some(model.version().to_string()),
            drift,
            persisted,
            degeneracies: batch.degeneracies().to_vec(),
        })
    }

    /// Cached model, loading it on first use. The provider reports the
    /// load outcome to the `model` health component.
    async fn model(&self) -> Result<Arc<ModelHandle>, ProviderError> {
        let key = &self.config.model;
        self.provider.get_model(&key.name, &key.stage).await
    }

    fn evaluate_drift(&self, rows: &[FeatureRecord]) -> Option<DriftReport> {
        let start = Instant::now();
        match self.monitor.evaluate(rows) {
            Ok(report) => {
                self.metrics.observe_drift_latency(start.elapsed().as_secs_f64());
                self.metrics.set_drift(&report);
                self.logger.log_drift(&report);
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "Skipping drift monitoring for batch");
                None
            }
        }
    }

    /// Store the drift row. Failures only propagate when monitoring is required.
    async fn persist(&self, report: &DriftReport) -> Result<bool, PipelineError> {
        match self.store.append(report).await {
            Ok(_) => {
                self.metrics.inc_metrics_rows_written();
                self.health.set_healthy(components::METRICS_STORE).await;
                Ok(true)
            }
            Err(e) => {
                self.metrics.inc_persistence_failures();
                self.logger
                    .log_persistence_failure(&e.to_string(), self.config.monitoring_required);
                self.health
                    .set_degraded(components::METRICS_STORE, e.to_string())
                    .await;
                if self.config.monitoring_required {
                    Err(PipelineError::Persistence(e))
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Load the model ahead of the first request
    pub async fn warm_up(&self) -> Result<Arc<ModelHandle>, PipelineError> {
        let model = self.model().await?;
        self.logger
            .log_model_update(None, model.version(), model.checksum());
        Ok(model)
    }

    pub async fn health(&self) -> HealthResponse {
        self.health.health().await
    }

    /// Ready when startup finished, the model is cached and the store answers
    pub async fn readiness(&self) -> ReadinessResponse {
        if let Some(reason) = self.health.blocking_reason().await {
            return ReadinessResponse::not_ready(reason);
        }
        let key = &self.config.model;
        let Some(model) = self.provider.cached(&key.name, &key.stage) else {
            return ReadinessResponse::not_ready(format!(
                "Model '{}' ({}) not loaded yet",
                key.name, key.stage
            ));
        };
        if let Err(e) = self.store.ping().await {
            return ReadinessResponse::not_ready(format!("Metrics store unreachable: {e}"));
        }
        ReadinessResponse::ready(model.version())
    }
}
