//! Observability infrastructure for the serving pipeline
//!
//! Provides:
//! - Prometheus metrics (prediction latency, batches, drift, model loads, persistence)
//! - Structured JSON logging with tracing

use crate::drift::DriftReport;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, GaugeVec, Histogram, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServingMetricsInner> = OnceLock::new();

struct ServingMetricsInner {
    prediction_latency_seconds: Histogram,
    drift_latency_seconds: Histogram,
    batches_served: IntCounter,
    rows_served: IntCounter,
    rows_dropped: IntCounter,
    degeneracies: IntCounter,
    request_errors: IntCounterVec,
    drifted_columns: IntGauge,
    drift_share: Gauge,
    model_version_info: GaugeVec,
    model_load_attempts: IntCounter,
    model_load_failures: IntCounter,
    metrics_rows_written: IntCounter,
    persistence_failures: IntCounter,
}

impl ServingMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "neo_serving_prediction_latency_seconds",
                "Time spent serving one prediction batch end to end",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            drift_latency_seconds: register_histogram!(
                "neo_serving_drift_latency_seconds",
                "Time spent evaluating drift for one batch",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register drift_latency_seconds"),

            batches_served: register_int_counter!(
                "neo_serving_batches_total",
                "Total number of prediction batches served"
            )
            .expect("Failed to register batches_total"),

            rows_served: register_int_counter!(
                "neo_serving_rows_total",
                "Total number of rows scored by the model"
            )
            .expect("Failed to register rows_total"),

            rows_dropped: register_int_counter!(
                "neo_serving_rows_dropped_total",
                "Total number of input rows dropped for missing values"
            )
            .expect("Failed to register rows_dropped_total"),

            degeneracies: register_int_counter!(
                "neo_serving_degeneracies_total",
                "Total number of numeric degeneracies substituted during feature derivation"
            )
            .expect("Failed to register degeneracies_total"),

            request_errors: register_int_counter_vec!(
                "neo_serving_request_errors_total",
                "Total number of failed prediction requests by error kind",
                &["kind"]
            )
            .expect("Failed to register request_errors_total"),

            drifted_columns: register_int_gauge!(
                "neo_serving_drifted_columns",
                "Number of drifted columns in the last monitored batch"
            )
            .expect("Failed to register drifted_columns"),

            drift_share: register_gauge!(
                "neo_serving_drift_share",
                "Share of drifted columns in the last monitored batch"
            )
            .expect("Failed to register drift_share"),

            model_version_info: register_gauge_vec!(
                "neo_serving_model_version_info",
                "Information about the currently loaded model",
                &["version", "kind"]
            )
            .expect("Failed to register model_version_info"),

            model_load_attempts: register_int_counter!(
                "neo_serving_model_load_attempts_total",
                "Total number of registry resolve attempts"
            )
            .expect("Failed to register model_load_attempts_total"),

            model_load_failures: register_int_counter!(
                "neo_serving_model_load_failures_total",
                "Total number of model loads that ended in failure"
            )
            .expect("Failed to register model_load_failures_total"),

            metrics_rows_written: register_int_counter!(
                "neo_serving_metrics_rows_written_total",
                "Total number of drift rows persisted"
            )
            .expect("Failed to register metrics_rows_written_total"),

            persistence_failures: register_int_counter!(
                "neo_serving_persistence_failures_total",
                "Total number of drift rows that could not be persisted"
            )
            .expect("Failed to register persistence_failures_total"),
        }
    }
}

/// Serving metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct ServingMetrics {
    _private: (),
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServingMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServingMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServingMetricsInner {
        GLOBAL_METRICS.get_or_init(ServingMetricsInner::new)
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn observe_drift_latency(&self, duration_secs: f64) {
        self.inner().drift_latency_seconds.observe(duration_secs);
    }

    /// Count one served batch and its scored and dropped rows
    pub fn record_batch(&self, rows: usize, dropped: usize) {
        let inner = self.inner();
        inner.batches_served.inc();
        inner.rows_served.inc_by(rows as u64);
        inner.rows_dropped.inc_by(dropped as u64);
    }

    pub fn add_degeneracies(&self, count: usize) {
        self.inner().degeneracies.inc_by(count as u64);
    }

    pub fn inc_request_errors(&self, kind: &str) {
        self.inner().request_errors.with_label_values(&[kind]).inc();
    }

    pub fn set_drift(&self, report: &DriftReport) {
        self.inner().drifted_columns.set(report.drifted_column_count);
        self.inner().drift_share.set(report.drift_share);
    }

    /// Update model version info
    pub fn set_model_version(&self, version: &str, kind: &str) {
        // Reset previous version
        self.inner().model_version_info.reset();
        self.inner()
            .model_version_info
            .with_label_values(&[version, kind])
            .set(1.0);
    }

    pub fn inc_model_load_attempts(&self) {
        self.inner().model_load_attempts.inc();
    }

    pub fn inc_model_load_failures(&self) {
        self.inner().model_load_failures.inc();
    }

    pub fn inc_metrics_rows_written(&self) {
        self.inner().metrics_rows_written.inc();
    }

    pub fn inc_persistence_failures(&self) {
        self.inner().persistence_failures.inc();
    }

    pub fn persistence_failures(&self) -> u64 {
        self.inner().persistence_failures.get()
    }
}

/// Structured logger for serving events
///
/// Emits JSON events with a stable `event` field for predictions, drift
/// reports, model updates and persistence problems.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Log a served prediction batch
    pub fn log_prediction(
        &self,
        input_rows: usize,
        scored_rows: usize,
        hazardous: usize,
        degeneracies: usize,
        model_version: &str,
        latency_ms: f64,
    ) {
        info!(
            event = "prediction_served",
            service = %self.service,
            input_rows = input_rows,
            scored_rows = scored_rows,
            hazardous = hazardous,
            degeneracies = degeneracies,
            model_version = %model_version,
            latency_ms = latency_ms,
            "Served prediction batch"
        );
    }

    /// Log a drift report. Drifted batches log at warn level.
    pub fn log_drift(&self, report: &DriftReport) {
        let drifted: Vec<&str> = report
            .columns
            .iter()
            .filter(|c| c.drifted)
            .map(|c| c.column)
            .collect();

        if drifted.is_empty() {
            info!(
                event = "drift_evaluated",
                service = %self.service,
                drifted_column_count = report.drifted_column_count,
                reference_quantile_value = report.reference_quantile_value,
                "No drift detected"
            );
        } else {
            warn!(
                event = "drift_evaluated",
                service = %self.service,
                drifted_column_count = report.drifted_column_count,
                drift_share = report.drift_share,
                drifted_columns = ?drifted,
                reference_quantile_value = report.reference_quantile_value,
                "Drift detected"
            );
        }
    }

    pub fn log_persistence_failure(&self, error: &str, required: bool) {
        warn!(
            event = "metrics_persistence_failed",
            service = %self.service,
            required = required,
            error = %error,
            "Failed to persist drift metrics"
        );
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, model_name: &str, model_stage: &str) {
        info!(
            event = "service_started",
            service = %self.service,
            service_version = %version,
            model_name = %model_name,
            model_stage = %model_stage,
            "NEO serving started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "NEO serving shutting down"
        );
    }

    /// Log model update
    pub fn log_model_update(&self, old_version: Option<&str>, new_version: &str, checksum: &str) {
        info!(
            event = "model_updated",
            service = %self.service,
            old_version = ?old_version,
            new_version = %new_version,
            checksum = %checksum,
            "Serving model updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::{ColumnDrift, StatTest};

    #[test]
    fn test_serving_metrics_creation() {
        let metrics = ServingMetrics::new();

        metrics.observe_prediction_latency(0.001);
        metrics.observe_drift_latency(0.002);
        metrics.record_batch(10, 2);
        metrics.add_degeneracies(1);
        metrics.inc_request_errors("input");
        metrics.set_model_version("3", "onnx");
        metrics.inc_model_load_attempts();

        let before = metrics.persistence_failures();
        metrics.inc_persistence_failures();
        assert!(metrics.persistence_failures() > before);
    }

    #[test]
    fn test_metrics_registered_in_default_registry() {
        let metrics = ServingMetrics::new();
        metrics.record_batch(1, 0);

        let names: Vec<String> = prometheus::gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "neo_serving_batches_total"));
        assert!(names.iter().any(|n| n == "neo_serving_rows_total"));
    }

    #[test]
    fn test_structured_logger_logs_drift() {
        let logger = StructuredLogger::new("neo-server");
        assert_eq!(logger.service(), "neo-server");

        let report = DriftReport {
            drifted_column_count: 1,
            reference_quantile_value: 12.5,
            drift_share: 0.1,
            columns: vec![ColumnDrift {
                column: "relative_velocity",
                test: StatTest::Ks,
                statistic: 0.01,
                threshold: 0.05,
                drifted: true,
            }],
        };
        logger.log_drift(&report);
    }
}
