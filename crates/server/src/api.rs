//! HTTP API for predictions, health checks and Prometheus metrics

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serving_lib::{ComponentStatus, PipelineError, RawRecord, ServingPipeline};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const WELCOME_MESSAGE: &str = "Welcome to the Neo-Hazard Prediction API!";

/// Response header carrying the model version that scored the batch
pub const MODEL_VERSION_HEADER: &str = "x-model-version";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ServingPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<ServingPipeline>) -> Self {
        Self { pipeline }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// Request failure mapped onto an HTTP status
#[derive(Debug)]
pub enum ApiError {
    /// Body is not a record batch
    MalformedBody(String),
    Pipeline(PipelineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(e) => match e.kind() {
                "input" => StatusCode::BAD_REQUEST,
                "model_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
                "registry" => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::MalformedBody(_) => "input",
            ApiError::Pipeline(e) => e.kind(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: match &self {
                ApiError::MalformedBody(message) => message.clone(),
                ApiError::Pipeline(e) => e.to_string(),
            },
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

/// Decode a record batch. Accepts a JSON array of records or a JSON string
/// holding that array.
pub fn parse_records(body: &[u8]) -> Result<Vec<RawRecord>, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::MalformedBody(format!("invalid JSON: {e}")))?;

    let records = match value {
        serde_json::Value::String(inner) => serde_json::from_str(&inner),
        other => serde_json::from_value(other),
    };
    records.map_err(|e| ApiError::MalformedBody(format!("expected an array of records: {e}")))
}

async fn welcome() -> &'static str {
    WELCOME_MESSAGE
}

async fn predict(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let records = parse_records(&body)?;
    let outcome = state.pipeline.serve(&records).await?;

    let mut response = Json(outcome.predictions).into_response();
    if let Some(version) = outcome
        .model_version
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        response.headers_mut().insert(MODEL_VERSION_HEADER, version);
    }
    Ok(response)
}

/// Health check response - returns 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.pipeline.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.pipeline.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/predict", post(predict))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` is cancelled
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
