//! Serving library for NEO hazard prediction
//!
//! This crate provides the core functionality for:
//! - Feature derivation from raw near-earth object records
//! - Model resolution from an MLflow-compatible registry, with caching and retry
//! - Drift detection against a fixed reference distribution
//! - Persistence of drift summaries
//! - Health checks and observability

pub mod drift;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod predictor;
pub mod registry;
pub mod store;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ServingMetrics, StructuredLogger};
pub use pipeline::{PipelineConfig, PipelineError, PredictionOutcome, ServingPipeline};
