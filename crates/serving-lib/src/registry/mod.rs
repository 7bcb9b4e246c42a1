//! Model registry access
//!
//! This module provides:
//! - The registry interface the serving pipeline consumes
//! - An MLflow REST client implementing it
//! - A caching model provider with retry, single-flight loading and refresh

mod client;
mod provider;

pub use client::MlflowRegistry;
pub use provider::{
    ModelKey, ModelProvider, ModelRefreshWorker, ProviderConfig, ProviderError,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_POLLING_INTERVAL,
};

use async_trait::async_trait;
use thiserror::Error;

/// Raw model artifact as served by the registry
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub name: String,
    pub stage: String,
    pub version: String,
    /// Artifact path inside the model version, decides the decoder
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// No version of the model is (yet) visible in the requested stage
    #[error("model not found: {0}")]
    NotFound(String),

    /// Registry could not be reached or timed out
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("registry error: {0}")]
    Other(String),
}

impl RegistryError {
    /// Whether a later attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::NotFound(_) | RegistryError::Unavailable(_))
    }
}

/// Resolves the artifact currently promoted to a stage
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn resolve(&self, name: &str, stage: &str) -> Result<ModelArtifact, RegistryError>;
}
