//! Health tracking for the serving components
//!
//! Components report their own status as they run (model loads, metrics
//! writes); the HTTP layer turns the aggregate into liveness and readiness
//! responses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing but requests are still served
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Worst status wins; no components means healthy
pub fn aggregate_status<'a>(
    components: impl IntoIterator<Item = &'a ComponentHealth>,
) -> ComponentStatus {
    components
        .into_iter()
        .map(|c| c.status)
        .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
            (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                ComponentStatus::Unhealthy
            }
            (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                ComponentStatus::Degraded
            }
            _ => ComponentStatus::Healthy,
        })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl ReadinessResponse {
    pub fn ready(model_version: impl Into<String>) -> Self {
        Self {
            ready: true,
            reason: None,
            model_version: Some(model_version.into()),
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            reason: Some(reason.into()),
            model_version: None,
        }
    }
}

/// Component names for health tracking
pub mod components {
    pub const MODEL: &str = "model";
    pub const METRICS_STORE: &str = "metrics_store";
}

/// Shared component health table plus the startup-complete flag
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    started: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Mark startup as finished
    pub async fn set_started(&self, started: bool) {
        *self.started.write().await = started;
    }

    pub async fn is_started(&self) -> bool {
        *self.started.read().await
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        HealthResponse {
            status: aggregate_status(components.values()),
            components,
        }
    }

    /// Reason the service cannot take traffic, judged from component state
    /// only. `None` means the components allow serving.
    pub async fn blocking_reason(&self) -> Option<String> {
        if !self.is_started().await {
            return Some("Service not yet initialized".to_string());
        }
        let components = self.components.read().await;
        components
            .iter()
            .find(|(_, h)| h.status == ComponentStatus::Unhealthy)
            .map(|(name, h)| {
                format!(
                    "Component {} unhealthy: {}",
                    name,
                    h.message.as_deref().unwrap_or("no details")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state_is_healthy_but_not_started() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
        assert!(registry.blocking_reason().await.is_some());
    }

    #[tokio::test]
    async fn test_degraded_store_keeps_service_servable() {
        let registry = HealthRegistry::new();
        registry.register(components::MODEL).await;
        registry.register(components::METRICS_STORE).await;
        registry.set_started(true).await;

        registry
            .set_degraded(components::METRICS_STORE, "write timed out")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
        assert!(registry.blocking_reason().await.is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_model_blocks_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::MODEL).await;
        registry.set_started(true).await;

        registry
            .set_unhealthy(components::MODEL, "not found after 10 attempts")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
        let reason = registry.blocking_reason().await.unwrap();
        assert!(reason.contains("model"));
    }

    #[test]
    fn test_aggregate_status_worst_wins() {
        let all = [
            ComponentHealth::healthy(),
            ComponentHealth::degraded("slow"),
            ComponentHealth::healthy(),
        ];
        assert_eq!(aggregate_status(&all), ComponentStatus::Degraded);

        let all = [ComponentHealth::degraded("slow"), ComponentHealth::unhealthy("down")];
        assert_eq!(aggregate_status(&all), ComponentStatus::Unhealthy);

        assert_eq!(aggregate_status(std::iter::empty()), ComponentStatus::Healthy);
    }
}
