//! Cached access to the currently promoted model
//!
//! This module provides:
//! - One cached handle per (name, stage), served without network round trips
//! - Single-flight loading: concurrent cold starts share one load task
//! - Retry with a fixed polling interval while the model is not yet visible
//! - Explicit refresh that keeps serving the previous handle until it succeeds
//! - Cancellation when every waiter has gone away or on shutdown

use super::{ModelRegistry, RegistryError};
use crate::health::{components, HealthRegistry};
use crate::observability::ServingMetrics;
use crate::predictor::ModelHandle;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default wait between load attempts
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of load attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Configuration for model loading
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Wait between attempts while the model is not available
    pub polling_interval: Duration,
    /// Attempts before a load fails with `ModelUnavailable`
    pub max_attempts: u32,
    /// Upper bound for a single registry call
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            polling_interval: DEFAULT_POLLING_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Registry coordinates of a model
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub name: String,
    pub stage: String,
}

impl ModelKey {
    pub fn new(name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("model '{name}' not available in stage '{stage}' after {attempts} attempts")]
    ModelUnavailable {
        name: String,
        stage: String,
        attempts: u32,
    },

    #[error(transparent)]
    Registry(RegistryError),

    #[error("invalid model artifact: {0}")]
    InvalidArtifact(String),

    #[error("model load cancelled")]
    Cancelled,
}

type LoadResult = Result<Arc<ModelHandle>, ProviderError>;
type LoadSender = watch::Sender<Option<LoadResult>>;

/// Per-key cache entry. `inflight` is weak so a crashed load task cannot
/// leave waiters hanging on a sender nobody will use.
#[derive(Default)]
struct ModelSlot {
    current: Option<Arc<ModelHandle>>,
    inflight: Option<Weak<LoadSender>>,
}

struct ProviderInner {
    registry: Arc<dyn ModelRegistry>,
    config: ProviderConfig,
    slots: DashMap<ModelKey, ModelSlot>,
    cancel: CancellationToken,
    metrics: ServingMetrics,
    health: Option<HealthRegistry>,
}

/// Resolves and caches models from a registry. Cheap to clone.
#[derive(Clone)]
pub struct ModelProvider {
    inner: Arc<ProviderInner>,
}

impl ModelProvider {
    pub fn new(registry: Arc<dyn ModelRegistry>, config: ProviderConfig) -> Self {
        Self::build(registry, config, None)
    }

    /// Provider that reports every load outcome to the `model` health component
    pub fn with_health(
        registry: Arc<dyn ModelRegistry>,
        config: ProviderConfig,
        health: HealthRegistry,
    ) -> Self {
        Self::build(registry, config, Some(health))
    }

    fn build(
        registry: Arc<dyn ModelRegistry>,
        config: ProviderConfig,
        health: Option<HealthRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                registry,
                config,
                slots: DashMap::new(),
                cancel: CancellationToken::new(),
                metrics: ServingMetrics::new(),
                health,
            }),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    /// Cached handle, or a load (joining one already in flight)
    pub async fn get_model(&self, name: &str, stage: &str) -> LoadResult {
        let key = ModelKey::new(name, stage);
        let rx = {
            let mut slot = self.inner.slots.entry(key.clone()).or_default();
            if let Some(handle) = &slot.current {
                return Ok(handle.clone());
            }
            self.subscribe_or_start(&key, &mut slot)
        };
        wait_for_load(rx).await
    }

    /// Reload from the registry. The cached handle keeps serving until the
    /// new one is ready and stays in place if the reload fails.
    pub async fn refresh(&self, name: &str, stage: &str) -> LoadResult {
        let key = ModelKey::new(name, stage);
        let rx = {
            let mut slot = self.inner.slots.entry(key.clone()).or_default();
            self.subscribe_or_start(&key, &mut slot)
        };
        wait_for_load(rx).await
    }

    /// Cached handle without triggering a load
    pub fn cached(&self, name: &str, stage: &str) -> Option<Arc<ModelHandle>> {
        self.inner
            .slots
            .get(&ModelKey::new(name, stage))
            .and_then(|slot| slot.current.clone())
    }

    /// Whether a load for the key is currently running
    pub fn is_loading(&self, name: &str, stage: &str) -> bool {
        self.inner
            .slots
            .get(&ModelKey::new(name, stage))
            .and_then(|slot| slot.inflight.as_ref().and_then(Weak::upgrade))
            .is_some()
    }

    /// Stop every running and future load
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// Join the in-flight load for `key` or spawn a new one.
    /// Called with the slot's shard lock held; must not await.
    fn subscribe_or_start(
        &self,
        key: &ModelKey,
        slot: &mut ModelSlot,
    ) -> watch::Receiver<Option<LoadResult>> {
        if let Some(tx) = slot.inflight.as_ref().and_then(Weak::upgrade) {
            debug!(name = %key.name, stage = %key.stage, "Joining in-flight model load");
            return tx.subscribe();
        }

        let (tx, rx) = watch::channel(None);
        let tx = Arc::new(tx);
        slot.inflight = Some(Arc::downgrade(&tx));

        let inner = self.inner.clone();
        let key = key.clone();
        tokio::spawn(async move { inner.run_load(key, tx).await });
        rx
    }
}

impl ProviderInner {
    /// Load task: runs the retry loop unless cancelled or abandoned, then
    /// publishes the outcome to the slot and every waiter.
    async fn run_load(self: Arc<Self>, key: ModelKey, tx: Arc<LoadSender>) {
        let load = self.load_with_retry(&key);
        tokio::pin!(load);

        let result = loop {
            tokio::select! {
                result = &mut load => break result,
                _ = tx.closed() => {
                    if self.abandon(&key, &tx) {
                        info!(name = %key.name, stage = %key.stage, "Model load abandoned by all callers");
                        break Err(ProviderError::Cancelled);
                    }
                }
                _ = self.cancel.cancelled() => {
                    info!(name = %key.name, stage = %key.stage, "Model load cancelled");
                    break Err(ProviderError::Cancelled);
                }
            }
        };

        match &result {
            Ok(handle) => {
                self.metrics.set_model_version(handle.version(), handle.kind());
            }
            Err(ProviderError::Cancelled) => {}
            Err(e) => {
                self.metrics.inc_model_load_failures();
                error!(name = %key.name, stage = %key.stage, error = %e, "Model load failed");
            }
        }

        // Update the slot and health before publishing so a waiter that
        // calls again sees the result
        let has_current = match self.slots.get_mut(&key) {
            Some(mut slot) => {
                if is_inflight(&slot, &tx) {
                    slot.inflight = None;
                }
                if let Ok(handle) = &result {
                    slot.current = Some(handle.clone());
                }
                slot.current.is_some()
            }
            None => false,
        };
        self.publish_health(&result, has_current).await;
        tx.send_replace(Some(result));
    }

    /// Give up the load for `key` unless a caller joined after the last
    /// receiver went away. Joining happens under the same slot lock.
    fn abandon(&self, key: &ModelKey, tx: &Arc<LoadSender>) -> bool {
        let Some(mut slot) = self.slots.get_mut(key) else {
            return true;
        };
        if tx.receiver_count() > 0 {
            return false;
        }
        if is_inflight(&slot, tx) {
            slot.inflight = None;
        }
        true
    }

    async fn publish_health(&self, result: &LoadResult, has_current: bool) {
        let Some(health) = &self.health else {
            return;
        };
        match result {
            Ok(_) => health.set_healthy(components::MODEL).await,
            Err(ProviderError::Cancelled) => {}
            // A failed refresh leaves the previous handle serving
            Err(e) if has_current => health.set_degraded(components::MODEL, e.to_string()).await,
            Err(e) => health.set_unhealthy(components::MODEL, e.to_string()).await,
        }
    }

    async fn load_with_retry(&self, key: &ModelKey) -> LoadResult {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.metrics.inc_model_load_attempts();

            let outcome = match tokio::time::timeout(
                self.config.request_timeout,
                self.registry.resolve(&key.name, &key.stage),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(RegistryError::Unavailable(format!(
                    "no answer within {}s",
                    self.config.request_timeout.as_secs()
                ))),
            };

            match outcome {
                Ok(artifact) => {
                    let handle = ModelHandle::from_artifact(&artifact)
                        .map_err(|e| ProviderError::InvalidArtifact(format!("{e:#}")))?;
                    info!(
                        name = %key.name,
                        stage = %key.stage,
                        version = %handle.version(),
                        checksum = %handle.checksum(),
                        attempts = attempts,
                        "Model loaded"
                    );
                    return Ok(Arc::new(handle));
                }
                Err(e) if e.is_transient() => {
                    if attempts >= self.config.max_attempts {
                        return Err(ProviderError::ModelUnavailable {
                            name: key.name.clone(),
                            stage: key.stage.clone(),
                            attempts,
                        });
                    }
                    warn!(
                        attempt = attempts,
                        max_attempts = self.config.max_attempts,
                        name = %key.name,
                        stage = %key.stage,
                        error = %e,
                        "Model not available, waiting {}s",
                        self.config.polling_interval.as_secs()
                    );
                    tokio::time::sleep(self.config.polling_interval).await;
                }
                Err(e) => return Err(ProviderError::Registry(e)),
            }
        }
    }
}

/// Whether the slot's in-flight load is the one behind `tx`
fn is_inflight(slot: &ModelSlot, tx: &Arc<LoadSender>) -> bool {
    slot.inflight
        .as_ref()
        .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(tx)))
}

async fn wait_for_load(mut rx: watch::Receiver<Option<LoadResult>>) -> LoadResult {
    match rx.wait_for(Option::is_some).await {
        Ok(state) => state.clone().unwrap_or(Err(ProviderError::Cancelled)),
        // Load task went away without publishing
        Err(_) => Err(ProviderError::Cancelled),
    }
}

/// Background worker refreshing one model on a fixed interval
pub struct ModelRefreshWorker {
    provider: ModelProvider,
    key: ModelKey,
    interval: Duration,
}

impl ModelRefreshWorker {
    pub fn new(provider: ModelProvider, key: ModelKey, interval: Duration) -> Self {
        Self {
            provider,
            key,
            interval,
        }
    }

    /// Run the refresh loop until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            name = %self.key.name,
            stage = %self.key.stage,
            interval_secs = self.interval.as_secs(),
            "Starting model refresh worker"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let previous = self
                        .provider
                        .cached(&self.key.name, &self.key.stage)
                        .map(|h| h.version().to_string());
                    match self.provider.refresh(&self.key.name, &self.key.stage).await {
                        Ok(handle) if previous.as_deref() != Some(handle.version()) => {
                            info!(
                                old_version = ?previous,
                                new_version = %handle.version(),
                                "Model refreshed to new version"
                            );
                        }
                        Ok(_) => debug!("Model refresh found no new version"),
                        Err(e) => warn!(error = %e, "Model refresh failed, keeping previous version"),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down model refresh worker");
                    break;
                }
            }
        }
    }
}
