//! Server configuration

use config::{Config, Environment, File, FileFormat, Map};
use serde::Deserialize;
use serving_lib::drift::StatTest;
use serving_lib::predictor::DegeneracyPolicy;
use serving_lib::registry::{ModelKey, ProviderConfig};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "NEO_CONFIG_FILE";

const ENV_PREFIX: &str = "NEO";

/// Legacy variable names accepted as defaults
const TRACKING_URI_ALIAS: &str = "MLFLOW_TRACKING_URI";
const MODEL_NAME_ALIAS: &str = "MODEL_NAME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("registry endpoint is not set (NEO_REGISTRY_ENDPOINT or MLFLOW_TRACKING_URI)")]
    MissingEndpoint,

    #[error("invalid registry endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serving configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServingConfig {
    /// MLflow tracking server base URL
    #[serde(default)]
    pub registry_endpoint: Option<String>,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_model_stage")]
    pub model_stage: String,

    /// Artifact file inside the model version; its extension picks the decoder
    #[serde(default = "default_artifact_path")]
    pub artifact_path: String,

    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_registry_timeout")]
    pub registry_timeout_secs: u64,

    /// 0 disables the periodic model refresh
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_reference_path")]
    pub reference_path: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_store_write_timeout")]
    pub store_write_timeout_secs: u64,

    /// Drop and recreate the metrics table at startup
    #[serde(default)]
    pub reset_metrics_on_startup: bool,

    /// Fail requests whose drift row cannot be stored
    #[serde(default)]
    pub monitoring_required: bool,

    #[serde(default)]
    pub degeneracy_policy: DegeneracyPolicy,

    #[serde(default)]
    pub drift_test: StatTest,

    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_model_name() -> String {
    "neo-prediction".to_string()
}

fn default_model_stage() -> String {
    "Production".to_string()
}

fn default_artifact_path() -> String {
    "model.onnx".to_string()
}

fn default_polling_interval() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    10
}

fn default_registry_timeout() -> u64 {
    30
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_reference_path() -> String {
    "data/reference.json".to_string()
}

fn default_database_url() -> String {
    "sqlite://neo_metrics.db".to_string()
}

fn default_store_write_timeout() -> u64 {
    5
}

fn default_api_port() -> u16 {
    9696
}

impl ServingConfig {
    /// Load and validate configuration from the process environment and
    /// the optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::from_env(std::env::vars().collect())?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from an explicit environment map, without validation
    pub fn from_env(env: Map<String, String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(uri) = env.get(TRACKING_URI_ALIAS) {
            builder = builder.set_default("registry_endpoint", uri.as_str())?;
        }
        if let Some(name) = env.get(MODEL_NAME_ALIAS) {
            builder = builder.set_default("model_name", name.as_str())?;
        }
        if let Some(path) = env.get(CONFIG_FILE_ENV) {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(Some(env)),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse a TOML document, without validation
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::Invalid("model_name must not be empty".to_string()));
        }
        if self.model_stage.trim().is_empty() {
            return Err(ConfigError::Invalid("model_stage must not be empty".to_string()));
        }
        Ok(())
    }

    /// Parsed registry endpoint
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let raw = self
            .registry_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingEndpoint)?;

        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: raw.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    pub fn model_key(&self) -> ModelKey {
        ModelKey::new(&self.model_name, &self.model_stage)
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            polling_interval: Duration::from_secs(self.polling_interval_secs),
            max_attempts: self.max_attempts,
            request_timeout: self.registry_timeout(),
        }
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    pub fn store_write_timeout(&self) -> Duration {
        Duration::from_secs(self.store_write_timeout_secs)
    }

    /// `None` when periodic refresh is disabled
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ServingConfig::from_env(env(&[("NEO_REGISTRY_ENDPOINT", "http://mlflow:5000")]))
            .unwrap();

        config.validate().unwrap();
        assert_eq!(config.model_name, "neo-prediction");
        assert_eq!(config.model_stage, "Production");
        assert_eq!(config.artifact_path, "model.onnx");
        assert_eq!(config.polling_interval_secs, 60);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.api_port, 9696);
        assert_eq!(config.degeneracy_policy, DegeneracyPolicy::Substitute);
        assert_eq!(config.drift_test, StatTest::Auto);
        assert!(!config.monitoring_required);
        assert_eq!(config.refresh_interval(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_environment_overrides() {
        let config = ServingConfig::from_env(env(&[
            ("NEO_REGISTRY_ENDPOINT", "http://mlflow:5000"),
            ("NEO_MODEL_STAGE", "Staging"),
            ("NEO_MAX_ATTEMPTS", "3"),
            ("NEO_REFRESH_INTERVAL_SECS", "0"),
            ("NEO_MONITORING_REQUIRED", "true"),
            ("NEO_DEGENERACY_POLICY", "reject"),
            ("NEO_DRIFT_TEST", "wasserstein"),
        ]))
        .unwrap();

        assert_eq!(config.model_stage, "Staging");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.refresh_interval(), None);
        assert!(config.monitoring_required);
        assert_eq!(config.degeneracy_policy, DegeneracyPolicy::Reject);
        assert_eq!(config.drift_test, StatTest::Wasserstein);
    }

    #[test]
    fn test_legacy_aliases() {
        let config = ServingConfig::from_env(env(&[
            ("MLFLOW_TRACKING_URI", "http://tracking:5000"),
            ("MODEL_NAME", "neo-hazard"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint().unwrap().as_str(), "http://tracking:5000/");
        assert_eq!(config.model_name, "neo-hazard");
    }

    #[test]
    fn test_prefixed_variable_wins_over_alias() {
        let config = ServingConfig::from_env(env(&[
            ("MLFLOW_TRACKING_URI", "http://tracking:5000"),
            ("NEO_REGISTRY_ENDPOINT", "http://registry:5000"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint().unwrap().host_str(), Some("registry"));
    }

    #[test]
    fn test_config_file_layered_under_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "registry_endpoint = \"http://file:5000\"\napi_port = 8000\nmodel_stage = \"Staging\""
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = ServingConfig::from_env(env(&[
            (CONFIG_FILE_ENV, path.as_str()),
            ("NEO_API_PORT", "9000"),
        ]))
        .unwrap();

        assert_eq!(config.api_port, 9000);
        assert_eq!(config.model_stage, "Staging");
        assert_eq!(config.endpoint().unwrap().host_str(), Some("file"));
    }

    #[test]
    fn test_missing_endpoint_fails_validation() {
        let config = ServingConfig::from_env(env(&[])).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingEndpoint)));

        let config = ServingConfig::from_toml("registry_endpoint = \"  \"").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingEndpoint)));
    }

    #[test]
    fn test_invalid_endpoint_fails_validation() {
        let config = ServingConfig::from_toml("registry_endpoint = \"mlflow:5000\"").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));

        let config = ServingConfig::from_toml("registry_endpoint = \"not a url\"").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let config = ServingConfig::from_toml(
            "registry_endpoint = \"http://mlflow:5000\"\nmax_attempts = 0",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ServingConfig::from_toml(
            "registry_endpoint = \"http://mlflow:5000\"\nmodel_stage = \"\"",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_provider_config_from_settings() {
        let config = ServingConfig::from_toml(
            "registry_endpoint = \"http://mlflow:5000\"\npolling_interval_secs = 5\nmax_attempts = 2\nregistry_timeout_secs = 7",
        )
        .unwrap();

        let provider = config.provider_config();
        assert_eq!(provider.polling_interval, Duration::from_secs(5));
        assert_eq!(provider.max_attempts, 2);
        assert_eq!(provider.request_timeout, Duration::from_secs(7));
    }
}
