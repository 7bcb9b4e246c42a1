//! MLflow model registry client
//!
//! Resolves the latest version of a registered model in a stage through
//! the MLflow REST API and downloads one artifact file from it.

use super::{ModelArtifact, ModelRegistry, RegistryError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

const LATEST_VERSIONS_PATH: &str = "api/2.0/mlflow/registered-models/get-latest-versions";
const ARTIFACT_PATH: &str = "model-versions/get-artifact";
const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";

#[derive(Debug, Serialize)]
struct LatestVersionsRequest<'a> {
    name: &'a str,
    stages: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct LatestVersionsResponse {
    #[serde(default)]
    model_versions: Vec<ModelVersionInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelVersionInfo {
    version: String,
    #[serde(default)]
    current_stage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

/// MLflow-compatible registry client
pub struct MlflowRegistry {
    client: Client,
    endpoint: Url,
    artifact_path: String,
}

impl MlflowRegistry {
    /// Create a client for the tracking server at `endpoint`
    pub fn new(endpoint: &str, artifact_path: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let mut endpoint = Url::parse(endpoint)
            .map_err(|e| RegistryError::Other(format!("invalid registry endpoint {endpoint}: {e}")))?;
        // Url::join replaces the last segment unless the base ends with '/'
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            artifact_path: artifact_path.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url, RegistryError> {
        self.endpoint
            .join(path)
            .map_err(|e| RegistryError::Other(format!("invalid registry path {path}: {e}")))
    }

    /// Latest version number registered in `stage`
    async fn latest_version(&self, name: &str, stage: &str) -> Result<String, RegistryError> {
        let response = self
            .client
            .post(self.url(LATEST_VERSIONS_PATH)?)
            .json(&LatestVersionsRequest {
                name,
                stages: [stage],
            })
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let body: LatestVersionsResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Other(format!("malformed registry response: {e}")))?;

        body.model_versions
            .into_iter()
            .find(|v| {
                v.current_stage
                    .as_deref()
                    .map_or(true, |s| s.eq_ignore_ascii_case(stage))
            })
            .map(|v| v.version)
            .ok_or_else(|| {
                RegistryError::NotFound(format!("no version of '{name}' in stage '{stage}'"))
            })
    }

    async fn download(&self, name: &str, version: &str) -> Result<Vec<u8>, RegistryError> {
        let response = self
            .client
            .get(self.url(ARTIFACT_PATH)?)
            .query(&[
                ("path", self.artifact_path.as_str()),
                ("name", name),
                ("version", version),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ModelRegistry for MlflowRegistry {
    async fn resolve(&self, name: &str, stage: &str) -> Result<ModelArtifact, RegistryError> {
        let version = self.latest_version(name, stage).await?;
        debug!(name = %name, stage = %stage, version = %version, "Resolved model version");

        let bytes = self.download(name, &version).await?;
        Ok(ModelArtifact {
            name: name.to_string(),
            stage: stage.to_string(),
            version,
            path: self.artifact_path.clone(),
            bytes,
        })
    }
}

fn transport_error(e: reqwest::Error) -> RegistryError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        RegistryError::Unavailable(e.to_string())
    } else {
        RegistryError::Other(e.to_string())
    }
}

/// Map non-success responses onto the registry error taxonomy
async fn check_status(response: Response) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
    let message = body
        .as_ref()
        .map(|b| format!("{} {}", b.error_code, b.message))
        .unwrap_or_else(|| text.clone());

    if status == StatusCode::NOT_FOUND
        || body.as_ref().is_some_and(|b| b.error_code == RESOURCE_DOES_NOT_EXIST)
    {
        Err(RegistryError::NotFound(message.trim().to_string()))
    } else if status.is_server_error() {
        Err(RegistryError::Unavailable(format!("{status}: {}", message.trim())))
    } else {
        Err(RegistryError::Other(format!("{status}: {}", message.trim())))
    }
}
