//! API client for the NEO prediction service

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Header the service uses to report which model scored a batch
pub const MODEL_VERSION_HEADER: &str = "x-model-version";

/// API client for the prediction service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        // Keep any path prefix when joining endpoint paths
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .context("Invalid path")
    }

    /// GET a plain-text endpoint
    pub async fn get_text(&self, path: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.text().await.context("Failed to read response")
    }

    /// GET a status endpoint. Status endpoints answer with a JSON body on 503 too,
    /// so the status is returned instead of treated as an error.
    pub async fn get_status<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.json().await.context("Failed to parse response")?;
        Ok((status, body))
    }

    /// POST a record batch to the prediction endpoint
    pub async fn predict(&self, records: &serde_json::Value) -> Result<PredictionResult> {
        let response = self
            .client
            .post(self.url("predict")?)
            .json(records)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(error) => anyhow::bail!("API error ({}) {}: {}", status, error.kind, error.error),
                Err(_) => anyhow::bail!("API error ({}): {}", status, body),
            }
        }

        let model_version = response
            .headers()
            .get(MODEL_VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let predictions = response.json().await.context("Failed to parse response")?;

        Ok(PredictionResult {
            model_version,
            predictions,
        })
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub model_version: Option<String>,
    pub predictions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub components: BTreeMap<String, ComponentReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_predict_reads_version_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/predict")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header(MODEL_VERSION_HEADER, "7")
            .with_body("[0, 1, 0]")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let result = client
            .predict(&serde_json::json!([{"neo_id": 1}]))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.predictions, vec![0, 1, 0]);
        assert_eq!(result.model_version.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_predict_surfaces_error_kind() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/predict")
            .with_status(503)
            .with_body(r#"{"error": "model neo (Production) unavailable", "kind": "model_unavailable"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.predict(&serde_json::json!([])).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("503"));
        assert!(message.contains("model_unavailable"));
    }

    #[tokio::test]
    async fn test_status_returns_body_on_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/readyz")
            .with_status(503)
            .with_body(r#"{"ready": false, "reason": "Model 'neo' (Production) not loaded yet"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let (status, readiness): (_, Readiness) = client.get_status("/readyz").await.unwrap();

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains("not loaded"));
    }

    #[tokio::test]
    async fn test_base_path_is_kept() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/neo/")
            .with_status(200)
            .with_body("Welcome")
            .create_async()
            .await;

        let client = ApiClient::new(&format!("{}/neo", server.url())).unwrap();
        assert_eq!(client.get_text("/").await.unwrap(), "Welcome");
        mock.assert_async().await;
    }
}
