//! API client for communicating with the vitals model service

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// API client for the vitals model service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        parse_response(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        parse_response(response).await
    }

    /// Make a POST request whose body is meaningful on error statuses too
    ///
    /// Single-patient training answers failures with a `TrainResult` body,
    /// so the body is decoded whenever it matches `T`.
    pub async fn post_outcome<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(_) if !status.is_success() => {
                anyhow::bail!("API error ({}): {}", status, error_detail(&body))
            }
            Err(e) => Err(e).context("Failed to parse response"),
        }
    }

    /// GET a resource that may legitimately be absent (404 maps to `None`)
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_response(response).await.map(Some)
    }
}

async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("API error ({}): {}", status, error_detail(&body));
    }

    response.json().await.context("Failed to parse response")
}

/// Pull the `detail` message out of an error body, falling back to the raw text
fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.detail)
        .unwrap_or_else(|_| body.to_string())
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub entity_id: String,
    pub status: String,
    pub version: String,
    pub feature_names: Vec<String>,
    pub trained_at: String,
    pub sample_count: usize,
    pub contamination: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub name: String,
    pub version: String,
    pub status: String,
    pub models: Vec<ModelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sweep: Option<SweepRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRecord {
    pub finished_at: String,
    pub entity_count: usize,
    pub trained: usize,
    pub skipped: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enumeration_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub patient_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub features: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: bool,
    pub anomaly_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResult {
    pub patient_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSummary {
    pub trained: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainAllResponse {
    pub results: Vec<TrainResult>,
    pub summary: SweepSummary,
}
