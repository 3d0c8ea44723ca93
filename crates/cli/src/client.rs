//! API client for communicating with the NetPulse daemon

use anyhow::{Context, Result};
use pulse_lib::session::DashboardSnapshot;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use url::Url;

/// Error reported by the daemon itself
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// The daemon rejected the request because no session is running
    pub fn is_conflict(&self) -> bool {
        self.status == StatusCode::CONFLICT
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// API client for the daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
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

        Self::parse(response).await
    }

    /// Make a POST request without a body
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(ApiError { status, message }.into());
        }

        response.json().await.context("Failed to parse response")
    }

    /// Latest dashboard snapshot
    pub async fn snapshot(&self) -> Result<DashboardSnapshot> {
        self.get("api/v1/snapshot").await
    }

    pub async fn start(&self) -> Result<DashboardSnapshot> {
        self.post("api/v1/session/start").await
    }

    pub async fn stop(&self) -> Result<DashboardSnapshot> {
        self.post("api/v1/session/stop").await
    }

    pub async fn stress(&self) -> Result<DashboardSnapshot> {
        self.post("api/v1/session/stress").await
    }
}
