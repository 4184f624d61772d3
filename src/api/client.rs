// Offline Core - Offline downloads for a mobile music client
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! HTTP access for manifests, segments and cover images
//!
//! The download pipeline only needs two capabilities: fetch a small text
//! document and stream a body to disk. Both are expressed by [`HttpFetcher`] so
//! the orchestrator can be driven by a fake in tests and by [`ReqwestFetcher`]
//! in the app.
//!
//! Every call takes the item's cancellation token and returns
//! `OfflineError::Cancelled` as soon as it fires, even mid-body.

use crate::config::OfflineConfig;
use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Network collaborator used by the download pipeline
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// GET `url` and return the body as text
    async fn get_text(&self, url: &str, cancel: &CancellationToken) -> Result<String>;

    /// GET `url` and stream the body into `destination`
    ///
    /// Returns the number of bytes written. On failure or cancellation the
    /// destination file is removed.
    async fn download_to_file(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Configuration for ReqwestFetcher
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: format!("offline-core/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

impl From<&OfflineConfig> for ClientConfig {
    fn from(config: &OfflineConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// reqwest-backed [`HttpFetcher`]
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
    config: ClientConfig,
}

impl ReqwestFetcher {
    /// Create a fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a fetcher with custom configuration
    ///
    /// # Errors
    /// Returns error if the user agent is not a valid header value or the
    /// HTTP client cannot be built
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| OfflineError::InvalidInput(format!("Invalid user agent: {}", e)))?,
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(OfflineError::UnexpectedStatusCode {
                status_code: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.send(url).await?;
        response.text().await.map_err(map_transport_error)
    }

    async fn stream_to_file(&self, url: &str, destination: &Path) -> Result<u64> {
        let response = self.send(url).await?;

        let file = File::create(destination).await.map_err(|e| {
            OfflineError::FileIoError(format!(
                "Failed to create {}: {}",
                destination.display(),
                e
            ))
        })?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_transport_error)?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;
        debug!(url, bytes = written, "body saved");
        Ok(written)
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OfflineError::Cancelled),
            result = self.fetch_text(url) => result,
        }
    }

    async fn download_to_file(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OfflineError::Cancelled),
            result = self.stream_to_file(url, destination) => result,
        };

        if result.is_err() {
            // Partial body, never leave it behind.
            let _ = tokio::fs::remove_file(destination).await;
        }

        result
    }
}

/// Timeouts and refused connections are worth retrying later
fn map_transport_error(error: reqwest::Error) -> OfflineError {
    if error.is_timeout() || error.is_connect() {
        OfflineError::network_error(error.to_string(), true)
    } else {
        OfflineError::ReqwestError(error)
    }
}
