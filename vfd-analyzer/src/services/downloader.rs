//! URL ingestion
//!
//! Streams a remote video into memory under the same size ceiling as uploads.
//! Only `http` and `https` are accepted.

use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::AnalysisError;
use crate::services::fingerprinter::{append_bounded, too_large};

const USER_AGENT: &str = concat!("vfd-analyzer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct VideoDownloader {
    http_client: Client,
    max_bytes: u64,
}

impl VideoDownloader {
    pub fn new(max_bytes: u64, timeout: Duration) -> vfd_common::Result<Self> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| vfd_common::Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            max_bytes,
        })
    }

    /// Validate a caller-supplied URL
    pub fn parse_url(raw: &str) -> Result<Url, AnalysisError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| AnalysisError::InputUnreadable(format!("invalid URL: {}", e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(AnalysisError::InputUnreadable(format!(
                "unsupported URL scheme '{}'",
                other
            ))),
        }
    }

    /// Fetch the whole body, aborting once it passes the ceiling
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>, AnalysisError> {
        let unreadable = |e: reqwest::Error| AnalysisError::InputUnreadable(format!("download failed: {}", e));

        let mut response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(unreadable)?;

        if !response.status().is_success() {
            return Err(AnalysisError::InputUnreadable(format!(
                "download failed: HTTP {}",
                response.status()
            )));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(too_large(self.max_bytes));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(unreadable)? {
            if let Err(e) = append_bounded(&mut body, &chunk, self.max_bytes) {
                debug!(url = %url, "Download aborted at size ceiling");
                return Err(e);
            }
        }

        if body.is_empty() {
            return Err(AnalysisError::InputUnreadable("download returned no data".to_string()));
        }
        info!(url = %url, bytes = body.len(), "Downloaded video");
        Ok(body)
    }
}
