//! Ledger client contract and HTTP implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::VerdictLabel;

/// Canonical record submitted to the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorPayload {
    /// Fingerprint digest of the anchored result
    pub result_ref: String,
    pub analysis_id: String,
    pub fake_probability: f64,
    pub label: VerdictLabel,
    pub policy_version: String,
    /// SHA-256 over the canonical result JSON
    pub checksum: String,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    /// Worth retrying (network, timeouts, 5xx, 429)
    #[error("transient ledger failure: {0}")]
    Transient(String),

    /// Rejected outright
    #[error("ledger rejected submission: {0}")]
    Permanent(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a payload, returning the ledger's transaction reference
    async fn submit(&self, payload: &AnchorPayload) -> Result<String, LedgerError>;
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(alias = "transaction_hash", alias = "signature")]
    transaction_ref: String,
}

/// Ledger gateway reached over HTTP (`POST <endpoint>` with the payload as JSON)
pub struct HttpLedgerClient {
    endpoint: String,
    http_client: Client,
}

impl HttpLedgerClient {
    pub fn new(endpoint: &str, timeout: Duration) -> vfd_common::Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("vfd-analyzer/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| vfd_common::Error::Config(format!("Ledger HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit(&self, payload: &AnchorPayload) -> Result<String, LedgerError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| LedgerError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LedgerError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Permanent(format!("HTTP {}: {}", status, body.trim())));
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Permanent(format!("unparseable ledger response: {}", e)))?;

        if parsed.transaction_ref.is_empty() {
            return Err(LedgerError::Permanent("empty transaction reference".to_string()));
        }
        Ok(parsed.transaction_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_aliases() {
        for body in [
            r#"{"transaction_ref":"tx1"}"#,
            r#"{"transaction_hash":"tx1"}"#,
            r#"{"signature":"tx1"}"#,
        ] {
            let parsed: SubmitResponse = serde_json::from_str(body).unwrap();
            assert_eq!(parsed.transaction_ref, "tx1");
        }
    }

    #[tokio::test]
    async fn test_unreachable_ledger_is_transient() {
        let client = HttpLedgerClient::new("http://127.0.0.1:1/anchor", Duration::from_millis(500))
            .unwrap();
        let payload = AnchorPayload {
            result_ref: "abc".into(),
            analysis_id: "job".into(),
            fake_probability: 0.1,
            label: VerdictLabel::Authentic,
            policy_version: "fusion-v1".into(),
            checksum: "00".into(),
            analyzed_at: Utc::now(),
        };
        let err = client.submit(&payload).await.unwrap_err();
        assert!(err.is_transient());
    }
}
