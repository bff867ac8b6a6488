//! HTTP score adapter
//!
//! Sends the frame batch as JSON and reads back
//! `{fake_probability?, ensemble_score?, frame_probabilities?, error?}`.
//!
//! Request body:
//! ```json
//! { "model": "artifact",
//!   "frames": [ { "index": 0, "timestamp_ms": 0, "width": 224, "height": 224,
//!                 "encoding": "rgb24", "data": "<base64>" } ] }
//! ```

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::types::{AdapterError, FrameSample, ModelKind, RawScore, ScoreAdapter};

const USER_AGENT: &str = concat!("vfd-analyzer/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct ScoreRequest<'a> {
    model: &'a str,
    frames: Vec<FramePayload>,
}

#[derive(Serialize)]
struct FramePayload {
    index: usize,
    timestamp_ms: u64,
    width: u32,
    height: u32,
    encoding: &'static str,
    data: String,
}

/// Remote inference backend reached over HTTP
pub struct HttpScoreAdapter {
    name: String,
    kind: ModelKind,
    endpoint: String,
    timeout: Duration,
    http_client: Client,
}

impl HttpScoreAdapter {
    pub fn new(
        name: &str,
        kind: ModelKind,
        endpoint: &str,
        timeout: Duration,
    ) -> vfd_common::Result<Self> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                vfd_common::Error::Config(format!("HTTP client for adapter '{}': {}", name, e))
            })?;

        Ok(Self {
            name: name.to_string(),
            kind,
            endpoint: endpoint.to_string(),
            timeout,
            http_client,
        })
    }

    fn request_body<'a>(&'a self, sample: &FrameSample) -> ScoreRequest<'a> {
        ScoreRequest {
            model: &self.name,
            frames: sample
                .frames
                .iter()
                .map(|f| FramePayload {
                    index: f.index,
                    timestamp_ms: f.timestamp_ms,
                    width: f.width,
                    height: f.height,
                    encoding: "rgb24",
                    data: BASE64.encode(&f.pixels),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ScoreAdapter for HttpScoreAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call(&self, sample: &FrameSample) -> Result<RawScore, AdapterError> {
        debug!(model = %self.name, frames = sample.len(), "Sending frame batch");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&self.request_body(sample))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AdapterError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(if status.is_server_error() {
                AdapterError::Unavailable(format!("HTTP {}: {}", status, snippet))
            } else {
                AdapterError::Backend(format!("HTTP {}: {}", status, snippet))
            });
        }

        response
            .json::<RawScore>()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Frame;

    #[test]
    fn test_request_body_encodes_frames() {
        let adapter = HttpScoreAdapter::new(
            "artifact",
            ModelKind::Artifact,
            "http://127.0.0.1:1/score",
            Duration::from_secs(1),
        )
        .unwrap();
        let sample = FrameSample::new(
            vec![Frame {
                index: 0,
                timestamp_ms: 40,
                width: 1,
                height: 1,
                pixels: vec![1, 2, 3],
            }],
            Some(1.0),
        );

        let body = serde_json::to_value(adapter.request_body(&sample)).unwrap();
        assert_eq!(body["model"], "artifact");
        assert_eq!(body["frames"][0]["timestamp_ms"], 40);
        assert_eq!(body["frames"][0]["data"], "AQID");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let adapter = HttpScoreAdapter::new(
            "artifact",
            ModelKind::Artifact,
            "http://127.0.0.1:1/score",
            Duration::from_secs(2),
        )
        .unwrap();
        let err = adapter
            .call(&FrameSample::new(Vec::new(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(_) | AdapterError::Timeout { .. }));
    }
}
