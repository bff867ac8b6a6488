//! Model Score Adapters
//!
//! Each external scoring backend sits behind the [`ScoreAdapter`] trait.
//! [`score`] is the only way the pipeline calls an adapter: it applies the
//! adapter's timeout and turns every failure into a `ModelScore` with its
//! `error` set, so a dead backend degrades the ensemble instead of failing it.
//!
//! - **http_adapter** - JSON-over-HTTP client for remote inference services

pub mod http_adapter;

pub use http_adapter::HttpScoreAdapter;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::AnalyzerConfig;
use crate::models::ModelScore;
use crate::types::{AdapterError, FrameSample, ModelKind, RawScore, ScoreAdapter};

/// Invoke one adapter and normalize its output
///
/// Never fails: timeouts, transport errors, backend errors and malformed
/// responses all come back as a `ModelScore` carrying `error`.
pub async fn score(adapter: &dyn ScoreAdapter, sample: &FrameSample) -> ModelScore {
    let name = adapter.name().to_string();
    let timeout = adapter.timeout();
    let started = Instant::now();

    let outcome = match tokio::time::timeout(timeout, adapter.call(sample)).await {
        Ok(result) => result.and_then(|raw| normalize(raw, sample.len())),
        Err(_) => Err(AdapterError::Timeout {
            timeout_ms: duration_ms(timeout),
        }),
    };
    let latency_ms = duration_ms(started.elapsed());

    match outcome {
        Ok((probability, frame_probabilities)) => {
            debug!(model = %name, probability, latency_ms, "Adapter scored sample");
            ModelScore::success(name, probability, latency_ms)
                .with_frame_probabilities(frame_probabilities)
        }
        Err(e) => {
            warn!(model = %name, error = %e, latency_ms, "Adapter failed, excluded from fusion");
            ModelScore::failure(name, e.code(), e.to_string(), latency_ms)
        }
    }
}

/// Apply field precedence and range checks to a backend response
fn normalize(raw: RawScore, frame_count: usize) -> Result<(f64, Vec<f64>), AdapterError> {
    if let Some(message) = raw.error.as_deref().filter(|m| !m.trim().is_empty()) {
        return Err(AdapterError::Backend(message.to_string()));
    }

    let probability = raw.canonical_probability().ok_or_else(|| {
        AdapterError::InvalidResponse("neither fake_probability nor ensemble_score present".into())
    })?;
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        return Err(AdapterError::InvalidResponse(format!(
            "probability out of range: {}",
            probability
        )));
    }

    // per-frame output is optional; keep it only when it lines up with the sample
    let frames = if raw.frame_probabilities.len() == frame_count
        && raw.frame_probabilities.iter().all(|p| p.is_finite())
    {
        raw.frame_probabilities
    } else {
        if !raw.frame_probabilities.is_empty() {
            debug!(
                expected = frame_count,
                got = raw.frame_probabilities.len(),
                "Ignoring misaligned per-frame probabilities"
            );
        }
        Vec::new()
    };

    Ok((probability, frames))
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// Named set of available adapters
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn ScoreAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP adapters for every enabled adapter with an endpoint
    pub fn from_config(config: &AnalyzerConfig) -> vfd_common::Result<Self> {
        let mut registry = Self::new();
        for adapter in &config.adapters {
            match (&adapter.endpoint, adapter.enabled) {
                (Some(endpoint), true) => {
                    let client = HttpScoreAdapter::new(
                        &adapter.name,
                        adapter.kind,
                        endpoint,
                        Duration::from_millis(adapter.timeout_ms),
                    )?;
                    info!(model = %adapter.name, endpoint = %endpoint, "Registered score adapter");
                    registry.register(Arc::new(client));
                }
                (None, true) => {
                    warn!(model = %adapter.name, "Adapter has no endpoint configured, skipping");
                }
                (_, false) => debug!(model = %adapter.name, "Adapter disabled"),
            }
        }
        Ok(registry)
    }

    /// Add (or replace) an adapter under its own name
    pub fn register(&mut self, adapter: Arc<dyn ScoreAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ScoreAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Registered model names (sorted)
    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn kinds(&self) -> BTreeMap<String, ModelKind> {
        self.adapters
            .iter()
            .map(|(name, adapter)| (name.clone(), adapter.kind()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Resolve a requested model set (empty = every registered model)
    ///
    /// Returns the sorted, de-duplicated model names or the unknown ones.
    pub fn resolve(&self, requested: &[String]) -> Result<Vec<String>, Vec<String>> {
        if requested.is_empty() {
            return Ok(self.names());
        }

        let mut names: Vec<String> = requested.iter().map(|m| m.trim().to_string()).collect();
        names.sort();
        names.dedup();

        let unknown: Vec<String> = names
            .iter()
            .filter(|n| !self.adapters.contains_key(n.as_str()))
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(names)
        } else {
            Err(unknown)
        }
    }
}
