//! Analysis outputs: fingerprints, model scores, verdicts, forensic metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content fingerprint of one input video
///
/// `digest` is the hex SHA-256 over the normalized byte content and is the
/// Result Cache key. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFingerprint {
    /// Hex-encoded SHA-256 (64 characters)
    pub digest: String,
    /// Raw input size in bytes
    pub byte_length: u64,
    /// Container duration, when the probe could determine it
    pub duration_secs: Option<f64>,
}

impl VideoFingerprint {
    /// Cache key
    pub fn key(&self) -> &str {
        &self.digest
    }

    /// Abbreviated digest for logs
    pub fn short(&self) -> &str {
        &self.digest[..self.digest.len().min(12)]
    }
}

impl fmt::Display for VideoFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.digest)
    }
}

/// Per-adapter error carried inside a [`ModelScore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreError {
    /// `ADAPTER_TIMEOUT` or `ADAPTER_ERROR`
    pub code: String,
    pub message: String,
}

/// Normalized output of one model adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub model: String,
    /// Fake probability in [0,1]; `None` when the adapter failed
    pub fake_probability: Option<f64>,
    /// Optional per-frame probabilities, aligned with the FrameSample order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frame_probabilities: Vec<f64>,
    pub latency_ms: u64,
    pub error: Option<ScoreError>,
}

impl ModelScore {
    pub fn success(model: impl Into<String>, fake_probability: f64, latency_ms: u64) -> Self {
        Self {
            model: model.into(),
            fake_probability: Some(fake_probability.clamp(0.0, 1.0)),
            frame_probabilities: Vec::new(),
            latency_ms,
            error: None,
        }
    }

    pub fn failure(
        model: impl Into<String>,
        code: &str,
        message: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            model: model.into(),
            fake_probability: None,
            frame_probabilities: Vec::new(),
            latency_ms,
            error: Some(ScoreError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn with_frame_probabilities(mut self, probs: Vec<f64>) -> Self {
        self.frame_probabilities = probs.into_iter().map(|p| p.clamp(0.0, 1.0)).collect();
        self
    }

    /// Usable for fusion: no error and a finite probability
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.fake_probability.map(f64::is_finite).unwrap_or(false)
    }
}

/// Three-way verdict label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictLabel {
    Authentic,
    /// Fused probability inside the suspicious band with low confidence
    Suspicious,
    Fake,
}

/// How the per-model scores were combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    /// Arithmetic mean, every model weighted equally
    EqualMean,
    /// Mean weighted by the configured weight table
    WeightedMean,
    /// Each model weighted by its own decisiveness (experimental)
    ConfidenceWeighted,
}

impl FusionMethod {
    pub fn is_experimental(self) -> bool {
        matches!(self, FusionMethod::ConfidenceWeighted)
    }
}

/// Fused ensemble verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleVerdict {
    /// Canonical fused fake probability in [0,1]
    pub fake_probability: f64,
    /// Reported confidence in [0,1] after calibration and ceilings
    pub confidence: f64,
    pub label: VerdictLabel,
    /// Models whose scores were fused (sorted)
    pub contributing_models: Vec<String>,
    /// Requested models that produced no usable score (sorted)
    pub failed_models: Vec<String>,
    pub fusion_method: FusionMethod,
    /// Fewer models contributed than were requested
    pub degraded: bool,
    /// Only the semantic zero-shot scorer contributed
    pub semantic_only: bool,
    /// Fusion method is not deterministic-by-policy production logic
    pub experimental: bool,
    /// Version stamp of the fusion policy that produced this verdict
    pub policy_version: String,
}

/// How the vocal-authenticity score was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocalBasis {
    /// An extracted audio track was analyzed
    AudioTrack,
    /// No audio analyzed; derived from the video score alone
    VideoOnly,
}

/// Source of the temporal-consistency score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalBasis {
    /// Variance of per-frame model probabilities
    FrameConfidence,
    /// Models returned no per-frame output; frame-to-frame luminance change
    FrameDifference,
    /// Too few frames to measure change; derived from the fused video score
    VideoOnly,
}

/// One sector of the spatial entropy heatmap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapSector {
    /// `[row, col]`
    pub sector: [u8; 2],
    /// Intensity in [0,1]
    pub intensity: f64,
    pub detail: String,
}

/// Auxiliary interpretability metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicMetrics {
    pub spatial_artifacts: f64,
    pub temporal_consistency: f64,
    pub temporal_basis: TemporalBasis,
    pub spectral_density: f64,
    pub vocal_authenticity: f64,
    /// False means `vocal_authenticity` is video-derived, not audio-based
    pub audio_analyzed: bool,
    pub vocal_basis: VocalBasis,
    /// Row-major, always `HEATMAP_ROWS * HEATMAP_COLS` sectors
    pub spatial_entropy_heatmap: Vec<HeatmapSector>,
}

/// Processing metadata attached to a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub requested_models: Vec<String>,
    pub frames_analyzed: usize,
    pub frame_width: u32,
    pub frame_height: u32,
    pub audio_track_present: bool,
    pub processing_ms: u64,
    pub analyzed_at: DateTime<Utc>,
    pub service_version: String,
}

/// Terminal, cacheable analysis aggregate
///
/// Keyed by `fingerprint.digest`; immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub fingerprint: VideoFingerprint,
    pub verdict: EnsembleVerdict,
    pub forensics: ForensicMetrics,
    /// Raw per-model scores, sorted by model name
    pub model_scores: Vec<ModelScore>,
    pub metadata: ProcessingMetadata,
}

impl AnalysisResult {
    pub fn cache_key(&self) -> &str {
        self.fingerprint.key()
    }

    /// Content equivalence: same fingerprint, verdict and metrics
    ///
    /// Processing metadata (timings, timestamps) is ignored.
    pub fn is_equivalent(&self, other: &AnalysisResult) -> bool {
        self.fingerprint.digest == other.fingerprint.digest
            && self.verdict == other.verdict
            && self.forensics == other.forensics
    }

    /// Whether this result was computed for a model set other than `requested`
    ///
    /// Results are cached per fingerprint, so a job asking for different
    /// models is served the ensemble of the first analysis.
    pub fn model_set_differs(&self, requested: &[String]) -> bool {
        let normalized = |models: &[String]| {
            let mut models = models.to_vec();
            models.sort();
            models.dedup();
            models
        };
        normalized(&self.metadata.requested_models) != normalized(requested)
    }
}
