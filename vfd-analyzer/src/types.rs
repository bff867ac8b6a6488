//! Core types and trait definitions for vfd-analyzer
//!
//! Defines the shapes shared by the pipeline stages:
//! - **Media:** decoded frames, frame samples, audio tracks
//! - **Scoring:** the [`ScoreAdapter`] trait every model backend implements
//!
//! A [`FrameSample`] is produced once per job and shared read-only (behind an
//! `Arc`) by the Ensemble Orchestrator and the Forensic Metrics Engine.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Media Types
// ============================================================================

/// One decoded video frame (packed RGB24, row-major)
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position within the FrameSample
    pub index: usize,
    /// Presentation timestamp in the source video
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes
    pub pixels: Vec<u8>,
}

impl Frame {
    /// Whether the pixel buffer matches the declared dimensions
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * 3
    }

    /// Luminance plane (ITU-R BT.601 weights), values in [0,255]
    pub fn luma(&self) -> Vec<f64> {
        self.pixels
            .chunks_exact(3)
            .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
            .collect()
    }
}

/// Ordered frames sampled from one input video
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    pub frames: Vec<Frame>,
    /// Source video duration, if probed
    pub source_duration_secs: Option<f64>,
}

impl FrameSample {
    pub fn new(frames: Vec<Frame>, source_duration_secs: Option<f64>) -> Self {
        Self {
            frames,
            source_duration_secs,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Dimensions of the first frame (all frames share the analysis resolution)
    pub fn dimensions(&self) -> (u32, u32) {
        self.frames
            .first()
            .map(|f| (f.width, f.height))
            .unwrap_or((0, 0))
    }
}

/// Shared handle used across concurrent stages
pub type SharedFrameSample = Arc<FrameSample>;

/// Mono PCM audio extracted from the input
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioTrack {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Container-level facts from probing an input
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaInfo {
    pub duration_secs: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

// ============================================================================
// Model Score Adapter Trait
// ============================================================================

/// Role of a scoring backend in the ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Zero-shot semantic classifier
    Semantic,
    /// Artifact / frequency-domain classifier
    Artifact,
    /// Face detector + localized classifier
    FaceLocalizer,
}

/// Un-normalized backend output
///
/// Backends may report `fake_probability`, `ensemble_score`, or both.
/// `fake_probability` takes precedence when both are present.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawScore {
    #[serde(default)]
    pub fake_probability: Option<f64>,
    #[serde(default)]
    pub ensemble_score: Option<f64>,
    #[serde(default)]
    pub frame_probabilities: Vec<f64>,
    /// Backend-reported failure
    #[serde(default)]
    pub error: Option<String>,
}

impl RawScore {
    /// Canonical probability after applying field precedence
    pub fn canonical_probability(&self) -> Option<f64> {
        self.fake_probability.or(self.ensemble_score)
    }
}

/// Per-adapter failure, absorbed into `ModelScore.error`
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    #[error("no response within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Backend unreachable or refused the connection
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend answered with an explicit error
    #[error("backend error: {0}")]
    Backend(String),

    /// Response could not be interpreted as a score
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AdapterError {
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Timeout { .. } => "ADAPTER_TIMEOUT",
            _ => "ADAPTER_ERROR",
        }
    }
}

/// Thin client around one external scoring backend
///
/// Implementations own protocol translation and must be safe to invoke
/// concurrently for different jobs. Callers never use `call` directly;
/// [`crate::adapters::score`] applies the timeout and normalizes the output
/// into a `ModelScore` that carries errors instead of returning them.
#[async_trait::async_trait]
pub trait ScoreAdapter: Send + Sync {
    /// Model name, unique within the registry
    fn name(&self) -> &str;

    fn kind(&self) -> ModelKind;

    /// Per-call timeout
    fn timeout(&self) -> Duration;

    /// Score a frame batch
    async fn call(&self, sample: &FrameSample) -> Result<RawScore, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_probability_wins_over_ensemble_score() {
        let raw = RawScore {
            fake_probability: Some(0.2),
            ensemble_score: Some(0.9),
            ..Default::default()
        };
        assert_eq!(raw.canonical_probability(), Some(0.2));

        let raw = RawScore {
            ensemble_score: Some(0.9),
            ..Default::default()
        };
        assert_eq!(raw.canonical_probability(), Some(0.9));
    }

    #[test]
    fn test_frame_luma_and_shape() {
        let frame = Frame {
            index: 0,
            timestamp_ms: 0,
            width: 2,
            height: 1,
            pixels: vec![255, 255, 255, 0, 0, 0],
        };
        assert!(frame.is_well_formed());
        let luma = frame.luma();
        assert!((luma[0] - 255.0).abs() < 1e-9);
        assert_eq!(luma[1], 0.0);
    }

    #[test]
    fn test_audio_duration() {
        let track = AudioTrack {
            samples: vec![0.0; 32_000],
            sample_rate: 16_000,
        };
        assert!((track.duration_secs() - 2.0).abs() < 1e-9);
    }
}
