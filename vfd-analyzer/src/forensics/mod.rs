//! Forensic Metrics Engine
//!
//! Derives interpretability metrics from the same FrameSample the ensemble
//! scored. Work is split in two so the expensive part overlaps inference:
//!
//! 1. [`FrameAnalysis::from_sample`] - frame-only measurements (Laplacian,
//!    spectrum, sector variance, frame differences); runs while adapters
//!    are still scoring
//! 2. [`derive`] - blends those measurements with the fused verdict, the
//!    per-frame model output and the optional audio analysis
//!
//! Every value comes from measured data. Missing inputs change the recorded
//! basis (`temporal_basis`, `vocal_basis`, `audio_analyzed`) rather than
//! being filled in.

pub mod audio;
pub mod heatmap;
pub mod spatial;
pub mod spectral;
pub mod temporal;

pub use audio::AudioAnalysis;
pub use heatmap::{HEATMAP_COLS, HEATMAP_ROWS, HEATMAP_SECTORS};

use crate::models::{EnsembleVerdict, ForensicMetrics, ModelScore, TemporalBasis};
use crate::types::FrameSample;

/// Frame-only measurements, independent of any model output
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub frames_analyzed: usize,
    /// Mean per-frame artifact level in [0,1]
    pub mean_artifact_level: f64,
    /// Mean high-frequency energy ratio in [0,1]
    pub mean_spectral_ratio: f64,
    /// Per-sector variance averaged over frames; `None` without frames
    pub sector_variances: Option<[f64; HEATMAP_SECTORS]>,
    /// Mean luminance change between consecutive frames
    pub frame_differences: Vec<f64>,
}

impl FrameAnalysis {
    /// Measure every well-formed frame in the sample (CPU bound)
    pub fn from_sample(sample: &FrameSample) -> Self {
        let frames: Vec<_> = sample.frames.iter().filter(|f| f.is_well_formed()).collect();
        if frames.is_empty() {
            return Self {
                frames_analyzed: 0,
                mean_artifact_level: 0.0,
                mean_spectral_ratio: 0.0,
                sector_variances: None,
                frame_differences: Vec::new(),
            };
        }

        let lumas: Vec<Vec<f64>> = frames.iter().map(|f| f.luma()).collect();
        let mut artifact_levels = Vec::with_capacity(frames.len());
        let mut spectral_ratios = Vec::with_capacity(frames.len());
        let mut sector_sums = [0.0; HEATMAP_SECTORS];

        for (frame, luma) in frames.iter().zip(&lumas) {
            let (w, h) = (frame.width as usize, frame.height as usize);
            artifact_levels.push(spatial::artifact_level(spatial::laplacian_variance(luma, w, h)));
            spectral_ratios.push(spectral::frame_ratio(luma, w, h));
            for (sum, v) in sector_sums
                .iter_mut()
                .zip(heatmap::sector_variances(luma, w, h))
            {
                *sum += v;
            }
        }

        let n = frames.len() as f64;
        Self {
            frames_analyzed: frames.len(),
            mean_artifact_level: spatial::mean(&artifact_levels),
            mean_spectral_ratio: spatial::mean(&spectral_ratios),
            sector_variances: Some(sector_sums.map(|s| s / n)),
            frame_differences: temporal::frame_differences(&lumas),
        }
    }
}

/// Blend frame measurements with model output into the final metrics
pub fn derive(
    frames: &FrameAnalysis,
    verdict: &EnsembleVerdict,
    scores: &[ModelScore],
    audio: Option<&AudioAnalysis>,
) -> ForensicMetrics {
    let p = verdict.fake_probability;

    let per_model: Vec<&[f64]> = scores
        .iter()
        .filter(|s| s.is_success() && !s.frame_probabilities.is_empty())
        .map(|s| s.frame_probabilities.as_slice())
        .collect();
    // a spread needs at least two points
    let model_series =
        temporal::average_frame_probabilities(&per_model).filter(|series| series.len() >= 2);
    let (temporal_consistency, temporal_basis) = match model_series {
        Some(series) => (
            temporal::consistency_from_series(&series),
            TemporalBasis::FrameConfidence,
        ),
        None if frames.frame_differences.len() >= 2 => (
            temporal::consistency_from_series(&frames.frame_differences),
            TemporalBasis::FrameDifference,
        ),
        None => (temporal::video_only_consistency(p), TemporalBasis::VideoOnly),
    };

    let (vocal_authenticity, audio_analyzed, vocal_basis) = audio::vocal_authenticity(audio, p);

    ForensicMetrics {
        spatial_artifacts: spatial::spatial_score(frames.mean_artifact_level, p),
        temporal_consistency,
        temporal_basis,
        spectral_density: spectral::spectral_score(frames.mean_spectral_ratio, p),
        vocal_authenticity,
        audio_analyzed,
        vocal_basis,
        spatial_entropy_heatmap: heatmap::build(frames.sector_variances.as_ref(), p),
    }
}
