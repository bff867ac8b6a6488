//! Temporal consistency
//!
//! Preferred source is the spread of per-frame model probabilities. When no
//! model returned per-frame output the frame-to-frame luminance change is
//! used instead, and the basis is recorded on the metrics.

use super::spatial::{mean, variance};

/// Consistency from a per-frame series: `1 - 2 * std`
///
/// Fewer than two points cannot show inconsistency and score 1.0.
pub fn consistency_from_series(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 1.0;
    }
    (1.0 - 2.0 * variance(series).sqrt()).clamp(0.0, 1.0)
}

/// Fallback when no frame series is long enough to measure; stays below 1.0
pub fn video_only_consistency(fake_probability: f64) -> f64 {
    (0.9 - 0.6 * fake_probability).clamp(0.2, 0.9)
}

/// Element-wise mean of equally long per-frame probability vectors
///
/// Returns `None` when no vector is available.
pub fn average_frame_probabilities(per_model: &[&[f64]]) -> Option<Vec<f64>> {
    let len = per_model.iter().find(|p| !p.is_empty())?.len();
    let aligned: Vec<&[f64]> = per_model
        .iter()
        .copied()
        .filter(|p| p.len() == len)
        .collect();

    Some(
        (0..len)
            .map(|i| aligned.iter().map(|p| p[i]).sum::<f64>() / aligned.len() as f64)
            .collect(),
    )
}

/// Mean absolute luminance change between consecutive frames, in [0,1]
pub fn frame_differences(lumas: &[Vec<f64>]) -> Vec<f64> {
    lumas
        .windows(2)
        .map(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            let n = a.len().min(b.len());
            if n == 0 {
                return 0.0;
            }
            let diffs: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).collect();
            mean(&diffs) / 255.0
        })
        .collect()
}
