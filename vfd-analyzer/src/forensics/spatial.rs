//! Spatial artifact score from edge/gradient irregularities

/// Laplacian variance at which a frame counts as fully artifact-laden
const LAPLACIAN_VARIANCE_SCALE: f64 = 1000.0;

/// Variance of the 4-neighbour Laplacian over the frame interior
///
/// Returns 0.0 for frames smaller than 3x3.
pub fn laplacian_variance(luma: &[f64], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 || luma.len() < width * height {
        return 0.0;
    }

    let mut responses = Vec::with_capacity((width - 2) * (height - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let i = y * width + x;
            let response =
                luma[i - width] + luma[i + width] + luma[i - 1] + luma[i + 1] - 4.0 * luma[i];
            responses.push(response);
        }
    }
    variance(&responses)
}

/// Per-frame artifact level in [0,1]
pub fn artifact_level(laplacian_variance: f64) -> f64 {
    (laplacian_variance / LAPLACIAN_VARIANCE_SCALE).min(1.0)
}

/// Blend of the mean frame artifact level and the fused fake probability
pub fn spatial_score(mean_artifact_level: f64, fake_probability: f64) -> f64 {
    (0.6 * mean_artifact_level + 0.4 * fake_probability).clamp(0.0, 1.0)
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance
pub(crate) fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_frame_has_no_artifacts() {
        let luma = vec![128.0; 16 * 16];
        assert_eq!(laplacian_variance(&luma, 16, 16), 0.0);
    }

    #[test]
    fn test_checkerboard_saturates() {
        let luma: Vec<f64> = (0..16 * 16)
            .map(|i| if (i % 16 + i / 16) % 2 == 0 { 0.0 } else { 255.0 })
            .collect();
        let var = laplacian_variance(&luma, 16, 16);
        assert!(var > LAPLACIAN_VARIANCE_SCALE);
        assert_eq!(artifact_level(var), 1.0);
    }

    #[test]
    fn test_spatial_score_blend() {
        assert!((spatial_score(0.5, 1.0) - 0.7).abs() < 1e-12);
        assert_eq!(spatial_score(0.0, 0.0), 0.0);
    }
}
