//! Spatial entropy heatmap
//!
//! Every frame is cut into the same `HEATMAP_ROWS x HEATMAP_COLS` grid; local
//! luminance variance is averaged per sector over all sampled frames. A
//! sector's intensity is its deviation from the median sector, scaled by how
//! strongly the ensemble believes the video is synthetic.

use super::spatial::variance;
use crate::models::HeatmapSector;

pub const HEATMAP_ROWS: usize = 8;
pub const HEATMAP_COLS: usize = 8;
pub const HEATMAP_SECTORS: usize = HEATMAP_ROWS * HEATMAP_COLS;

const CRITICAL_THRESHOLD: f64 = 0.8;
const MINOR_THRESHOLD: f64 = 0.4;

/// Luminance variance of each sector of one frame (row-major)
pub fn sector_variances(luma: &[f64], width: usize, height: usize) -> [f64; HEATMAP_SECTORS] {
    let mut out = [0.0; HEATMAP_SECTORS];
    if width < HEATMAP_COLS || height < HEATMAP_ROWS || luma.len() < width * height {
        return out;
    }

    for row in 0..HEATMAP_ROWS {
        let y0 = row * height / HEATMAP_ROWS;
        let y1 = (row + 1) * height / HEATMAP_ROWS;
        for col in 0..HEATMAP_COLS {
            let x0 = col * width / HEATMAP_COLS;
            let x1 = (col + 1) * width / HEATMAP_COLS;
            let pixels: Vec<f64> = (y0..y1)
                .flat_map(|y| luma[y * width + x0..y * width + x1].iter().copied())
                .collect();
            out[row * HEATMAP_COLS + col] = variance(&pixels);
        }
    }
    out
}

/// Build the heatmap from per-sector variances averaged over the sample
///
/// `mean_variances` is `None` when no frame was analyzed; every sector is
/// then reported at zero intensity with that fact in its detail.
pub fn build(
    mean_variances: Option<&[f64; HEATMAP_SECTORS]>,
    fake_probability: f64,
) -> Vec<HeatmapSector> {
    let Some(variances) = mean_variances else {
        return (0..HEATMAP_SECTORS)
            .map(|i| HeatmapSector {
                sector: sector_coords(i),
                intensity: 0.0,
                detail: "No frame data available; sector not analyzed.".to_string(),
            })
            .collect();
    };

    let median = median(variances);
    let scale = 0.25 + 0.75 * fake_probability.clamp(0.0, 1.0);

    variances
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let deviation = ((v - median).abs() / (median + 1.0)).min(1.0);
            let intensity = (deviation * scale).clamp(0.0, 1.0);
            let [row, col] = sector_coords(i);
            HeatmapSector {
                sector: [row, col],
                intensity,
                detail: detail(row, col, intensity, v, median),
            }
        })
        .collect()
}

fn sector_coords(i: usize) -> [u8; 2] {
    [(i / HEATMAP_COLS) as u8, (i % HEATMAP_COLS) as u8]
}

fn median(values: &[f64; HEATMAP_SECTORS]) -> f64 {
    let mut sorted = *values;
    sorted.sort_by(|a, b| a.total_cmp(b));
    (sorted[HEATMAP_SECTORS / 2 - 1] + sorted[HEATMAP_SECTORS / 2]) / 2.0
}

fn detail(row: u8, col: u8, intensity: f64, variance: f64, median: f64) -> String {
    if intensity > CRITICAL_THRESHOLD {
        format!(
            "Strong local anomaly in sector [{},{}]: variance {:.1} vs median {:.1}, consistent with synthesis artifacts.",
            row, col, variance, median
        )
    } else if intensity > MINOR_THRESHOLD {
        format!(
            "Minor spatial inconsistency in sector [{},{}]: variance {:.1} vs median {:.1}.",
            row, col, variance, median
        )
    } else {
        format!(
            "Nominal variance in sector [{},{}] ({:.1}); no anomaly indicators.",
            row, col, variance
        )
    }
}
