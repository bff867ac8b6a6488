//! Spectral density from frequency-domain energy concentration
//!
//! Each frame's luminance is box-downsampled to a fixed grid, transformed
//! with a separable 2D DFT, and scored by the share of non-DC magnitude that
//! sits above a quarter of the grid's Nyquist radius.

use std::f64::consts::PI;

/// Side of the square grid frames are downsampled to before the DFT
pub const SPECTRAL_GRID: usize = 32;

/// Box-average `luma` down to `n x n`
pub fn downsample(luma: &[f64], width: usize, height: usize, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n * n];
    if width == 0 || height == 0 || luma.len() < width * height {
        return out;
    }

    for v in 0..n {
        let y0 = v * height / n;
        let y1 = ((v + 1) * height / n).max(y0 + 1).min(height);
        for u in 0..n {
            let x0 = u * width / n;
            let x1 = ((u + 1) * width / n).max(x0 + 1).min(width);
            let mut sum = 0.0;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += luma[y * width + x];
                }
            }
            out[v * n + u] = sum / ((y1 - y0) * (x1 - x0)) as f64;
        }
    }
    out
}

/// DFT magnitudes of an `n x n` real grid (row-major, unshifted)
pub fn dft_magnitudes(grid: &[f64], n: usize) -> Vec<f64> {
    let (cos, sin): (Vec<f64>, Vec<f64>) = (0..n)
        .map(|k| {
            let angle = 2.0 * PI * k as f64 / n as f64;
            (angle.cos(), angle.sin())
        })
        .unzip();

    // rows
    let mut rows = vec![(0.0, 0.0); n * n];
    for y in 0..n {
        for u in 0..n {
            let (mut re, mut im) = (0.0, 0.0);
            for x in 0..n {
                let k = (u * x) % n;
                let value = grid[y * n + x];
                re += value * cos[k];
                im -= value * sin[k];
            }
            rows[y * n + u] = (re, im);
        }
    }

    // columns
    let mut magnitudes = vec![0.0; n * n];
    for u in 0..n {
        for v in 0..n {
            let (mut re, mut im) = (0.0, 0.0);
            for y in 0..n {
                let k = (v * y) % n;
                let (r, i) = rows[y * n + u];
                re += r * cos[k] + i * sin[k];
                im += i * cos[k] - r * sin[k];
            }
            magnitudes[v * n + u] = (re * re + im * im).sqrt();
        }
    }
    magnitudes
}

/// Share of non-DC spectral magnitude in the high-frequency band, in [0,1]
pub fn high_frequency_ratio(magnitudes: &[f64], n: usize) -> f64 {
    let cutoff = n as f64 / 4.0;
    let mut high = 0.0;
    let mut total = 0.0;

    for v in 0..n {
        for u in 0..n {
            if u == 0 && v == 0 {
                continue;
            }
            let du = u.min(n - u) as f64;
            let dv = v.min(n - v) as f64;
            let magnitude = magnitudes[v * n + u];
            total += magnitude;
            if (du * du + dv * dv).sqrt() > cutoff {
                high += magnitude;
            }
        }
    }

    // rounding noise on a flat frame is not texture
    if total <= 1e-9 * (magnitudes[0] + 1.0) {
        0.0
    } else {
        (high / total).clamp(0.0, 1.0)
    }
}

/// High-frequency ratio of one frame's luminance
pub fn frame_ratio(luma: &[f64], width: usize, height: usize) -> f64 {
    let grid = downsample(luma, width, height, SPECTRAL_GRID);
    high_frequency_ratio(&dft_magnitudes(&grid, SPECTRAL_GRID), SPECTRAL_GRID)
}

/// Blend of the mean frame ratio and the fused fake probability
pub fn spectral_score(mean_ratio: f64, fake_probability: f64) -> f64 {
    (0.5 * mean_ratio + 0.5 * fake_probability).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_frame_has_no_high_frequency() {
        let luma = vec![100.0; 64 * 64];
        assert_eq!(frame_ratio(&luma, 64, 64), 0.0);
    }

    #[test]
    fn test_fine_stripes_are_high_frequency() {
        // alternating columns put all energy at the horizontal Nyquist bin
        let luma: Vec<f64> = (0..32 * 32)
            .map(|i| if (i % 32) % 2 == 0 { 0.0 } else { 255.0 })
            .collect();
        assert!(frame_ratio(&luma, 32, 32) > 0.9);
    }

    #[test]
    fn test_coarse_gradient_is_low_frequency() {
        let luma: Vec<f64> = (0..64 * 64).map(|i| (i / 64) as f64 * 4.0).collect();
        assert!(frame_ratio(&luma, 64, 64) < 0.5);
    }

    #[test]
    fn test_downsample_averages_blocks() {
        let luma = vec![0.0, 10.0, 20.0, 30.0];
        assert_eq!(downsample(&luma, 2, 2, 1), vec![15.0]);
    }
}
