// THEORY:
// The severity scorer summarizes "how damaged does this region look" as a single
// integer in [0, 100]. It combines two cheap, single-frame signals:
//
// 1.  **Edge density**: crumpled panels, cracks and scratches produce many strong
//     local gradients. A 3x3 Sobel operator is run over the interior of the
//     grayscale region; a pixel counts as an edge when its gradient magnitude is
//     above `EDGE_MAGNITUDE_THRESHOLD`. The fraction of interior pixels that are
//     edges is the edge density.
// 2.  **Luminance variance**: dents and broken parts break up the smooth shading of
//     a panel, which raises the variance of the luma values.
//
// Both signals are mapped onto [0, 100] with fixed gains and blended 65/35. The
// scorer is a pure function of the region; it keeps no state between scans.

use crate::core_modules::pixel_grid::PixelGrid;
use serde::Serialize;

pub type SeverityScore = u8;

const SOBEL_X: [f64; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
const SOBEL_Y: [f64; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

const EDGE_MAGNITUDE_THRESHOLD: f64 = 80.0;
const EDGE_DENSITY_GAIN: f64 = 550.0;
const VARIANCE_DIVISOR: f64 = 45.0;
const EDGE_WEIGHT: f64 = 0.65;
const VARIANCE_WEIGHT: f64 = 0.35;

/// The intermediate measurements behind a severity score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeveritySignals {
    pub mean_luma: f64,
    pub luma_variance: f64,
    pub edge_count: usize,
    pub interior_pixels: usize,
    pub edge_density: f64,
    pub edge_score: f64,
    pub variance_score: f64,
}

/// Computes the severity score of a region.
pub fn score(region: &PixelGrid) -> SeverityScore {
    score_with_signals(region).0
}

/// Computes the severity score together with the signals it was derived from.
/// A region with no area or no pixel data scores 0.
pub fn score_with_signals(region: &PixelGrid) -> (SeverityScore, SeveritySignals) {
    if region.is_empty() {
        return (0, SeveritySignals::default());
    }

    let width = region.width() as usize;
    let height = region.height() as usize;
    let luma = grayscale(region);
    let (mean_luma, luma_variance) = mean_and_variance(&luma);
    let (edge_count, interior_pixels) = count_edges(&luma, width, height);

    let edge_density = if interior_pixels == 0 {
        0.0
    } else {
        edge_count as f64 / interior_pixels as f64
    };
    let edge_score = (edge_density * EDGE_DENSITY_GAIN).clamp(0.0, 100.0);
    let variance_score = (luma_variance / VARIANCE_DIVISOR).clamp(0.0, 100.0);
    let blended = (edge_score * EDGE_WEIGHT + variance_score * VARIANCE_WEIGHT).clamp(0.0, 100.0);

    let signals = SeveritySignals {
        mean_luma,
        luma_variance,
        edge_count,
        interior_pixels,
        edge_density,
        edge_score,
        variance_score,
    };
    (blended.round() as SeverityScore, signals)
}

fn grayscale(region: &PixelGrid) -> Vec<f64> {
    region.iter_pixels().map(|pixel| pixel.luminance()).collect()
}

/// Population mean and variance.
fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let count = values.len() as f64;
    if count < 1.0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    (mean, variance)
}

/// Runs the Sobel pair over interior pixels (1 pixel border excluded).
/// Returns `(edge_count, interior_pixel_count)`.
fn count_edges(luma: &[f64], width: usize, height: usize) -> (usize, usize) {
    if width < 3 || height < 3 || luma.len() < width * height {
        return (0, 0);
    }

    let mut edges = 0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut gx = 0.0;
            let mut gy = 0.0;
            for ky in 0..3 {
                let row = (y + ky - 1) * width;
                for kx in 0..3 {
                    let value = luma[row + x + kx - 1];
                    gx += SOBEL_X[ky * 3 + kx] * value;
                    gy += SOBEL_Y[ky * 3 + kx] * value;
                }
            }
            if (gx * gx + gy * gy).sqrt() > EDGE_MAGNITUDE_THRESHOLD {
                edges += 1;
            }
        }
    }
    (edges, (width - 2) * (height - 2))
}
