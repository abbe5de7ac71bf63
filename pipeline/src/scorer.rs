use image::Rgba;

use crate::decoder::DecodedFrame;

/// Maximum squared YIQ distance between two 8-bit colours (black vs white).
const MAX_YIQ_DELTA: f64 = 35215.0;

/// Computes a normalized perceptual difference between two rasters.
///
/// Implementations return a value in `[0.0, 1.0]`: the fraction of content
/// that differs. Rasters of different sizes are a contract violation
/// upstream and must be reported, never coerced.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &DecodedFrame, b: &DecodedFrame) -> Result<f64, DimensionMismatch>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("frame {left_index} has dimensions {left:?} but frame {right_index} has {right:?}")]
pub struct DimensionMismatch {
    pub left_index: u32,
    pub left: (u32, u32),
    pub right_index: u32,
    pub right: (u32, u32),
}

/// Pixel-difference scorer.
///
/// Each pixel pair is compared by squared distance in YIQ space, after
/// blending any transparency against white. A pair counts as different when
/// that distance exceeds `35215 * tolerance^2`; the score is the share of
/// differing pairs. The distance is symmetric, so argument order does not
/// matter.
#[derive(Debug, Clone)]
pub struct PixelDiffScorer {
    tolerance: f64,
    max_delta: f64,
}

impl PixelDiffScorer {
    pub fn new(tolerance: f64) -> Self {
        let tolerance = tolerance.clamp(0.0, 1.0);
        Self {
            tolerance,
            max_delta: MAX_YIQ_DELTA * tolerance * tolerance,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn yiq_delta(a: &Rgba<u8>, b: &Rgba<u8>) -> f64 {
        let (r1, g1, b1) = blend_white(a);
        let (r2, g2, b2) = blend_white(b);

        let y = rgb2y(r1, g1, b1) - rgb2y(r2, g2, b2);
        let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
        let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);

        0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q
    }
}

impl Default for PixelDiffScorer {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl SimilarityScorer for PixelDiffScorer {
    fn score(&self, a: &DecodedFrame, b: &DecodedFrame) -> Result<f64, DimensionMismatch> {
        if a.dimensions() != b.dimensions() {
            return Err(DimensionMismatch {
                left_index: a.index,
                left: a.dimensions(),
                right_index: b.index,
                right: b.dimensions(),
            });
        }

        let total = a.pixel_count();
        if total == 0 {
            return Ok(0.0);
        }

        let differing = a
            .pixels
            .pixels()
            .zip(b.pixels.pixels())
            .filter(|(p, q)| p != q && Self::yiq_delta(p, q) > self.max_delta)
            .count();

        Ok(differing as f64 / total as f64)
    }

    fn name(&self) -> &str {
        "pixel-diff"
    }
}

fn blend_white(px: &Rgba<u8>) -> (f64, f64, f64) {
    let [r, g, b, a] = px.0;
    if a == u8::MAX {
        return (r as f64, g as f64, b as f64);
    }
    let alpha = a as f64 / 255.0;
    let blend = |c: u8| 255.0 + (c as f64 - 255.0) * alpha;
    (blend(r), blend(g), blend(b))
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}
