use frame_keeper_common::frame::RgbFrame;

use super::traits::FrameScorer;

/// Focus measure: variance of the 4-neighbour Laplacian over the luma plane.
///
/// Frames narrower or shorter than 3 pixels have no interior and score 0.
pub struct SharpnessScorer;

impl SharpnessScorer {
    fn laplacian_variance(luma: &[f64], width: usize, height: usize) -> f64 {
        if width < 3 || height < 3 {
            return 0.0;
        }

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let at = |xx: usize, yy: usize| luma[yy * width + xx];
                let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1)
                    - 4.0 * at(x, y);
                sum += lap;
                sum_sq += lap * lap;
            }
        }

        let n = ((width - 2) * (height - 2)) as f64;
        let mean = sum / n;
        (sum_sq / n - mean * mean).max(0.0)
    }
}

impl FrameScorer for SharpnessScorer {
    fn score(&self, frame: &RgbFrame<'_>) -> f64 {
        let luma = frame.luma();
        Self::laplacian_variance(&luma, frame.width() as usize, frame.height() as usize)
    }

    fn name(&self) -> &str {
        "sharpness"
    }
}
