use frame_keeper_common::frame::RgbFrame;

use super::traits::FrameScorer;

/// Scores a frame by the sum of its blue channel.
pub struct BlueIntensityScorer;

impl FrameScorer for BlueIntensityScorer {
    fn score(&self, frame: &RgbFrame<'_>) -> f64 {
        frame.rgb_pixels().map(|[_, _, b]| b as u64).sum::<u64>() as f64
    }

    fn name(&self) -> &str {
        "blue"
    }
}
