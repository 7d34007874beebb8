use frame_keeper_common::frame::RgbFrame;

use super::buckets::BucketBreakdown;

/// Maps a frame to a desirability score for Top-K retention.
///
/// Implementations must be deterministic and return a finite value for any
/// well-formed frame; higher means "keep this one".
pub trait FrameScorer: Send + Sync {
    fn score(&self, frame: &RgbFrame<'_>) -> f64;

    /// Score a frame whose colour buckets the caller has already measured.
    fn score_measured(&self, frame: &RgbFrame<'_>, breakdown: &BucketBreakdown) -> f64 {
        let _ = breakdown;
        self.score(frame)
    }

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
