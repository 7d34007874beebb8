pub mod blue;
pub mod buckets;
pub mod sharpness;
pub mod traits;

use frame_keeper_common::config::ScoringMetric;

use blue::BlueIntensityScorer;
use buckets::BucketScorer;
use sharpness::SharpnessScorer;
use traits::FrameScorer;

/// Build the scorer selected in `[scoring]`.
pub fn scorer_for(metric: ScoringMetric) -> Box<dyn FrameScorer> {
    match metric {
        ScoringMetric::Buckets => Box::new(BucketScorer),
        ScoringMetric::Blue => Box::new(BlueIntensityScorer),
        ScoringMetric::Sharpness => Box::new(SharpnessScorer),
    }
}
