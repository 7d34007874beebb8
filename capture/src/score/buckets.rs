use frame_keeper_common::frame::RgbFrame;
use frame_keeper_common::record::{BucketShares, SceneClass};

use super::traits::FrameScorer;

/// Percentage of pixels falling into each colour bucket.
///
/// Buckets are tested in order and the first match wins, so a pixel is
/// counted at most once. Pixels matching none are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BucketBreakdown {
    pub blue: f64,
    pub green: f64,
    pub brown: f64,
    pub black: f64,
    pub yellow: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Blue,
    Green,
    Brown,
    Black,
    Yellow,
}

fn bucket_of(r: u8, g: u8, b: u8) -> Option<Bucket> {
    if b > 100 && b < 140 && g > 50 && r < 140 {
        Some(Bucket::Blue)
    } else if g > 35 && g < 85 && r < 85 {
        Some(Bucket::Green)
    } else if r > 10 && r < 20 {
        Some(Bucket::Brown)
    } else if r < 50 && g < 50 && b < 50 {
        Some(Bucket::Black)
    } else if r > 20 && r < 30 {
        Some(Bucket::Yellow)
    } else {
        None
    }
}

impl BucketBreakdown {
    pub fn measure(frame: &RgbFrame<'_>) -> Self {
        let mut counts = [0u64; 5];
        for [r, g, b] in frame.rgb_pixels() {
            if let Some(bucket) = bucket_of(r, g, b) {
                counts[bucket as usize] += 1;
            }
        }

        let total = frame.pixel_count() as f64;
        let pct = |n: u64| n as f64 / total * 100.0;
        Self {
            blue: pct(counts[Bucket::Blue as usize]),
            green: pct(counts[Bucket::Green as usize]),
            brown: pct(counts[Bucket::Brown as usize]),
            black: pct(counts[Bucket::Black as usize]),
            yellow: pct(counts[Bucket::Yellow as usize]),
        }
    }

    pub fn day_score(&self) -> f64 {
        self.blue + self.green + self.brown
    }

    pub fn night_score(&self) -> f64 {
        self.black + self.yellow
    }

    pub fn is_day(&self) -> bool {
        self.day_score() > self.night_score()
    }

    pub fn class(&self) -> SceneClass {
        if self.is_day() {
            SceneClass::Day
        } else {
            SceneClass::Night
        }
    }

    /// Score under the frame's own classification.
    pub fn score(&self) -> f64 {
        if self.is_day() {
            self.day_score()
        } else {
            self.night_score()
        }
    }

    pub fn shares(&self) -> BucketShares {
        BucketShares {
            blue: self.blue as f32,
            green: self.green as f32,
            brown: self.brown as f32,
            black: self.black as f32,
            yellow: self.yellow as f32,
        }
    }
}

/// Scores day frames by their blue/green/brown share and night frames by
/// their black/yellow share.
pub struct BucketScorer;

impl FrameScorer for BucketScorer {
    fn score(&self, frame: &RgbFrame<'_>) -> f64 {
        BucketBreakdown::measure(frame).score()
    }

    fn score_measured(&self, _frame: &RgbFrame<'_>, breakdown: &BucketBreakdown) -> f64 {
        breakdown.score()
    }

    fn name(&self) -> &str {
        "buckets"
    }
}
