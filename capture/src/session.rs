use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use frame_keeper_common::config::SessionConfig;
use frame_keeper_common::frame::Frame;
use frame_keeper_common::record::{BucketShares, FrameRecord, SceneClass};
use frame_keeper_common::selector::{
    Offer, ScoredItem, SelectorError, SelectorStats, SortOrder, TopKSelector,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::score::buckets::BucketBreakdown;
use crate::score::traits::FrameScorer;

/// A frame competing for a place in one of the selectors.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub frame: Frame,
    /// Position of the frame within the session.
    pub frame_id: u64,
    pub class: SceneClass,
    pub buckets: BucketShares,
}

impl Candidate {
    /// Record for this candidate, saved under `name` (empty when not saved).
    pub fn record(&self, score: f64, name: String) -> FrameRecord {
        FrameRecord {
            frame_id: self.frame_id,
            captured_at_ms: self.frame.captured_at_ms(),
            class: self.class,
            score,
            buckets: self.buckets,
            name,
        }
    }
}

/// What happened to one processed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    Retained {
        class: SceneClass,
        score: f64,
        /// Session frame id of the frame pushed out to make room.
        evicted: Option<u64>,
    },
    Discarded { class: SceneClass, score: f64 },
    /// The scorer produced NaN or an infinity; the frame was dropped.
    InvalidScore { class: SceneClass, score: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    SourceEnded,
    /// The source stopped with an error.
    SourceFailed,
    Deadline,
    Interrupted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub frames: u64,
    pub day: u64,
    pub night: u64,
    pub invalid_scores: u64,
}

/// The retained frames of one selector, best first.
#[derive(Debug)]
pub struct RetainedGroup {
    pub class: SceneClass,
    pub stats: SelectorStats,
    pub frames: Vec<ScoredItem<Candidate>>,
}

#[derive(Debug)]
pub struct SessionReport {
    pub scorer: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub source_error: Option<String>,
    pub counters: SessionCounters,
    pub groups: Vec<RetainedGroup>,
    /// Every processed frame, when enabled. Names are empty.
    pub all_frames: Vec<FrameRecord>,
}

impl SessionReport {
    /// Note a source error. A session that ended because its source went
    /// away is reported as failed; a deadline or interrupt keeps its reason.
    pub fn source_failed(&mut self, error: String) {
        if self.end_reason == EndReason::SourceEnded {
            self.end_reason = EndReason::SourceFailed;
        }
        self.source_error = Some(error);
    }
}

/// Owns the selectors for one capture session and is their only mutator.
///
/// With day/night splitting each frame is classified from its colour buckets
/// and offered only to the selector for its class. Without it every frame
/// competes in a single unclassified selector.
pub struct CaptureSession {
    scorer: Box<dyn FrameScorer>,
    day: TopKSelector<Candidate>,
    night: Option<TopKSelector<Candidate>>,
    counters: SessionCounters,
    log_all_frames: bool,
    all_frames: Vec<FrameRecord>,
    started_at: DateTime<Utc>,
    end_reason: EndReason,
}

impl CaptureSession {
    pub fn new(
        scorer: Box<dyn FrameScorer>,
        config: &SessionConfig,
        log_all_frames: bool,
    ) -> Result<Self, SelectorError> {
        let day = TopKSelector::try_new(config.keep, config.tie_break)?;
        let night = if config.split_day_night {
            Some(TopKSelector::try_new(config.keep, config.tie_break)?)
        } else {
            None
        };
        Ok(Self {
            scorer,
            day,
            night,
            counters: SessionCounters::default(),
            log_all_frames,
            all_frames: Vec::new(),
            started_at: Utc::now(),
            end_reason: EndReason::SourceEnded,
        })
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Score one frame and offer it to the selector for its class.
    pub fn process_frame(&mut self, frame: Frame) -> FrameOutcome {
        let frame_id = self.counters.frames;
        self.counters.frames += 1;

        let (breakdown, score) = {
            let rgb = frame.to_rgb();
            let breakdown = BucketBreakdown::measure(&rgb);
            let score = self.scorer.score_measured(&rgb, &breakdown);
            (breakdown, score)
        };
        let class = if self.night.is_some() {
            breakdown.class()
        } else {
            SceneClass::Unclassified
        };
        match class {
            SceneClass::Day => self.counters.day += 1,
            SceneClass::Night => self.counters.night += 1,
            SceneClass::Unclassified => {}
        }

        let candidate = Candidate {
            frame,
            frame_id,
            class,
            buckets: breakdown.shares(),
        };
        if self.log_all_frames {
            self.all_frames.push(candidate.record(score, String::new()));
        }

        let selector = match (class, self.night.as_mut()) {
            (SceneClass::Night, Some(night)) => night,
            _ => &mut self.day,
        };

        match selector.offer(candidate, score) {
            Ok(Offer::Retained { evicted }) => FrameOutcome::Retained {
                class,
                score,
                evicted: evicted.map(|e| e.item.frame_id),
            },
            Ok(Offer::Discarded(_)) => FrameOutcome::Discarded { class, score },
            Err(_) => {
                self.counters.invalid_scores += 1;
                FrameOutcome::InvalidScore { class, score }
            }
        }
    }

    /// Pull frames from `rx` until the source ends, `deadline` elapses or
    /// `shutdown` resolves.
    pub async fn run<S>(
        &mut self,
        rx: &mut mpsc::Receiver<Frame>,
        deadline: Option<Duration>,
        shutdown: S,
    ) -> EndReason
    where
        S: Future<Output = ()>,
    {
        let timer = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);
        tokio::pin!(shutdown);

        let reason = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break EndReason::Interrupted,
                _ = &mut timer => break EndReason::Deadline,
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        match self.process_frame(frame) {
                            FrameOutcome::Retained { class, score, evicted } => {
                                debug!(class = class.label(), score, ?evicted, "frame retained");
                            }
                            FrameOutcome::Discarded { class, score } => {
                                trace!(class = class.label(), score, "frame discarded");
                            }
                            FrameOutcome::InvalidScore { class, score } => {
                                warn!(
                                    class = class.label(),
                                    score,
                                    scorer = self.scorer.name(),
                                    "dropping frame with non-finite score"
                                );
                            }
                        }
                        if self.counters.frames % 100 == 0 {
                            debug!(frames = self.counters.frames, "frames processed");
                        }
                    }
                    None => break EndReason::SourceEnded,
                },
            }
        };

        info!(
            ?reason,
            frames = self.counters.frames,
            day = self.counters.day,
            night = self.counters.night,
            invalid = self.counters.invalid_scores,
            "capture session ended"
        );
        self.end_reason = reason;
        reason
    }

    /// Close the session and hand over the retained frames, best first.
    pub fn finish(mut self) -> SessionReport {
        let mut groups = Vec::with_capacity(2);
        let day_class = if self.night.is_some() {
            SceneClass::Day
        } else {
            SceneClass::Unclassified
        };
        groups.push(RetainedGroup {
            class: day_class,
            stats: self.day.stats(),
            frames: self.day.drain_sorted(SortOrder::Descending),
        });
        if let Some(mut night) = self.night.take() {
            groups.push(RetainedGroup {
                class: SceneClass::Night,
                stats: night.stats(),
                frames: night.drain_sorted(SortOrder::Descending),
            });
        }

        SessionReport {
            scorer: self.scorer.name().to_string(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            end_reason: self.end_reason,
            source_error: None,
            counters: self.counters,
            groups,
            all_frames: self.all_frames,
        }
    }

    /// Forget everything retained so far and start a fresh session.
    pub fn clear(&mut self) {
        self.day.clear();
        if let Some(night) = self.night.as_mut() {
            night.clear();
        }
        self.counters = SessionCounters::default();
        self.all_frames.clear();
        self.started_at = Utc::now();
        self.end_reason = EndReason::SourceEnded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_keeper_common::frame::{PixelFormat, RgbFrame};
    use frame_keeper_common::selector::TieBreak;

    use crate::score::buckets::BucketScorer;

    /// Scores a frame by the value of its first byte.
    struct FirstByte;

    impl FrameScorer for FirstByte {
        fn score(&self, frame: &RgbFrame<'_>) -> f64 {
            frame.pixels()[0] as f64
        }
    }

    struct AlwaysNan;

    impl FrameScorer for AlwaysNan {
        fn score(&self, _frame: &RgbFrame<'_>) -> f64 {
            f64::NAN
        }
    }

    fn config(keep: i64, split: bool) -> SessionConfig {
        SessionConfig {
            duration_secs: 0,
            keep,
            tie_break: TieBreak::FirstSeenWins,
            split_day_night: split,
        }
    }

    fn solid(rgb: [u8; 3], seq: u64) -> Frame {
        let pixels = rgb.repeat(4);
        Frame::new(pixels, 2, 2, PixelFormat::Rgb8, 1_700_000_000_000 + seq as i64, seq).unwrap()
    }

    // Blue bucket pixel: day. Black bucket pixel: night.
    const DAY: [u8; 3] = [60, 60, 120];
    const NIGHT: [u8; 3] = [5, 5, 5];

    #[test]
    fn keeps_best_frames_in_single_selector() {
        let mut session =
            CaptureSession::new(Box::new(FirstByte), &config(3, false), false).unwrap();
        for (i, v) in [5u8, 2, 9, 1, 7].into_iter().enumerate() {
            session.process_frame(solid([v, v, v], i as u64));
        }
        let report = session.finish();
        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        assert_eq!(group.class, SceneClass::Unclassified);
        let scores: Vec<f64> = group.frames.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![9.0, 7.0, 5.0]);
        assert_eq!(group.stats.offered, 5);
        assert_eq!(report.counters.frames, 5);
    }

    #[test]
    fn routes_by_scene_class() {
        let mut session =
            CaptureSession::new(Box::new(BucketScorer), &config(2, true), false).unwrap();
        let outcome = session.process_frame(solid(DAY, 0));
        assert!(matches!(
            outcome,
            FrameOutcome::Retained { class: SceneClass::Day, evicted: None, .. }
        ));
        session.process_frame(solid(NIGHT, 1));
        session.process_frame(solid(NIGHT, 2));

        let counters = session.counters();
        assert_eq!((counters.day, counters.night), (1, 2));

        let report = session.finish();
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].class, SceneClass::Day);
        assert_eq!(report.groups[0].frames.len(), 1);
        assert_eq!(report.groups[1].class, SceneClass::Night);
        assert_eq!(report.groups[1].frames.len(), 2);
        assert!(report.groups[1]
            .frames
            .iter()
            .all(|s| s.item.class == SceneClass::Night && s.score == 100.0));
    }

    #[test]
    fn eviction_reports_frame_id() {
        let mut session =
            CaptureSession::new(Box::new(FirstByte), &config(1, false), false).unwrap();
        session.process_frame(solid([3, 3, 3], 0));
        let outcome = session.process_frame(solid([8, 8, 8], 1));
        assert_eq!(
            outcome,
            FrameOutcome::Retained {
                class: SceneClass::Unclassified,
                score: 8.0,
                evicted: Some(0),
            }
        );
        assert!(matches!(
            session.process_frame(solid([1, 1, 1], 2)),
            FrameOutcome::Discarded { .. }
        ));
    }

    #[test]
    fn invalid_scores_are_counted_not_kept() {
        let mut session =
            CaptureSession::new(Box::new(AlwaysNan), &config(3, true), false).unwrap();
        let outcome = session.process_frame(solid(DAY, 0));
        assert!(matches!(outcome, FrameOutcome::InvalidScore { .. }));
        assert_eq!(session.counters().invalid_scores, 1);
        let report = session.finish();
        assert!(report.groups.iter().all(|g| g.frames.is_empty()));
        assert_eq!(report.groups[0].stats.invalid, 1);
    }

    #[test]
    fn zero_keep_discards_everything() {
        let mut session =
            CaptureSession::new(Box::new(FirstByte), &config(0, false), false).unwrap();
        assert!(matches!(
            session.process_frame(solid([200, 200, 200], 0)),
            FrameOutcome::Discarded { .. }
        ));
        assert!(session.finish().groups[0].frames.is_empty());
    }

    #[test]
    fn negative_keep_rejected() {
        let err = CaptureSession::new(Box::new(FirstByte), &config(-1, false), false).err();
        assert_eq!(err, Some(SelectorError::InvalidCapacity(-1)));
    }

    #[test]
    fn all_frames_logged_when_enabled() {
        let mut session =
            CaptureSession::new(Box::new(FirstByte), &config(1, false), true).unwrap();
        session.process_frame(solid([4, 4, 4], 0));
        session.process_frame(solid([6, 6, 6], 1));
        let report = session.finish();
        assert_eq!(report.all_frames.len(), 2);
        assert_eq!(report.all_frames[1].frame_id, 1);
        assert_eq!(report.all_frames[1].score, 6.0);
        assert!(report.all_frames.iter().all(|r| r.name.is_empty()));
    }

    #[test]
    fn clear_starts_a_fresh_session() {
        let mut session =
            CaptureSession::new(Box::new(FirstByte), &config(2, true), true).unwrap();
        session.process_frame(solid(DAY, 0));
        session.process_frame(solid(NIGHT, 1));
        session.clear();
        assert_eq!(session.counters(), SessionCounters::default());
        let report = session.finish();
        assert!(report.groups.iter().all(|g| g.frames.is_empty()));
        assert!(report.all_frames.is_empty());
    }

    #[tokio::test]
    async fn run_ends_when_source_closes() {
        let mut session =
            CaptureSession::new(Box::new(FirstByte), &config(2, false), false).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for v in [1u8, 4, 2] {
                tx.send(solid([v, v, v], v as u64)).await.unwrap();
            }
        });
        let reason = session
            .run(&mut rx, None, std::future::pending::<()>())
            .await;
        assert_eq!(reason, EndReason::SourceEnded);
        let report = session.finish();
        assert_eq!(report.end_reason, EndReason::SourceEnded);
        assert_eq!(report.counters.frames, 3);
        let scores: Vec<f64> = report.groups[0].frames.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![4.0, 2.0]);
    }

    #[tokio::test]
    async fn run_stops_at_deadline() {
        let mut session =
            CaptureSession::new(Box::new(FirstByte), &config(2, false), false).unwrap();
        let (_tx, mut rx) = mpsc::channel::<Frame>(1);
        let reason = session
            .run(&mut rx, Some(Duration::from_millis(20)), std::future::pending::<()>())
            .await;
        assert_eq!(reason, EndReason::Deadline);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let mut session =
            CaptureSession::new(Box::new(FirstByte), &config(2, false), false).unwrap();
        let (_tx, mut rx) = mpsc::channel::<Frame>(1);
        let reason = session.run(&mut rx, None, async {}).await;
        assert_eq!(reason, EndReason::Interrupted);
        assert_eq!(session.finish().end_reason, EndReason::Interrupted);
    }

    #[test]
    fn source_error_marks_report_failed() {
        let session =
            CaptureSession::new(Box::new(FirstByte), &config(2, false), false).unwrap();
        let mut report = session.finish();
        assert_eq!(report.source_error, None);
        report.source_failed("source I/O failed: no such directory".into());
        assert_eq!(report.end_reason, EndReason::SourceFailed);
        assert_eq!(
            report.source_error.as_deref(),
            Some("source I/O failed: no such directory")
        );

        let mut session =
            CaptureSession::new(Box::new(FirstByte), &config(2, false), false).unwrap();
        session.end_reason = EndReason::Deadline;
        let mut report = session.finish();
        report.source_failed("HTTP status 500".into());
        assert_eq!(report.end_reason, EndReason::Deadline);
        assert!(report.source_error.is_some());
    }
}
