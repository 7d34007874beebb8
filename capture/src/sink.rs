use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use frame_keeper_common::config::{ImageFormat, OutputConfig};
use frame_keeper_common::frame::{Frame, FrameError};
use frame_keeper_common::record::{FrameRecord, RecordError, RecordWriter, SceneClass};
use tracing::{debug, info};

use crate::keys::retained_image_key;
use crate::session::SessionReport;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("output I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),
    #[error("record log write failed: {0}")]
    Record(#[from] RecordError),
    #[error("session summary failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A retained frame written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedFrame {
    /// Path relative to the output directory.
    pub key: String,
    pub class: SceneClass,
    pub rank: usize,
    pub score: f64,
    pub frame_id: u64,
}

#[derive(Debug, Default)]
pub struct PersistSummary {
    pub saved: Vec<SavedFrame>,
    pub records: u64,
}

/// Writes a finished session to the output directory.
pub struct FrameSink {
    root: PathBuf,
    image_format: ImageFormat,
    record_log: PathBuf,
}

impl FrameSink {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            root: config.dir.clone(),
            image_format: config.image_format,
            record_log: config.dir.join(&config.record_log),
        }
    }

    pub fn record_log(&self) -> &Path {
        &self.record_log
    }

    /// Save retained frames, append their records and write `session.json`.
    pub fn persist(&self, report: &SessionReport) -> Result<PersistSummary, SinkError> {
        std::fs::create_dir_all(&self.root)?;

        let mut summary = PersistSummary::default();
        let mut records: Vec<FrameRecord> = Vec::new();

        for group in &report.groups {
            let label = group.class.label();
            if !group.frames.is_empty() {
                std::fs::create_dir_all(self.root.join(label))?;
            }
            for (i, scored) in group.frames.iter().enumerate() {
                let rank = i + 1;
                let candidate = &scored.item;
                let key = retained_image_key(
                    label,
                    rank,
                    candidate.frame.captured_at_ms(),
                    self.image_format.extension(),
                );
                self.write_image(&candidate.frame, &self.root.join(&key))?;
                debug!(key, score = scored.score, "saved retained frame");

                records.push(candidate.record(scored.score, key.clone()));
                summary.saved.push(SavedFrame {
                    key,
                    class: group.class,
                    rank,
                    score: scored.score,
                    frame_id: candidate.frame_id,
                });
            }
        }

        summary.records = self.append_records(report.all_frames.iter().chain(records.iter()))?;
        self.write_session_file(report, &summary)?;

        info!(
            dir = %self.root.display(),
            saved = summary.saved.len(),
            records = summary.records,
            "session persisted"
        );
        Ok(summary)
    }

    fn write_image(&self, frame: &Frame, path: &Path) -> Result<(), SinkError> {
        match self.image_format {
            ImageFormat::Jpeg => frame
                .to_image()?
                .save_with_format(path, image::ImageFormat::Jpeg)?,
            ImageFormat::Png => frame
                .to_image()?
                .save_with_format(path, image::ImageFormat::Png)?,
            ImageFormat::Raw => std::fs::write(path, frame.to_rgb().pixels())?,
        }
        Ok(())
    }

    fn append_records<'a>(
        &self,
        records: impl Iterator<Item = &'a FrameRecord>,
    ) -> Result<u64, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.record_log)?;
        let mut writer = RecordWriter::new(BufWriter::new(file));
        for record in records {
            writer.append(record)?;
        }
        writer.flush()?;
        Ok(writer.written())
    }

    fn write_session_file(
        &self,
        report: &SessionReport,
        summary: &PersistSummary,
    ) -> Result<(), SinkError> {
        let groups: Vec<serde_json::Value> = report
            .groups
            .iter()
            .map(|g| {
                let saved: Vec<serde_json::Value> = summary
                    .saved
                    .iter()
                    .filter(|s| s.class == g.class)
                    .map(|s| {
                        serde_json::json!({
                            "rank": s.rank,
                            "file": s.key,
                            "score": s.score,
                            "frame_id": s.frame_id
                        })
                    })
                    .collect();
                serde_json::json!({
                    "label": g.class.label(),
                    "stats": g.stats,
                    "frames": saved
                })
            })
            .collect();

        let json = serde_json::json!({
            "scorer": report.scorer,
            "started_at": report.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "ended_at": report.ended_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "end_reason": report.end_reason,
            "source_error": report.source_error,
            "counters": report.counters,
            "groups": groups,
            "record_log": self.record_log.display().to_string(),
            "records_written": summary.records
        });

        std::fs::write(
            self.root.join("session.json"),
            serde_json::to_string_pretty(&json)?,
        )?;
        Ok(())
    }
}
