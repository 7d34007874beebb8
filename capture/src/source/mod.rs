//! Frame sources. Each runs as its own task and hands frames to the capture
//! session over a bounded channel; the session is the only consumer.
pub mod directory;
pub mod mjpeg;
pub mod raw;

use std::time::Duration;

use chrono::Utc;
use frame_keeper_common::config::{SourceConfig, SourceKind};
use frame_keeper_common::frame::{Frame, FrameError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use raw::RawLayout;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),
    #[error("source misconfigured: {0}")]
    Config(String),
}

/// Start the configured source. Frames arrive on `tx` until the source ends
/// or the receiver is dropped.
pub fn spawn_source(
    config: SourceConfig,
    tx: mpsc::Sender<Frame>,
) -> JoinHandle<Result<(), SourceError>> {
    tokio::spawn(async move {
        match config.kind {
            SourceKind::Mjpeg => {
                let url = required(config.url, "url")?;
                mjpeg::run_mjpeg_source(&url, tx).await
            }
            SourceKind::Snapshot => {
                let url = required(config.url, "url")?;
                let interval = (config.fps > 0.0 && config.fps.is_finite())
                    .then(|| Duration::from_secs_f64(1.0 / config.fps))
                    .filter(|d| !d.is_zero())
                    .ok_or_else(|| {
                        SourceError::Config(format!(
                            "source.fps {} is not a usable snapshot rate",
                            config.fps
                        ))
                    })?;
                mjpeg::run_snapshot_source(&url, interval, tx).await
            }
            SourceKind::Directory => {
                let path = required(config.path, "path")?;
                directory::run_directory_source(&path, config.fps, tx).await
            }
            SourceKind::Raw => {
                let path = required(config.path, "path")?;
                let layout = RawLayout {
                    width: config.width,
                    height: config.height,
                    format: config.pixel_format,
                };
                raw::run_raw_source(&path, layout, config.fps, tx).await
            }
        }
    })
}

/// How a source task ended once the session stopped reading from it.
#[derive(Debug)]
pub enum SourceExit {
    Finished,
    Failed(SourceError),
    Panicked(String),
    /// Still running after the grace period; the task was aborted.
    Aborted,
}

impl SourceExit {
    /// Error text when the source stopped abnormally.
    pub fn failure(&self) -> Option<String> {
        match self {
            SourceExit::Failed(e) => Some(e.to_string()),
            SourceExit::Panicked(msg) => Some(format!("source task panicked: {msg}")),
            SourceExit::Finished | SourceExit::Aborted => None,
        }
    }
}

/// Wait up to `grace` for the source task to end, aborting it otherwise.
pub async fn join_source(
    handle: &mut JoinHandle<Result<(), SourceError>>,
    grace: Duration,
) -> SourceExit {
    match tokio::time::timeout(grace, &mut *handle).await {
        Ok(Ok(Ok(()))) => SourceExit::Finished,
        Ok(Ok(Err(e))) => SourceExit::Failed(e),
        Ok(Err(e)) => SourceExit::Panicked(e.to_string()),
        Err(_) => {
            handle.abort();
            SourceExit::Aborted
        }
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, SourceError> {
    value.ok_or_else(|| SourceError::Config(format!("source.{field} is not set")))
}

/// Optional fixed-rate ticker for file-backed sources.
pub(crate) struct Pacer(Option<Interval>);

impl Pacer {
    pub(crate) fn new(fps: f64) -> Self {
        if !(fps > 0.0 && fps.is_finite()) {
            return Pacer(None);
        }
        let period = Duration::from_secs_f64(1.0 / fps);
        if period.is_zero() {
            return Pacer(None);
        }
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Pacer(Some(interval))
    }

    pub(crate) async fn tick(&mut self) {
        if let Some(interval) = &mut self.0 {
            interval.tick().await;
        }
    }
}

/// Decode an encoded image off the async threads. A frame that fails to
/// decode is logged and dropped; the caller skips the tick.
pub(crate) async fn decode_frame(data: Vec<u8>, seq: u64) -> Option<Frame> {
    let captured_at_ms = Utc::now().timestamp_millis();
    let result =
        tokio::task::spawn_blocking(move || Frame::from_encoded(&data, captured_at_ms, seq)).await;
    match result {
        Ok(Ok(frame)) => {
            debug!(seq, width = frame.width(), height = frame.height(), "decoded frame");
            Some(frame)
        }
        Ok(Err(e)) => {
            warn!(error = %e, seq, "failed to decode frame, skipping");
            None
        }
        Err(e) => {
            warn!(error = %e, seq, "decode task failed, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn missing_path_is_a_config_error() {
        let (tx, _rx) = mpsc::channel(1);
        let config = SourceConfig {
            kind: SourceKind::Directory,
            url: None,
            path: None,
            width: 0,
            height: 0,
            pixel_format: frame_keeper_common::frame::PixelFormat::Rgb8,
            fps: 0.0,
            channel_capacity: 1,
        };
        let result = spawn_source(config, tx).await.unwrap();
        assert!(matches!(result, Err(SourceError::Config(_))));
    }

    #[tokio::test]
    async fn undecodable_bytes_yield_no_frame() {
        assert!(decode_frame(b"garbage".to_vec(), 0).await.is_none());
    }

    fn directory_config(path: PathBuf) -> SourceConfig {
        SourceConfig {
            kind: SourceKind::Directory,
            url: None,
            path: Some(path),
            width: 0,
            height: 0,
            pixel_format: frame_keeper_common::frame::PixelFormat::Rgb8,
            fps: 0.0,
            channel_capacity: 1,
        }
    }

    #[tokio::test]
    async fn failed_source_is_reported_on_join() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let mut handle = spawn_source(directory_config(dir.path().join("missing")), tx);
        assert!(rx.recv().await.is_none());

        let exit = join_source(&mut handle, Duration::from_secs(2)).await;
        assert!(matches!(exit, SourceExit::Failed(SourceError::Io(_))));
        assert!(exit.failure().unwrap().starts_with("source I/O failed"));
    }

    #[tokio::test]
    async fn finished_and_stuck_sources_have_no_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let mut handle = spawn_source(directory_config(PathBuf::from(dir.path())), tx);
        let exit = join_source(&mut handle, Duration::from_secs(2)).await;
        assert!(matches!(exit, SourceExit::Finished));
        assert!(exit.failure().is_none());

        let mut stuck: JoinHandle<Result<(), SourceError>> =
            tokio::spawn(std::future::pending());
        let exit = join_source(&mut stuck, Duration::from_millis(10)).await;
        assert!(matches!(exit, SourceExit::Aborted));
        assert!(exit.failure().is_none());
    }

    #[tokio::test]
    async fn panicked_source_is_a_failure() {
        let mut handle: JoinHandle<Result<(), SourceError>> = tokio::spawn(async {
            if true {
                panic!("decoder blew up");
            }
            Ok(())
        });
        let exit = join_source(&mut handle, Duration::from_secs(2)).await;
        assert!(matches!(exit, SourceExit::Panicked(_)));
        assert!(exit.failure().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn spawned_directory_source_ends_on_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let config = directory_config(PathBuf::from(dir.path()));
        spawn_source(config, tx).await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
    }
}
