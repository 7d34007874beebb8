use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::frame::PixelFormat;
use crate::selector::TieBreak;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HTTP multipart MJPEG stream.
    Mjpeg,
    /// Single JPEG fetched over HTTP once per tick.
    Snapshot,
    /// Image files replayed from a directory.
    Directory,
    /// Fixed-size raw frames from a file or stdin.
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
    /// Frames per second for file-backed and snapshot sources. 0 replays
    /// files as fast as possible.
    #[serde(default)]
    pub fps: f64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// 0 runs until the source ends or the process is interrupted.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    /// Frames kept per selector.
    #[serde(default = "default_keep")]
    pub keep: i64,
    #[serde(default)]
    pub tie_break: TieBreak,
    #[serde(default = "default_split_day_night")]
    pub split_day_night: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            keep: default_keep(),
            tie_break: TieBreak::default(),
            split_day_night: default_split_day_night(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMetric {
    /// Day/night colour-bucket percentages.
    #[default]
    Buckets,
    /// Sum of the blue channel.
    Blue,
    /// Variance of the Laplacian.
    Sharpness,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub metric: ScoringMetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Raw,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_image_format")]
    pub image_format: ImageFormat,
    #[serde(default = "default_record_log")]
    pub record_log: String,
    /// Also log frames that were not kept, with an empty file name.
    #[serde(default)]
    pub log_all_frames: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            image_format: default_image_format(),
            record_log: default_record_log(),
            log_all_frames: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.keep < 0 {
            return Err(ConfigError::Invalid(format!(
                "session.keep must be >= 0, got {}",
                self.session.keep
            )));
        }
        if !self.source.fps.is_finite() || self.source.fps < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "source.fps must be a non-negative number, got {}",
                self.source.fps
            )));
        }
        if self.source.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "source.channel_capacity must be at least 1".into(),
            ));
        }
        match self.source.kind {
            SourceKind::Mjpeg | SourceKind::Snapshot if self.source.url.is_none() => Err(
                ConfigError::Invalid("source.url is required for http sources".into()),
            ),
            SourceKind::Snapshot if self.source.fps <= 0.0 => Err(ConfigError::Invalid(
                "source.fps must be positive for the snapshot source".into(),
            )),
            SourceKind::Directory | SourceKind::Raw if self.source.path.is_none() => Err(
                ConfigError::Invalid("source.path is required for file sources".into()),
            ),
            SourceKind::Raw if self.source.width == 0 || self.source.height == 0 => Err(
                ConfigError::Invalid("source.width and source.height are required for raw".into()),
            ),
            SourceKind::Raw
                if self.source.pixel_format == PixelFormat::Yuv420
                    && (self.source.width % 2 != 0 || self.source.height % 2 != 0) =>
            {
                Err(ConfigError::Invalid(format!(
                    "yuv420 needs even source.width and source.height, got {}x{}",
                    self.source.width, self.source.height
                )))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_pixel_format() -> PixelFormat {
    PixelFormat::Rgb8
}
fn default_channel_capacity() -> usize {
    8
}
fn default_duration_secs() -> u64 {
    90 * 60
}
fn default_keep() -> i64 {
    5
}
fn default_split_day_night() -> bool {
    true
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("captures")
}
fn default_image_format() -> ImageFormat {
    ImageFormat::Jpeg
}
fn default_record_log() -> String {
    "frame_data.bin".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [source]
            kind = "mjpeg"
            url = "http://cam.local:8080/stream"
            "#,
        )
        .unwrap();
        assert_eq!(config.session.keep, 5);
        assert_eq!(config.session.duration_secs, 5400);
        assert_eq!(config.session.tie_break, TieBreak::FirstSeenWins);
        assert!(config.session.split_day_night);
        assert_eq!(config.scoring.metric, ScoringMetric::Buckets);
        assert_eq!(config.output.image_format, ImageFormat::Jpeg);
        assert_eq!(config.output.record_log, "frame_data.bin");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.source.channel_capacity, 8);
    }

    #[test]
    fn full_config_parses() {
        let config = Config::from_toml(
            r#"
            [source]
            kind = "raw"
            path = "-"
            width = 640
            height = 480
            pixel_format = "yuv420"
            fps = 30.0

            [session]
            duration_secs = 30
            keep = 3
            tie_break = "last_seen"
            split_day_night = false

            [scoring]
            metric = "sharpness"

            [output]
            dir = "/tmp/out"
            image_format = "png"
            log_all_frames = true
            "#,
        )
        .unwrap();
        assert_eq!(config.source.kind, SourceKind::Raw);
        assert_eq!(config.source.pixel_format, PixelFormat::Yuv420);
        assert_eq!(config.session.tie_break, TieBreak::LastSeenWins);
        assert_eq!(config.scoring.metric, ScoringMetric::Sharpness);
        assert_eq!(config.output.image_format.extension(), "png");
        assert!(config.output.log_all_frames);
    }

    #[test]
    fn negative_keep_rejected() {
        let err = Config::from_toml(
            r#"
            [source]
            kind = "directory"
            path = "frames"
            [session]
            keep = -2
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn raw_needs_dimensions() {
        let err = Config::from_toml(
            r#"
            [source]
            kind = "raw"
            path = "frames.raw"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("width"));
    }

    #[test]
    fn yuv420_needs_even_dimensions() {
        let err = Config::from_toml(
            r#"
            [source]
            kind = "raw"
            path = "frames.yuv"
            width = 641
            height = 480
            pixel_format = "yuv420"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("641x480"));

        let ok = Config::from_toml(
            r#"
            [source]
            kind = "raw"
            path = "frames.yuv"
            width = 641
            height = 481
            pixel_format = "rgb8"
            "#,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn snapshot_needs_rate() {
        let err = Config::from_toml(
            r#"
            [source]
            kind = "snapshot"
            url = "http://cam.local/frame"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("fps"));
    }

    #[test]
    fn unknown_metric_is_a_parse_error() {
        let err = Config::from_toml(
            r#"
            [source]
            kind = "mjpeg"
            url = "http://x"
            [scoring]
            metric = "vibes"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
