use std::path::{Path, PathBuf};

use frame_keeper_common::frame::Frame;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{decode_frame, Pacer, SourceError};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Image files under `dir`, sorted by file name.
pub async fn list_images(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
            .unwrap_or(false);
        if is_image && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Replay every image in `dir` once, in name order, then end.
pub async fn run_directory_source(
    dir: &Path,
    fps: f64,
    tx: mpsc::Sender<Frame>,
) -> Result<(), SourceError> {
    let files = list_images(dir).await?;
    info!(dir = %dir.display(), files = files.len(), fps, "replaying image directory");

    let mut pacer = Pacer::new(fps);
    let mut seq: u64 = 0;
    for path in files {
        pacer.tick().await;
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read image, skipping");
                continue;
            }
        };
        let Some(frame) = decode_frame(data, seq).await else {
            continue;
        };
        seq += 1;
        if tx.send(frame).await.is_err() {
            info!(frames = seq, "capture session closed, stopping directory source");
            return Ok(());
        }
    }

    info!(frames = seq, "image directory exhausted");
    Ok(())
}
