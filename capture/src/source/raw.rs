use std::path::Path;

use chrono::Utc;
use frame_keeper_common::frame::{Frame, PixelFormat};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{Pacer, SourceError};

/// Geometry of every frame in a raw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLayout {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawLayout {
    pub fn frame_len(&self) -> usize {
        self.format.frame_len(self.width, self.height)
    }
}

/// Read back-to-back raw frames from `path`, or from stdin when `path` is `-`.
pub async fn run_raw_source(
    path: &Path,
    layout: RawLayout,
    fps: f64,
    tx: mpsc::Sender<Frame>,
) -> Result<(), SourceError> {
    info!(
        path = %path.display(),
        width = layout.width,
        height = layout.height,
        format = layout.format.name(),
        "reading raw frames"
    );
    if path.as_os_str() == "-" {
        stream_raw_frames(tokio::io::stdin(), layout, fps, tx).await
    } else {
        let file = tokio::fs::File::open(path).await?;
        stream_raw_frames(tokio::io::BufReader::new(file), layout, fps, tx).await
    }
}

/// Slice `reader` into fixed-size frames. A trailing partial frame is dropped.
pub async fn stream_raw_frames<R: AsyncRead + Unpin>(
    mut reader: R,
    layout: RawLayout,
    fps: f64,
    tx: mpsc::Sender<Frame>,
) -> Result<(), SourceError> {
    let frame_len = layout.frame_len();
    if frame_len == 0 {
        return Err(SourceError::Config(format!(
            "raw frame size is zero for {}x{}",
            layout.width, layout.height
        )));
    }

    let mut pacer = Pacer::new(fps);
    let mut seq: u64 = 0;
    loop {
        let mut buf = vec![0u8; frame_len];
        let filled = fill(&mut reader, &mut buf).await?;
        if filled == 0 {
            break;
        }
        if filled < frame_len {
            warn!(got = filled, expected = frame_len, "dropping truncated trailing frame");
            break;
        }

        pacer.tick().await;
        let frame = Frame::new(
            buf,
            layout.width,
            layout.height,
            layout.format,
            Utc::now().timestamp_millis(),
            seq,
        )?;
        seq += 1;
        if tx.send(frame).await.is_err() {
            info!(frames = seq, "capture session closed, stopping raw source");
            return Ok(());
        }
    }

    info!(frames = seq, "raw stream ended");
    Ok(())
}

/// Read until `buf` is full or the reader hits EOF. Returns bytes read.
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAY_2X2: RawLayout = RawLayout {
        width: 2,
        height: 2,
        format: PixelFormat::Gray8,
    };

    #[tokio::test]
    async fn slices_stream_into_frames() {
        let data: Vec<u8> = (0..8).collect();
        let (tx, mut rx) = mpsc::channel(4);
        stream_raw_frames(data.as_slice(), GRAY_2X2, 0.0, tx)
            .await
            .unwrap();

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(a.pixels(), &[0, 1, 2, 3]);
        assert_eq!(b.pixels(), &[4, 5, 6, 7]);
        assert_eq!((a.seq(), b.seq()), (0, 1));
        assert_eq!(a.format(), PixelFormat::Gray8);
    }

    #[tokio::test]
    async fn trailing_partial_frame_dropped() {
        let data = [9u8; 6];
        let (tx, mut rx) = mpsc::channel(4);
        stream_raw_frames(&data[..], GRAY_2X2, 0.0, tx).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn yuv_frames_use_planar_size() {
        let layout = RawLayout {
            width: 4,
            height: 2,
            format: PixelFormat::Yuv420,
        };
        assert_eq!(layout.frame_len(), 12);
        let data = vec![128u8; 24];
        let (tx, mut rx) = mpsc::channel(4);
        stream_raw_frames(data.as_slice(), layout, 0.0, tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().to_rgb().pixel_count(), 8);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.raw");
        std::fs::write(&path, [1u8; 12]).unwrap();
        let layout = RawLayout {
            width: 2,
            height: 2,
            format: PixelFormat::Rgb8,
        };
        let (tx, mut rx) = mpsc::channel(2);
        run_raw_source(&path, layout, 0.0, tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().pixels(), &[1u8; 12]);
    }
}
