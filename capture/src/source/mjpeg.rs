use bytes::BytesMut;
use frame_keeper_common::frame::Frame;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{decode_frame, SourceError};

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker, e.g. `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies.
pub struct MjpegParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNDARY)
    }
}

impl MjpegParser {
    /// `boundary` is the multipart boundary parameter, with or without the
    /// leading `--`.
    pub fn new(boundary: &str) -> Self {
        let name = boundary.trim_start_matches("--");
        Self {
            boundary: format!("--{name}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one chunk of the body. Returns every JPEG payload completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let boundary_len = self.boundary.len();
        let mut out = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + boundary_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > boundary_len {
                            let _ = self.buffer.split_to(self.buffer.len() - boundary_len);
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    match find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary) {
                        Some(pos) => {
                            let jpeg_end = self.jpeg_start + pos;
                            // Strip trailing \r\n before boundary
                            let end = if jpeg_end >= 2
                                && self.buffer[jpeg_end - 2] == b'\r'
                                && self.buffer[jpeg_end - 1] == b'\n'
                            {
                                jpeg_end - 2
                            } else {
                                jpeg_end
                            };

                            let jpeg = self.buffer[..end].to_vec();
                            let _ = self.buffer.split_to(jpeg_end + boundary_len);
                            if !jpeg.is_empty() {
                                out.push(jpeg);
                            }
                            self.state = ParseState::SeekingHeaderEnd;
                        }
                        None => {
                            // Avoid re-scanning what has already been searched
                            self.jpeg_start = self.buffer.len().saturating_sub(boundary_len);
                            break;
                        }
                    }
                }
            }
        }

        out
    }
}

/// Extract the boundary parameter from a multipart `Content-Type` header.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

enum StreamEnd {
    /// The server closed the stream.
    Eof,
    /// The capture session stopped listening.
    ReceiverClosed,
}

/// Consume an MJPEG stream and forward decoded frames.
/// Reconnects with exponential backoff until the receiver goes away.
pub async fn run_mjpeg_source(url: &str, tx: mpsc::Sender<Frame>) -> Result<(), SourceError> {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);
    let mut seq: u64 = 0;

    loop {
        info!(url, "connecting to MJPEG stream");
        match consume_stream(url, &tx, &mut seq).await {
            Ok(StreamEnd::ReceiverClosed) => {
                info!(frames = seq, "capture session closed, stopping MJPEG source");
                return Ok(());
            }
            Ok(StreamEnd::Eof) => {
                info!("stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        if tx.is_closed() {
            return Ok(());
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(
    url: &str,
    tx: &mpsc::Sender<Frame>,
    seq: &mut u64,
) -> Result<StreamEnd, SourceError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(SourceError::HttpConnect)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(SourceError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(SourceError::HttpStatus(response.status().as_u16()));
    }

    let boundary = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(boundary_from_content_type)
        .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
    info!(status = %response.status(), boundary, "connected to MJPEG stream");

    let mut parser = MjpegParser::new(&boundary);
    let mut byte_stream = response.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(SourceError::HttpStream)?;
        for jpeg in parser.push(&chunk) {
            debug!(seq = *seq, bytes = jpeg.len(), "received JPEG part");
            let Some(frame) = decode_frame(jpeg, *seq).await else {
                continue;
            };
            *seq += 1;
            if tx.send(frame).await.is_err() {
                return Ok(StreamEnd::ReceiverClosed);
            }
        }
    }

    Ok(StreamEnd::Eof)
}

/// Polling fallback: fetch one JPEG per tick from a still-frame endpoint.
pub async fn run_snapshot_source(
    url: &str,
    interval: Duration,
    tx: mpsc::Sender<Frame>,
) -> Result<(), SourceError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(SourceError::HttpConnect)?;
    let mut ticker = tokio::time::interval(interval);
    let mut seq: u64 = 0;
    info!(url, interval_ms = interval.as_millis() as u64, "polling camera snapshots");

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            return Ok(());
        }

        let jpeg = match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(b) => b.to_vec(),
                Err(e) => {
                    warn!(error = %e, "failed to read camera snapshot body");
                    continue;
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "non-success response from camera");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch camera snapshot");
                continue;
            }
        };

        let Some(frame) = decode_frame(jpeg, seq).await else {
            continue;
        };
        seq += 1;
        if tx.send(frame).await.is_err() {
            info!(frames = seq, "capture session closed, stopping snapshot source");
            return Ok(());
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
