use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Cursor;

/// Pixel layout of a raw frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B.
    Rgb8,
    /// Packed 8-bit B, G, R (OpenCV order).
    Bgr8,
    /// Single 8-bit luma channel.
    Gray8,
    /// Planar I420: full-size Y plane followed by quarter-size U and V planes.
    Yuv420,
}

impl PixelFormat {
    /// Number of bytes one frame of `width` x `height` occupies.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => pixels * 3,
            PixelFormat::Gray8 => pixels,
            PixelFormat::Yuv420 => pixels + pixels / 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Bgr8 => "bgr8",
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Yuv420 => "yuv420",
        }
    }
}

/// A captured frame: raw pixels plus the metadata needed to score and save it.
#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    captured_at_ms: i64,
    seq: u64,
}

impl Frame {
    /// Wrap a raw buffer, checking it matches the dimensions and format.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }
        if format == PixelFormat::Yuv420 && (width % 2 != 0 || height % 2 != 0) {
            return Err(FrameError::OddDimensions { width, height });
        }
        let expected = format.frame_len(width, height);
        if pixels.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
            format,
            captured_at_ms,
            seq,
        })
    }

    /// Decode an encoded image (JPEG, PNG, ...) into an RGB frame.
    pub fn from_encoded(data: &[u8], captured_at_ms: i64, seq: u64) -> Result<Self, FrameError> {
        let img = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| FrameError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| FrameError::Decode(e.to_string()))?
            .to_rgb8();
        let (width, height) = img.dimensions();
        Self::new(
            img.into_raw(),
            width,
            height,
            PixelFormat::Rgb8,
            captured_at_ms,
            seq,
        )
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Packed RGB view of the frame. Borrows when the frame is already RGB.
    pub fn to_rgb(&self) -> RgbFrame<'_> {
        let pixels = match self.format {
            PixelFormat::Rgb8 => Cow::Borrowed(self.pixels.as_slice()),
            PixelFormat::Bgr8 => Cow::Owned(
                self.pixels
                    .chunks_exact(3)
                    .flat_map(|p| [p[2], p[1], p[0]])
                    .collect(),
            ),
            PixelFormat::Gray8 => {
                Cow::Owned(self.pixels.iter().flat_map(|&y| [y, y, y]).collect())
            }
            PixelFormat::Yuv420 => Cow::Owned(yuv420_to_rgb(&self.pixels, self.width, self.height)),
        };
        RgbFrame {
            pixels,
            width: self.width,
            height: self.height,
        }
    }

    /// Copy the frame into an `image` buffer for encoding.
    pub fn to_image(&self) -> Result<RgbImage, FrameError> {
        let rgb = self.to_rgb();
        let got = rgb.pixels.len();
        RgbImage::from_raw(self.width, self.height, rgb.pixels.into_owned()).ok_or(
            FrameError::BufferSize {
                expected: PixelFormat::Rgb8.frame_len(self.width, self.height),
                got,
            },
        )
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("captured_at_ms", &self.captured_at_ms)
            .field("seq", &self.seq)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Packed 8-bit RGB pixels, the layout every score function works on.
#[derive(Debug, Clone)]
pub struct RgbFrame<'a> {
    pixels: Cow<'a, [u8]>,
    width: u32,
    height: u32,
}

impl<'a> RgbFrame<'a> {
    pub fn new(
        pixels: impl Into<Cow<'a, [u8]>>,
        width: u32,
        height: u32,
    ) -> Result<Self, FrameError> {
        let pixels = pixels.into();
        let expected = PixelFormat::Rgb8.frame_len(width, height);
        if pixels.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Iterate pixels as `[r, g, b]`.
    pub fn rgb_pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.pixels.chunks_exact(3).map(|p| [p[0], p[1], p[2]])
    }

    /// BT.601 luma plane, row-major.
    pub fn luma(&self) -> Vec<f64> {
        self.rgb_pixels()
            .map(|[r, g, b]| 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64)
            .collect()
    }
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// I420 to packed RGB using the integer BT.601 (limited range) transform.
fn yuv420_to_rgb(yuv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let (y_plane, chroma) = yuv.split_at(w * h);
    let (u_plane, v_plane) = chroma.split_at(w * h / 4);
    let cw = w / 2;

    let mut out = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        for col in 0..w {
            let c = y_plane[row * w + col] as i32 - 16;
            let ci = (row / 2) * cw + col / 2;
            let d = u_plane[ci] as i32 - 128;
            let e = v_plane[ci] as i32 - 128;
            out.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
            out.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
            out.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
        }
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame has a zero dimension: {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },
    #[error("yuv420 frames need even dimensions, got {width}x{height}")]
    OddDimensions { width: u32, height: u32 },
    #[error("frame buffer has {got} bytes, expected {expected}")]
    BufferSize { expected: usize, got: usize },
    #[error("failed to decode image: {0}")]
    Decode(String),
}
