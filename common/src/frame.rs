use bytes::Bytes;
use serde::Deserialize;
use std::fmt;

/// Per-pixel memory layout of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PixelLayout {
    /// 8-bit luma, one channel.
    Gray8,
    /// Packed 4:2:2 `Y0 U Y1 V`, two bytes per pixel.
    Yuyv,
    Bgr24,
    Rgb24,
    Bgra32,
    Rgba32,
    /// A device format we have no conversion for, tagged with its FourCC.
    #[serde(skip_deserializing)]
    Other([u8; 4]),
}

impl PixelLayout {
    /// Channel count as the camera reports it (YUYV counts as two).
    pub fn channels(&self) -> Option<u8> {
        match self {
            PixelLayout::Gray8 => Some(1),
            PixelLayout::Yuyv => Some(2),
            PixelLayout::Bgr24 | PixelLayout::Rgb24 => Some(3),
            PixelLayout::Bgra32 | PixelLayout::Rgba32 => Some(4),
            PixelLayout::Other(_) => None,
        }
    }

    pub fn bytes_per_pixel(&self) -> Option<usize> {
        self.channels().map(usize::from)
    }

    /// V4L2 FourCC code for this layout.
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelLayout::Gray8 => *b"GREY",
            PixelLayout::Yuyv => *b"YUYV",
            PixelLayout::Bgr24 => *b"BGR3",
            PixelLayout::Rgb24 => *b"RGB3",
            PixelLayout::Bgra32 => *b"AR24",
            PixelLayout::Rgba32 => *b"AB24",
            PixelLayout::Other(code) => *code,
        }
    }

    pub fn from_fourcc(code: [u8; 4]) -> Self {
        match &code {
            b"GREY" => PixelLayout::Gray8,
            b"YUYV" => PixelLayout::Yuyv,
            b"BGR3" => PixelLayout::Bgr24,
            b"RGB3" => PixelLayout::Rgb24,
            // BGR4 is the deprecated alias of AR24 (B, G, R, A in memory).
            b"AR24" | b"BGR4" => PixelLayout::Bgra32,
            b"AB24" => PixelLayout::Rgba32,
            _ => PixelLayout::Other(code),
        }
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc();
        match std::str::from_utf8(&code) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{code:?}"),
        }
    }
}

/// An unprocessed frame as delivered by a camera backend.
///
/// `stride` is the distance in bytes between the starts of consecutive rows.
/// Drivers commonly pad rows, in which case the buffer is not contiguous and
/// must be compacted before encoding.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub layout: PixelLayout,
    pub stride: usize,
}

impl RawFrame {
    /// Create a tightly packed frame. Channel count and stride are derived
    /// from the layout.
    pub fn packed(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Self {
        let bpp = layout.bytes_per_pixel().unwrap_or(0);
        Self {
            data,
            width,
            height,
            channels: layout.channels().unwrap_or(0),
            layout,
            stride: width as usize * bpp,
        }
    }

    /// Bytes per row without padding, or `None` for unknown layouts.
    pub fn row_bytes(&self) -> Option<usize> {
        self.layout
            .bytes_per_pixel()
            .map(|bpp| self.width as usize * bpp)
    }

    /// True when rows follow each other with no padding in between.
    pub fn is_contiguous(&self) -> bool {
        self.row_bytes() == Some(self.stride)
    }
}

/// Current wall clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A JPEG-encoded frame, the only per-frame artifact that outlives an
/// iteration of the capture loop.
///
/// The payload is reference counted, so clones handed to HTTP readers are
/// cheap and remain valid after the frame cell moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub jpeg: Bytes,
    /// Sequence number assigned when the frame is published. Zero until then.
    pub seq: u64,
    /// Wall clock time (Unix millis) at which the camera handed over the
    /// raw frame.
    pub captured_at_ms: i64,
}

impl EncodedFrame {
    pub fn new(jpeg: impl Into<Bytes>, captured_at_ms: i64) -> Self {
        Self {
            jpeg: jpeg.into(),
            seq: 0,
            captured_at_ms,
        }
    }

    /// Milliseconds between capture and `now`, clamped at zero.
    pub fn age_ms(&self, now: i64) -> u64 {
        now.saturating_sub(self.captured_at_ms).max(0) as u64
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}
