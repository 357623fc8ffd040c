use camstream_common::frame::EncodedFrame;
use image::codecs::jpeg::JpegEncoder;

use super::normalize::NormalizedFrame;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// JPEG encoder with a fixed quality setting.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    /// `quality` is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode `frame`, tagging the result with the time it was captured.
    pub fn encode(
        &self,
        frame: &NormalizedFrame,
        captured_at_ms: i64,
    ) -> Result<EncodedFrame, EncodeError> {
        // Rough guess at the compressed size to avoid regrowing the buffer.
        let mut jpeg = Vec::with_capacity(frame.as_raw().len() / 8);
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(frame)?;
        Ok(EncodedFrame::new(jpeg, captured_at_ms))
    }
}
