//! Conversion of raw camera frames into contiguous RGB images.

use camstream_common::frame::{PixelLayout, RawFrame};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

/// A contiguous 3-channel frame in canonical RGB order.
pub type NormalizedFrame = RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("unsupported frame format: {0}")]
    UnsupportedFormat(String),
}

fn unsupported(frame: &RawFrame, reason: &str) -> NormalizeError {
    NormalizeError::UnsupportedFormat(format!(
        "{reason} ({}x{}, {} channels, layout {}, stride {}, {} bytes)",
        frame.width,
        frame.height,
        frame.channels,
        frame.layout,
        frame.stride,
        frame.data.len()
    ))
}

/// Convert `frame` to canonical RGB.
///
/// Dispatches on channel count first (1, 2, 4, then 3) and checks the layout
/// tag agrees. Padded rows are compacted, so the result is always contiguous.
pub fn normalize(frame: RawFrame) -> Result<NormalizedFrame, NormalizeError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(unsupported(&frame, "empty frame"));
    }

    let image = match (frame.channels, frame.layout) {
        (1, PixelLayout::Gray8) => {
            let (width, height) = (frame.width, frame.height);
            let gray = GrayImage::from_raw(width, height, packed(frame)?)
                .ok_or_else(|| NormalizeError::UnsupportedFormat("gray buffer size".into()))?;
            DynamicImage::ImageLuma8(gray).into_rgb8()
        }
        (2, PixelLayout::Yuyv) => {
            if frame.width % 2 != 0 {
                return Err(unsupported(&frame, "YUYV width must be even"));
            }
            let (width, height) = (frame.width, frame.height);
            let rgb = yuyv_to_rgb(&packed(frame)?);
            RgbImage::from_raw(width, height, rgb)
                .ok_or_else(|| NormalizeError::UnsupportedFormat("YUYV buffer size".into()))?
        }
        (4, PixelLayout::Rgba32) => {
            let (width, height) = (frame.width, frame.height);
            let rgba = RgbaImage::from_raw(width, height, packed(frame)?)
                .ok_or_else(|| NormalizeError::UnsupportedFormat("RGBA buffer size".into()))?;
            DynamicImage::ImageRgba8(rgba).into_rgb8()
        }
        (4, PixelLayout::Bgra32) => {
            let (width, height) = (frame.width, frame.height);
            let rgb = packed(frame)?
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect();
            RgbImage::from_raw(width, height, rgb)
                .ok_or_else(|| NormalizeError::UnsupportedFormat("BGRA buffer size".into()))?
        }
        (3, PixelLayout::Bgr24) => {
            let (width, height) = (frame.width, frame.height);
            let mut rgb = packed(frame)?;
            for px in rgb.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            RgbImage::from_raw(width, height, rgb)
                .ok_or_else(|| NormalizeError::UnsupportedFormat("BGR buffer size".into()))?
        }
        (3, PixelLayout::Rgb24) => {
            let (width, height) = (frame.width, frame.height);
            RgbImage::from_raw(width, height, packed(frame)?)
                .ok_or_else(|| NormalizeError::UnsupportedFormat("RGB buffer size".into()))?
        }
        _ => return Err(unsupported(&frame, "unrecognized channel/layout combination")),
    };
    Ok(image)
}

/// Tightly packed pixel bytes of `frame`, copying only when rows are padded.
fn packed(frame: RawFrame) -> Result<Vec<u8>, NormalizeError> {
    let row = frame
        .row_bytes()
        .ok_or_else(|| unsupported(&frame, "unknown bytes per pixel"))?;
    let height = frame.height as usize;
    if frame.stride < row {
        return Err(unsupported(&frame, "stride shorter than a row"));
    }
    // The last row does not need its padding.
    let needed = frame.stride * (height - 1) + row;
    if frame.data.len() < needed {
        return Err(unsupported(&frame, "buffer shorter than its shape"));
    }

    if frame.stride == row {
        let mut data = frame.data;
        data.truncate(row * height);
        return Ok(data);
    }

    let mut data = Vec::with_capacity(row * height);
    for y in 0..height {
        let start = y * frame.stride;
        data.extend_from_slice(&frame.data[start..start + row]);
    }
    Ok(data)
}

// ITU-R BT.601 limited-range coefficients in 20-bit fixed point.
const CY: i32 = 1_220_542;
const CVR: i32 = 1_673_527;
const CVG: i32 = -852_492;
const CUG: i32 = -409_993;
const CUB: i32 = 2_116_026;
const SHIFT: i32 = 20;
const ROUND: i32 = 1 << (SHIFT - 1);

fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for px in yuyv.chunks_exact(4) {
        let u = px[1] as i32 - 128;
        let v = px[3] as i32 - 128;
        let r_off = ROUND + CVR * v;
        let g_off = ROUND + CVG * v + CUG * u;
        let b_off = ROUND + CUB * u;
        for y in [px[0], px[2]] {
            let y = (y as i32 - 16).max(0) * CY;
            rgb.push(clamp_u8((y + r_off) >> SHIFT));
            rgb.push(clamp_u8((y + g_off) >> SHIFT));
            rgb.push(clamp_u8((y + b_off) >> SHIFT));
        }
    }
    rgb
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
