use camstream_common::frame::{PixelLayout, RawFrame};
use tracing::debug;

use super::{Camera, CameraError};

/// Synthetic camera producing a diagonal gradient that scrolls one pixel per
/// frame. Emits whichever layout it was configured with, so every normalizer
/// path can be exercised without hardware.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    layout: PixelLayout,
    started: bool,
    closed: bool,
    frame_count: u64,
}

impl TestPatternCamera {
    pub fn new() -> Self {
        Self {
            width: 640,
            height: 480,
            layout: PixelLayout::Rgb24,
            started: false,
            closed: false,
            frame_count: 0,
        }
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let width = self.width.max(1);
        let shift = (self.frame_count % width as u64) as u32;
        let r = ((x + shift) % width * 255 / width) as u8;
        let g = (y * 255 / self.height.max(1)) as u8;
        let b = (((x + y + shift) / 4) % 256) as u8;
        [r, g, b]
    }

    fn render(&self) -> Vec<u8> {
        let bpp = self.layout.bytes_per_pixel().unwrap_or(3);
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * bpp);
        for y in 0..self.height {
            match self.layout {
                PixelLayout::Yuyv => {
                    for x in (0..self.width).step_by(2) {
                        let [y0, u0, v0] = rgb_to_yuv(self.pixel(x, y));
                        let [y1, u1, v1] = rgb_to_yuv(self.pixel(x + 1, y));
                        let u = ((u0 as u16 + u1 as u16) / 2) as u8;
                        let v = ((v0 as u16 + v1 as u16) / 2) as u8;
                        data.extend_from_slice(&[y0, u, y1, v]);
                    }
                }
                _ => {
                    for x in 0..self.width {
                        let [r, g, b] = self.pixel(x, y);
                        match self.layout {
                            PixelLayout::Gray8 => {
                                data.push(((r as u16 * 77 + g as u16 * 150 + b as u16 * 29) >> 8) as u8)
                            }
                            PixelLayout::Bgr24 => data.extend_from_slice(&[b, g, r]),
                            PixelLayout::Bgra32 => data.extend_from_slice(&[b, g, r, 255]),
                            PixelLayout::Rgba32 => data.extend_from_slice(&[r, g, b, 255]),
                            _ => data.extend_from_slice(&[r, g, b]),
                        }
                    }
                }
            }
        }
        data
    }
}

impl Default for TestPatternCamera {
    fn default() -> Self {
        Self::new()
    }
}

/// BT.601 limited-range RGB to YUV, the inverse of what the normalizer does.
fn rgb_to_yuv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    [y.clamp(0, 255) as u8, u.clamp(0, 255) as u8, v.clamp(0, 255) as u8]
}

impl Camera for TestPatternCamera {
    fn configure(
        &mut self,
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<(), CameraError> {
        if width == 0 || height == 0 {
            return Err(CameraError::Configure(format!(
                "invalid resolution {width}x{height}"
            )));
        }
        if matches!(layout, PixelLayout::Other(_)) {
            return Err(CameraError::Configure(format!(
                "test pattern cannot emit {layout}"
            )));
        }
        if layout == PixelLayout::Yuyv && width % 2 != 0 {
            return Err(CameraError::Configure(format!(
                "YUYV needs an even width, got {width}"
            )));
        }
        self.width = width;
        self.height = height;
        self.layout = layout;
        debug!(width, height, %layout, "test pattern configured");
        Ok(())
    }

    fn start(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::Start("camera closed".into()));
        }
        self.started = true;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RawFrame, CameraError> {
        if !self.started {
            return Err(CameraError::Capture("capture not started".into()));
        }
        let frame = RawFrame::packed(self.render(), self.width, self.height, self.layout);
        self.frame_count += 1;
        Ok(frame)
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::Stop("camera closed".into()));
        }
        self.started = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.started = false;
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_requires_start() {
        let mut camera = TestPatternCamera::new();
        assert!(matches!(
            camera.capture_frame(),
            Err(CameraError::Capture(_))
        ));
    }

    #[test]
    fn frames_match_configured_shape() {
        for layout in [
            PixelLayout::Gray8,
            PixelLayout::Yuyv,
            PixelLayout::Bgr24,
            PixelLayout::Rgb24,
            PixelLayout::Bgra32,
            PixelLayout::Rgba32,
        ] {
            let mut camera = TestPatternCamera::new();
            camera.configure(8, 4, layout).unwrap();
            camera.start().unwrap();
            let frame = camera.capture_frame().unwrap();
            assert_eq!(frame.layout, layout);
            assert!(frame.is_contiguous());
            assert_eq!(frame.data.len(), frame.stride * 4);
        }
    }

    #[test]
    fn closed_camera_cannot_start_or_stop() {
        let mut camera = TestPatternCamera::new();
        camera.start().unwrap();
        camera.stop().unwrap();
        camera.close().unwrap();
        assert!(matches!(camera.start(), Err(CameraError::Start(_))));
        assert!(matches!(camera.stop(), Err(CameraError::Stop(_))));
        assert!(matches!(camera.capture_frame(), Err(CameraError::Capture(_))));
    }

    #[test]
    fn rejects_odd_yuyv_width() {
        let mut camera = TestPatternCamera::new();
        assert!(camera.configure(7, 4, PixelLayout::Yuyv).is_err());
    }

    #[test]
    fn pattern_moves_between_frames() {
        let mut camera = TestPatternCamera::new();
        camera.configure(16, 2, PixelLayout::Rgb24).unwrap();
        camera.start().unwrap();
        let first = camera.capture_frame().unwrap();
        let second = camera.capture_frame().unwrap();
        assert_ne!(first.data, second.data);
    }
}
