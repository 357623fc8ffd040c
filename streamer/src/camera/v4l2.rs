use camstream_common::frame::{PixelLayout, RawFrame};
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::prelude::*;
use v4l::video::Capture;

use super::{Camera, CameraError};

const BUFFER_COUNT: u32 = 4;

/// Negotiated capture format, as reported back by the driver.
#[derive(Debug, Clone, Copy)]
struct Negotiated {
    width: u32,
    height: u32,
    layout: PixelLayout,
    stride: usize,
}

/// Video4Linux2 capture device using memory-mapped streaming I/O.
pub struct V4lCamera {
    path: String,
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    format: Option<Negotiated>,
}

impl V4lCamera {
    pub fn open(path: &str) -> Result<Self, CameraError> {
        let device =
            Device::with_path(path).map_err(|e| CameraError::Open(path.to_string(), e.to_string()))?;
        if let Ok(caps) = device.query_caps() {
            info!(device = path, driver = %caps.driver, card = %caps.card, "opened V4L2 device");
        }
        Ok(Self {
            path: path.to_string(),
            device: Some(device),
            stream: None,
            format: None,
        })
    }

    fn device(&self) -> Result<&Device, CameraError> {
        self.device
            .as_ref()
            .ok_or_else(|| CameraError::Unavailable(format!("{} is closed", self.path)))
    }
}

impl Camera for V4lCamera {
    fn configure(
        &mut self,
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<(), CameraError> {
        let device = self.device()?;
        let mut format = device
            .format()
            .map_err(|e| CameraError::Configure(e.to_string()))?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(&layout.fourcc());

        let actual = device
            .set_format(&format)
            .map_err(|e| CameraError::Configure(e.to_string()))?;
        let negotiated = Negotiated {
            width: actual.width,
            height: actual.height,
            layout: PixelLayout::from_fourcc(actual.fourcc.repr),
            stride: actual.stride as usize,
        };

        if negotiated.width != width || negotiated.height != height {
            warn!(
                requested = format!("{width}x{height}"),
                actual = format!("{}x{}", negotiated.width, negotiated.height),
                "camera did not accept requested resolution"
            );
        }
        if negotiated.layout != layout {
            warn!(requested = %layout, actual = %negotiated.layout, "camera negotiated a different pixel format");
        }
        info!(
            width = negotiated.width,
            height = negotiated.height,
            format = %negotiated.layout,
            stride = negotiated.stride,
            "V4L2 format negotiated"
        );

        self.format = Some(negotiated);
        Ok(())
    }

    fn start(&mut self) -> Result<(), CameraError> {
        let stream = MmapStream::with_buffers(self.device()?, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| CameraError::Start(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RawFrame, CameraError> {
        let format = self
            .format
            .ok_or_else(|| CameraError::Capture("camera not configured".into()))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::Capture("stream not started".into()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::Capture(e.to_string()))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };

        Ok(RawFrame {
            data: buf[..used].to_vec(),
            width: format.width,
            height: format.height,
            channels: format.layout.channels().unwrap_or(0),
            layout: format.layout,
            stride: format.stride,
        })
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        // Dropping the stream unmaps the buffers either way.
        if let Some(mut stream) = self.stream.take() {
            stream
                .stop()
                .map_err(|e| CameraError::Stop(format!("VIDIOC_STREAMOFF on {}: {e}", self.path)))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.stream.take();
        self.device.take();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.path
    }
}
