pub mod test_pattern;
#[cfg(feature = "v4l")]
pub mod v4l2;

use camstream_common::config::{CameraBackend, CameraConfig};
use camstream_common::frame::{PixelLayout, RawFrame};

/// A frame source the capture loop can drive.
///
/// Lifecycle: `configure` → `start` → `capture_frame`* → `stop` → `close`.
/// Implementations are owned by exactly one session at a time and are only
/// ever called from one thread at a time.
pub trait Camera: Send {
    fn configure(&mut self, width: u32, height: u32, layout: PixelLayout)
        -> Result<(), CameraError>;

    fn start(&mut self) -> Result<(), CameraError>;

    /// Block until the next frame is available.
    fn capture_frame(&mut self) -> Result<RawFrame, CameraError>;

    fn stop(&mut self) -> Result<(), CameraError>;

    fn close(&mut self) -> Result<(), CameraError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("failed to open camera {0}: {1}")]
    Open(String, String),
    #[error("failed to configure camera: {0}")]
    Configure(String),
    #[error("failed to start capture: {0}")]
    Start(String),
    #[error("frame capture failed: {0}")]
    Capture(String),
    #[error("failed to stop capture: {0}")]
    Stop(String),
    #[error("failed to close camera: {0}")]
    Close(String),
    #[error("camera backend unavailable: {0}")]
    Unavailable(String),
}

/// Open the camera selected by `config`. The returned handle is not yet
/// configured or started.
pub fn open(config: &CameraConfig) -> Result<Box<dyn Camera>, CameraError> {
    match config.backend {
        CameraBackend::TestPattern => Ok(Box::new(test_pattern::TestPatternCamera::new())),
        #[cfg(feature = "v4l")]
        CameraBackend::V4l => Ok(Box::new(v4l2::V4lCamera::open(&config.device)?)),
        #[cfg(not(feature = "v4l"))]
        CameraBackend::V4l => Err(CameraError::Unavailable(format!(
            "built without the `v4l` feature, cannot open {}",
            config.device
        ))),
    }
}
