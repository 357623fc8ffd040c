use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use camstream_common::config::{CameraConfig, PipelineConfig};
use camstream_common::frame::PixelLayout;
use tracing::{error, info, warn};

use crate::camera::{self, Camera, CameraError};
use crate::pipeline::capture::{lock_camera, CaptureLoop, SharedCamera};
use crate::pipeline::cell::FrameCell;

/// Produces a fresh, unconfigured camera handle for each `start`.
pub type CameraOpener = Box<dyn Fn() -> Result<Box<dyn Camera>, CameraError> + Send + Sync>;

/// Process-wide flags, written only by [`CameraSession`].
#[derive(Debug, Default)]
pub struct StreamingState {
    streaming: AtomicBool,
    camera_active: AtomicBool,
}

impl StreamingState {
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn is_camera_active(&self) -> bool {
        self.camera_active.load(Ordering::Acquire)
    }

    pub(crate) fn set_streaming(&self, value: bool) {
        self.streaming.store(value, Ordering::Release);
    }

    fn set_camera_active(&self, value: bool) {
        self.camera_active.store(value, Ordering::Release);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("camera initialization failed: {0}")]
    CameraInit(#[source] CameraError),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("camera is already streaming")]
    AlreadyStreaming,
}

/// Owns the camera, the frame cell and the streaming flags, and sequences
/// startup and teardown of the capture loop.
///
/// `start` and `stop` block (camera I/O, grace period); call them from
/// `spawn_blocking` in async code.
pub struct CameraSession {
    opener: CameraOpener,
    layout: PixelLayout,
    pipeline: PipelineConfig,
    state: Arc<StreamingState>,
    cell: Arc<FrameCell>,
    // Replaced on every start, so a loop left over from an earlier run only
    // ever sees its own, released, slot.
    camera: Mutex<SharedCamera>,
    lifecycle: Mutex<()>,
}

impl CameraSession {
    pub fn new(opener: CameraOpener, layout: PixelLayout, pipeline: PipelineConfig) -> Self {
        Self {
            opener,
            layout,
            pipeline,
            state: Arc::new(StreamingState::default()),
            cell: Arc::new(FrameCell::new()),
            camera: Mutex::new(Arc::new(Mutex::new(None))),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn from_config(camera: &CameraConfig, pipeline: PipelineConfig) -> Self {
        let layout = camera.pixel_format;
        let config = camera.clone();
        Self::new(Box::new(move || camera::open(&config)), layout, pipeline)
    }

    pub fn state(&self) -> &StreamingState {
        &self.state
    }

    pub fn cell(&self) -> &FrameCell {
        &self.cell
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    /// Open and start the camera, then spawn the capture loop.
    ///
    /// Any failure tears down whatever was set up before returning.
    pub fn start(&self, width: u32, height: u32) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().unwrap_or_else(|p| p.into_inner());
        if self.state.is_streaming() {
            return Err(SessionError::AlreadyStreaming);
        }

        info!(width, height, layout = %self.layout, "starting camera");
        match self.try_start(width, height) {
            Ok(()) => {
                info!("camera started successfully");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to start camera");
                self.release();
                Err(e)
            }
        }
    }

    fn current_camera(&self) -> SharedCamera {
        Arc::clone(&self.camera.lock().unwrap_or_else(|p| p.into_inner()))
    }

    fn try_start(&self, width: u32, height: u32) -> Result<(), SessionError> {
        let camera = (self.opener)().map_err(SessionError::CameraInit)?;
        let shared: SharedCamera = Arc::new(Mutex::new(Some(camera)));
        *self.camera.lock().unwrap_or_else(|p| p.into_inner()) = Arc::clone(&shared);
        self.state.set_camera_active(true);

        if let Some(camera) = lock_camera(&shared).as_mut() {
            camera
                .configure(width, height, self.layout)
                .map_err(SessionError::CameraInit)?;
            camera.start().map_err(SessionError::CameraInit)?;
        }

        self.state.set_streaming(true);
        // Detached: the loop ends on its own once streaming is cleared.
        CaptureLoop::new(
            shared,
            Arc::clone(&self.cell),
            Arc::clone(&self.state),
            &self.pipeline,
        )
        .spawn()
        .map_err(SessionError::Spawn)?;
        Ok(())
    }

    /// Stop streaming and release the camera. Safe to call repeatedly.
    pub fn stop(&self) {
        let _guard = self.lifecycle.lock().unwrap_or_else(|p| p.into_inner());
        self.release();
    }

    fn release(&self) {
        let was_streaming = self.state.streaming.swap(false, Ordering::AcqRel);
        if was_streaming {
            // Let the capture loop see the flag and finish its frame.
            thread::sleep(self.pipeline.stop_grace());
        }

        let camera = lock_camera(&self.current_camera()).take();
        if let Some(mut camera) = camera {
            if let Err(e) = camera.stop() {
                warn!(camera = camera.name(), error = %e, "error stopping camera");
            }
            if let Err(e) = camera.close() {
                error!(camera = camera.name(), error = %e, "error closing camera");
            }
            info!("camera stopped");
        }

        self.cell.clear();
        self.state.set_camera_active(false);
    }
}
