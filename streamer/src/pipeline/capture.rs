use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camstream_common::config::PipelineConfig;
use camstream_common::frame::now_ms;
use tracing::{debug, info, warn};

use super::cell::FrameCell;
use super::encode::{EncodeError, FrameEncoder};
use super::normalize::{normalize, NormalizeError};
use crate::camera::{Camera, CameraError};
use crate::session::StreamingState;

/// Camera slot shared between the session and its capture loop. `None` once
/// the session has released the device.
pub type SharedCamera = Arc<Mutex<Option<Box<dyn Camera>>>>;

pub(crate) fn lock_camera(camera: &SharedCamera) -> MutexGuard<'_, Option<Box<dyn Camera>>> {
    camera.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Why a single iteration produced no frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Capture(#[from] CameraError),
    #[error(transparent)]
    Unsupported(#[from] NormalizeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("camera released")]
    Released,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub captured: u64,
    pub published: u64,
    pub capture_errors: u64,
    pub unsupported: u64,
    pub encode_errors: u64,
    /// Times the first-frame shape was logged; never more than one.
    pub shapes_logged: u64,
}

/// Background capture → normalize → encode → publish loop.
pub struct CaptureLoop {
    camera: SharedCamera,
    cell: Arc<FrameCell>,
    state: Arc<StreamingState>,
    encoder: FrameEncoder,
    frame_interval: Duration,
    retry_delay: Duration,
}

impl CaptureLoop {
    pub fn new(
        camera: SharedCamera,
        cell: Arc<FrameCell>,
        state: Arc<StreamingState>,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            camera,
            cell,
            state,
            encoder: FrameEncoder::new(pipeline.jpeg_quality),
            frame_interval: pipeline.frame_interval(),
            retry_delay: pipeline.capture_retry(),
        }
    }

    /// Run the loop on a dedicated `capture` thread.
    pub fn spawn(self) -> io::Result<JoinHandle<LoopStats>> {
        thread::Builder::new()
            .name("capture".into())
            .spawn(move || self.run())
    }

    /// Loop until streaming is switched off or the camera is released.
    /// Per-frame failures never end the loop.
    pub fn run(self) -> LoopStats {
        let mut stats = LoopStats::default();
        info!(quality = self.encoder.quality(), "capture loop started");

        while self.state.is_streaming() {
            match self.process_one(&mut stats) {
                Ok(seq) => {
                    stats.published += 1;
                    if seq % 100 == 0 {
                        debug!(seq, ?stats, "frames published");
                    }
                }
                Err(FrameError::Released) => break,
                Err(FrameError::Encode(e)) => {
                    stats.encode_errors += 1;
                    warn!(error = %e, "dropping frame");
                }
                Err(e @ (FrameError::Capture(_) | FrameError::Unsupported(_))) => {
                    if matches!(e, FrameError::Unsupported(_)) {
                        stats.unsupported += 1;
                    } else {
                        stats.capture_errors += 1;
                    }
                    warn!(error = %e, retry_ms = self.retry_delay.as_millis() as u64, "frame capture error");
                    thread::sleep(self.retry_delay);
                    continue;
                }
            }
            thread::sleep(self.frame_interval);
        }

        info!(
            captured = stats.captured,
            published = stats.published,
            capture_errors = stats.capture_errors,
            unsupported = stats.unsupported,
            encode_errors = stats.encode_errors,
            "capture loop stopped"
        );
        stats
    }

    /// One full iteration. The camera lock is held until the frame is
    /// published, so a concurrent release waits for the in-flight frame and
    /// clears the cell after it.
    fn process_one(&self, stats: &mut LoopStats) -> Result<u64, FrameError> {
        let mut slot = lock_camera(&self.camera);
        let camera = slot.as_mut().ok_or(FrameError::Released)?;

        let raw = camera.capture_frame()?;
        let captured_at_ms = now_ms();
        stats.captured += 1;
        if stats.shapes_logged == 0 {
            info!(
                camera = camera.name(),
                width = raw.width,
                height = raw.height,
                channels = raw.channels,
                layout = %raw.layout,
                stride = raw.stride,
                contiguous = raw.is_contiguous(),
                bytes = raw.data.len(),
                "first frame shape"
            );
            stats.shapes_logged += 1;
        }

        let frame = normalize(raw)?;
        let encoded = self.encoder.encode(&frame, captured_at_ms)?;

        if !self.state.is_streaming() {
            return Err(FrameError::Released);
        }
        let bytes = encoded.len();
        let age_ms = encoded.age_ms(now_ms());
        let seq = self.cell.publish(encoded);
        debug!(seq, bytes, age_ms, "frame published");
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::ScriptedCamera;
    use crate::camera::test_pattern::TestPatternCamera;
    use camstream_common::frame::PixelLayout;
    use std::time::Instant;

    fn fast_pipeline() -> PipelineConfig {
        PipelineConfig {
            frame_interval_ms: 5,
            capture_retry_ms: 5,
            ..PipelineConfig::default()
        }
    }

    fn started(mut camera: impl Camera + 'static, layout: PixelLayout) -> SharedCamera {
        camera.configure(32, 16, layout).unwrap();
        camera.start().unwrap();
        Arc::new(Mutex::new(Some(Box::new(camera) as Box<dyn Camera>)))
    }

    fn wait_for_frame(cell: &FrameCell) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cell.read().is_some() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn survives_consecutive_capture_failures() {
        let camera = ScriptedCamera::new(3);
        let captures = Arc::clone(&camera.captures);
        let shared = started(camera, PixelLayout::Rgb24);
        let cell = Arc::new(FrameCell::new());
        let state = Arc::new(StreamingState::default());
        state.set_streaming(true);

        let handle = CaptureLoop::new(shared, Arc::clone(&cell), Arc::clone(&state), &fast_pipeline())
            .spawn()
            .unwrap();

        assert!(wait_for_frame(&cell));
        assert!(captures.load(std::sync::atomic::Ordering::SeqCst) >= 4);
        assert!(!handle.is_finished());

        state.set_streaming(false);
        let stats = handle.join().unwrap();
        assert_eq!(stats.capture_errors, 3);
        assert_eq!(stats.shapes_logged, 1);
        assert!(stats.published >= 1);
    }

    #[test]
    fn publishes_jpeg_for_each_layout() {
        for layout in [PixelLayout::Gray8, PixelLayout::Yuyv, PixelLayout::Bgra32, PixelLayout::Bgr24] {
            let cell = Arc::new(FrameCell::new());
            let state = Arc::new(StreamingState::default());
            state.set_streaming(true);
            let handle = CaptureLoop::new(
                started(TestPatternCamera::new(), layout),
                Arc::clone(&cell),
                Arc::clone(&state),
                &fast_pipeline(),
            )
            .spawn()
            .unwrap();

            assert!(wait_for_frame(&cell), "no frame for {layout}");
            state.set_streaming(false);
            handle.join().unwrap();

            let frame = cell.read().unwrap();
            let decoded = image::load_from_memory_with_format(&frame.jpeg, image::ImageFormat::Jpeg).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (32, 16));
        }
    }

    fn wait_for_seq(cell: &FrameCell, seq: u64) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cell.read().is_some_and(|frame| frame.seq >= seq) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn skips_unsupported_frames_and_recovers() {
        let mut camera = ScriptedCamera::new(0);
        camera.unsupported_left = 3;
        let shared = started(camera, PixelLayout::Rgb24);
        let cell = Arc::new(FrameCell::new());
        let state = Arc::new(StreamingState::default());
        state.set_streaming(true);

        let handle = CaptureLoop::new(shared, Arc::clone(&cell), Arc::clone(&state), &fast_pipeline())
            .spawn()
            .unwrap();

        assert!(wait_for_frame(&cell));
        assert!(!handle.is_finished());
        let frame = cell.read().unwrap();
        let decoded = image::load_from_memory_with_format(&frame.jpeg, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));

        state.set_streaming(false);
        let stats = handle.join().unwrap();
        assert_eq!(stats.unsupported, 3);
        assert_eq!(stats.capture_errors, 0);
        assert!(stats.published >= 1);
    }

    #[test]
    fn drops_frames_that_fail_to_encode() {
        let mut camera = ScriptedCamera::new(0);
        camera.oversized_left = 2;
        let shared = started(camera, PixelLayout::Rgb24);
        let cell = Arc::new(FrameCell::new());
        let state = Arc::new(StreamingState::default());
        state.set_streaming(true);

        let handle = CaptureLoop::new(shared, Arc::clone(&cell), Arc::clone(&state), &fast_pipeline())
            .spawn()
            .unwrap();

        assert!(wait_for_frame(&cell));
        assert!(!handle.is_finished());

        state.set_streaming(false);
        let stats = handle.join().unwrap();
        assert_eq!(stats.encode_errors, 2);
        assert_eq!(stats.unsupported, 0);
        assert!(stats.published >= 1);
        // The rejected frames never reached the cell.
        assert_eq!(cell.read().unwrap().seq, stats.published);
    }

    #[test]
    fn logs_first_frame_shape_once() {
        // The first captures fail, so the shape comes from a later frame.
        let shared = started(ScriptedCamera::new(2), PixelLayout::Bgr24);
        let cell = Arc::new(FrameCell::new());
        let state = Arc::new(StreamingState::default());
        state.set_streaming(true);

        let handle = CaptureLoop::new(shared, Arc::clone(&cell), Arc::clone(&state), &fast_pipeline())
            .spawn()
            .unwrap();

        assert!(wait_for_seq(&cell, 5));
        state.set_streaming(false);
        let stats = handle.join().unwrap();
        assert_eq!(stats.capture_errors, 2);
        assert!(stats.captured >= 5);
        assert_eq!(stats.shapes_logged, 1);
    }

    #[test]
    fn stamps_capture_time() {
        let before = now_ms();
        let shared = started(TestPatternCamera::new(), PixelLayout::Rgb24);
        let cell = Arc::new(FrameCell::new());
        let state = Arc::new(StreamingState::default());
        state.set_streaming(true);
        let handle = CaptureLoop::new(shared, Arc::clone(&cell), Arc::clone(&state), &fast_pipeline())
            .spawn()
            .unwrap();

        assert!(wait_for_frame(&cell));
        state.set_streaming(false);
        handle.join().unwrap();

        let frame = cell.read().unwrap();
        assert!(frame.captured_at_ms >= before);
        assert!(frame.captured_at_ms <= now_ms());
    }

    #[test]
    fn exits_when_camera_released() {
        let shared = started(TestPatternCamera::new(), PixelLayout::Rgb24);
        let cell = Arc::new(FrameCell::new());
        let state = Arc::new(StreamingState::default());
        state.set_streaming(true);
        let handle = CaptureLoop::new(Arc::clone(&shared), Arc::clone(&cell), state, &fast_pipeline())
            .spawn()
            .unwrap();

        assert!(wait_for_frame(&cell));
        lock_camera(&shared).take();
        handle.join().unwrap();
    }

    #[test]
    fn does_not_run_when_not_streaming() {
        let shared = started(TestPatternCamera::new(), PixelLayout::Rgb24);
        let cell = Arc::new(FrameCell::new());
        let state = Arc::new(StreamingState::default());
        let stats = CaptureLoop::new(shared, Arc::clone(&cell), state, &fast_pipeline()).run();
        assert_eq!(stats, LoopStats::default());
        assert!(cell.read().is_none());
    }
}
