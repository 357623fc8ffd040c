use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::frame::PixelLayout;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraBackend {
    /// Video4Linux2 capture device (requires the `v4l` feature).
    V4l,
    /// Synthetic moving gradient, no hardware needed.
    TestPattern,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_backend")]
    pub backend: CameraBackend,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Layout requested from the device. Drivers may negotiate another one;
    /// the normalizer handles whatever actually arrives.
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelLayout,
}

/// Timing and quality policy for the capture loop and stream readers.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_capture_retry_ms")]
    pub capture_retry_ms: u64,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_stream_poll_ms")]
    pub stream_poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            device: default_device(),
            width: default_width(),
            height: default_height(),
            pixel_format: default_pixel_format(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            frame_interval_ms: default_frame_interval_ms(),
            capture_retry_ms: default_capture_retry_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            stream_poll_ms: default_stream_poll_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PipelineConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn stream_poll(&self) -> Duration {
        Duration::from_millis(self.stream_poll_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}
fn default_backend() -> CameraBackend {
    CameraBackend::V4l
}
fn default_device() -> String {
    "/dev/video0".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_pixel_format() -> PixelLayout {
    PixelLayout::Rgb24
}
fn default_jpeg_quality() -> u8 {
    50
}
fn default_frame_interval_ms() -> u64 {
    50
}
fn default_capture_retry_ms() -> u64 {
    100
}
fn default_stop_grace_ms() -> u64 {
    200
}
fn default_stream_poll_ms() -> u64 {
    50
}
fn default_log_level() -> String {
    "info".into()
}
