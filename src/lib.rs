pub mod capture;
pub mod utils;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Ordinal index of the capture device among enumerated devices.
    pub device_index: usize,
    /// Ordinal index of the display mode among the device's modes.
    pub format_index: usize,
    pub pixel_format: PixelFormat,
}

/// Demo-loop settings for the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Frames to generate before shutting down.
    pub frames: u32,
    /// Inject a format change after this many generated frames.
    pub format_change_after: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device_index: 0,
                format_index: 0,
                pixel_format: PixelFormat::Yuv8,
            },
            run: RunConfig {
                frames: 120,
                format_change_after: Some(60),
            },
        }
    }
}
