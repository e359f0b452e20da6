use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Sentinel timecode meaning "no timecode present in the frame".
pub const TIMECODE_NONE: u32 = 0xffff_ffff;

/// High-resolution tick rate used for frame durations (flicks).
///
/// 705_600_000 flicks per second divides evenly by every common video
/// frame rate, including the 1001-denominator NTSC family.
pub const FLICKS_PER_SECOND: i64 = 705_600_000;

/// Pixel formats we support
///
/// Fixed for the lifetime of a start/stop session; re-applied verbatim when
/// the input is reconfigured after a format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit YUV 4:2:2, 16 bits per pixel
    Yuv8,
    /// 8-bit BGRA, 32 bits per pixel
    Bgra8,
}

impl PixelFormat {
    pub fn bits_per_pixel(self) -> usize {
        match self {
            PixelFormat::Yuv8 => 16,
            PixelFormat::Bgra8 => 32,
        }
    }

    /// Byte footprint of one full frame at the given geometry.
    pub fn frame_byte_size(self, width: u32, height: u32) -> usize {
        self.bits_per_pixel() * width as usize * height as usize / 8
    }
}

/// Field dominance of a display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    Progressive,
    Interlaced,
}

/// A supported combination of resolution, frame rate and scan type offered
/// by a capture device.
///
/// The receiver owns exactly one of these at a time and replaces it
/// wholesale on a format-change notification; it is never partially mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Frame rate as a rational: `frame_duration / frame_scale` seconds.
    pub frame_duration: i64,
    pub frame_scale: i64,
    pub scan: ScanMode,
}

impl DisplayMode {
    /// Frame duration converted to flicks.
    pub fn frame_duration_flicks(&self) -> i64 {
        FLICKS_PER_SECOND * self.frame_duration / self.frame_scale
    }

    pub fn is_progressive(&self) -> bool {
        self.scan == ScanMode::Progressive
    }
}

/// One captured frame held by the receiver queue.
///
/// The payload is always a copy of the driver's buffer; the driver pointer
/// is only valid for the duration of the arrival callback.
#[derive(Clone)]
pub struct Frame {
    /// Packed BCD timecode, or [`TIMECODE_NONE`].
    pub timecode: u32,
    /// Owned frame bytes.
    pub data: Bytes,
}
