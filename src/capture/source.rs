//! Driver-boundary abstractions.
//!
//! The hardware driver is an external collaborator: it enumerates devices
//! and display modes by ordinal index, delivers frame and format-change
//! notifications on a thread it owns, and guarantees silence once
//! `stop_streams` plus `set_sink(None)` have returned. Everything behind
//! these traits is out of scope for the receiver itself; the crate ships a
//! software simulation backend in [`crate::capture::sim`].

use std::sync::Arc;

use thiserror::Error;

use super::frame::{DisplayMode, PixelFormat};
use super::timecode::TimecodeSources;

/// Why a start attempt failed. A failed start is terminal for that attempt;
/// the caller may retry from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("capture driver is not found")]
    DriverNotFound,
    #[error("invalid device index {0}")]
    InvalidDeviceIndex(usize),
    #[error("device has no input capability")]
    NoInputCapability,
    #[error("invalid format index {0}")]
    InvalidFormatIndex(usize),
    #[error("can't open input device (possibly already used)")]
    DeviceBusy,
}

/// Flags reported alongside a format-change notification, describing what
/// the driver detected about the new signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectedFormatFlags {
    pub ycbcr422: bool,
    pub rgb444: bool,
}

/// A driver-owned frame handed to the sink for the duration of one
/// callback. The borrow makes retention past the callback impossible;
/// implementations must copy what they need.
#[derive(Debug, Clone, Copy)]
pub struct ArrivedFrame<'a> {
    pub data: &'a [u8],
    pub row_bytes: usize,
    pub height: u32,
    pub timecodes: TimecodeSources,
}

/// Event sink registered with a video input. Both methods run on the
/// driver's callback thread and must return promptly; neither may report
/// failure back to the driver.
pub trait FrameSink: Send + Sync {
    fn frame_arrived(&self, frame: ArrivedFrame<'_>);
    fn format_changed(&self, mode: DisplayMode, flags: DetectedFormatFlags);
}

/// The input capability of one capture device.
///
/// Shared ownership (`Arc`) exists only at this boundary, mirroring the
/// driver's reference-counted handles; inside the receiver all ownership is
/// exclusive or scoped.
pub trait VideoInput: Send + Sync {
    /// Display modes this input supports, in enumeration order.
    fn display_modes(&self) -> Vec<DisplayMode>;

    /// Register (or with `None`, deregister) the event sink.
    fn set_sink(&self, sink: Option<Arc<dyn FrameSink>>);

    /// Enable video input for the given mode and pixel format.
    /// `format_detection` asks the driver to report signal format changes.
    fn enable(
        &self,
        mode: &DisplayMode,
        pixel_format: PixelFormat,
        format_detection: bool,
    ) -> Result<(), StartError>;

    /// Disable video input. No-op when not enabled.
    fn disable(&self);

    fn start_streams(&self);

    /// Synchronous: once this returns no further sink callbacks occur
    /// (when combined with `set_sink(None)`).
    fn stop_streams(&self);

    fn pause_streams(&self);

    /// Drop any frames buffered inside the driver.
    fn flush_streams(&self);
}

/// A capture driver: a set of devices enumerable by ordinal index.
pub trait CaptureSource {
    fn device_count(&self) -> usize;

    /// Human-readable name of the device at `index`.
    fn device_name(&self, index: usize) -> Option<String>;

    /// Open the input capability of the device at `index`.
    fn open_input(&self, index: usize) -> Result<Arc<dyn VideoInput>, StartError>;
}
