//! Software capture source.
//!
//! Stands in for a hardware driver: enumerates devices and display modes by
//! ordinal index and delivers sink callbacks from whatever thread calls the
//! `deliver_*` methods, which plays the role of the driver's callback
//! thread. Honors the driver contract that `stop_streams` is synchronous:
//! once it returns, no callback is in flight and none will start.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use super::frame::{DisplayMode, PixelFormat};
use super::source::{
    ArrivedFrame, CaptureSource, DetectedFormatFlags, FrameSink, StartError, VideoInput,
};
use super::timecode::TimecodeSources;

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct InputState {
    sink: Option<Arc<dyn FrameSink>>,
    enabled: Option<(DisplayMode, PixelFormat)>,
    streaming: bool,
    busy: bool,
    enable_calls: u32,
    flush_calls: u32,
    enable_delay: Duration,
}

/// The input capability of one simulated device.
pub struct SimInput {
    modes: Vec<DisplayMode>,
    state: Mutex<InputState>,
    /// Held for the duration of each sink callback so `stop_streams` can
    /// wait out in-flight deliveries.
    callback_gate: Mutex<()>,
}

impl SimInput {
    fn new(modes: Vec<DisplayMode>) -> Self {
        Self {
            modes,
            state: Mutex::new(InputState {
                sink: None,
                enabled: None,
                streaming: false,
                busy: false,
                enable_calls: 0,
                flush_calls: 0,
                enable_delay: Duration::ZERO,
            }),
            callback_gate: Mutex::new(()),
        }
    }

    /// Mark the device as claimed by another process; `enable` then fails.
    pub fn set_busy(&self, busy: bool) {
        lock_recover(&self.state).busy = busy;
    }

    /// Artificial latency inside `enable`, for exercising reconfiguration
    /// races.
    pub fn set_enable_delay(&self, delay: Duration) {
        lock_recover(&self.state).enable_delay = delay;
    }

    pub fn has_sink(&self) -> bool {
        lock_recover(&self.state).sink.is_some()
    }

    /// Currently enabled mode and pixel format, if any.
    pub fn enabled(&self) -> Option<(DisplayMode, PixelFormat)> {
        lock_recover(&self.state).enabled.clone()
    }

    pub fn is_streaming(&self) -> bool {
        lock_recover(&self.state).streaming
    }

    pub fn enable_count(&self) -> u32 {
        lock_recover(&self.state).enable_calls
    }

    pub fn flush_count(&self) -> u32 {
        lock_recover(&self.state).flush_calls
    }

    /// Byte size of one frame under the currently enabled configuration.
    pub fn enabled_frame_size(&self) -> Option<usize> {
        lock_recover(&self.state)
            .enabled
            .as_ref()
            .map(|(mode, pf)| pf.frame_byte_size(mode.width, mode.height))
    }

    /// Deliver one frame to the registered sink, as the driver thread
    /// would. Returns `false` when not streaming or no sink is registered.
    pub fn deliver_frame(
        &self,
        data: &[u8],
        row_bytes: usize,
        height: u32,
        timecodes: TimecodeSources,
    ) -> bool {
        let _in_callback = lock_recover(&self.callback_gate);
        let sink = {
            let state = lock_recover(&self.state);
            if !state.streaming {
                return false;
            }
            match state.sink.clone() {
                Some(sink) => sink,
                None => return false,
            }
        };
        sink.frame_arrived(ArrivedFrame {
            data,
            row_bytes,
            height,
            timecodes,
        });
        true
    }

    /// Deliver a format-change notification. Returns `false` when no sink
    /// is registered or streaming is stopped.
    pub fn deliver_format_change(&self, mode: DisplayMode, flags: DetectedFormatFlags) -> bool {
        let _in_callback = lock_recover(&self.callback_gate);
        let sink = {
            let state = lock_recover(&self.state);
            if !state.streaming {
                return false;
            }
            match state.sink.clone() {
                Some(sink) => sink,
                None => return false,
            }
        };
        sink.format_changed(mode, flags);
        true
    }
}

impl VideoInput for SimInput {
    fn display_modes(&self) -> Vec<DisplayMode> {
        self.modes.clone()
    }

    fn set_sink(&self, sink: Option<Arc<dyn FrameSink>>) {
        lock_recover(&self.state).sink = sink;
    }

    fn enable(
        &self,
        mode: &DisplayMode,
        pixel_format: PixelFormat,
        _format_detection: bool,
    ) -> Result<(), StartError> {
        let delay = lock_recover(&self.state).enable_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = lock_recover(&self.state);
        state.enable_calls += 1;
        if state.busy {
            return Err(StartError::DeviceBusy);
        }
        state.enabled = Some((mode.clone(), pixel_format));
        debug!(mode = %mode.name, "sim input enabled");
        Ok(())
    }

    fn disable(&self) {
        let mut state = lock_recover(&self.state);
        state.enabled = None;
        state.streaming = false;
    }

    fn start_streams(&self) {
        lock_recover(&self.state).streaming = true;
    }

    fn stop_streams(&self) {
        lock_recover(&self.state).streaming = false;
        // Wait out any delivery that saw the flag before we cleared it.
        drop(lock_recover(&self.callback_gate));
    }

    fn pause_streams(&self) {
        lock_recover(&self.state).streaming = false;
    }

    fn flush_streams(&self) {
        lock_recover(&self.state).flush_calls += 1;
    }
}

struct SimDevice {
    name: String,
    input: Option<Arc<SimInput>>,
}

/// A simulated capture driver holding an ordered set of devices.
pub struct SimSource {
    devices: Vec<SimDevice>,
    available: bool,
}

impl SimSource {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            available: true,
        }
    }

    /// A source whose driver is not installed; every open fails.
    pub fn unavailable() -> Self {
        Self {
            devices: Vec::new(),
            available: false,
        }
    }

    /// Add a device with input capability. The returned handle is how tests
    /// and the demo inject driver-side events.
    pub fn add_device(&mut self, name: &str, modes: Vec<DisplayMode>) -> Arc<SimInput> {
        let input = Arc::new(SimInput::new(modes));
        self.devices.push(SimDevice {
            name: name.into(),
            input: Some(Arc::clone(&input)),
        });
        input
    }

    /// Add an output-only device (no input capability).
    pub fn add_device_without_input(&mut self, name: &str) {
        self.devices.push(SimDevice {
            name: name.into(),
            input: None,
        });
    }
}

impl Default for SimSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for SimSource {
    fn device_count(&self) -> usize {
        if self.available {
            self.devices.len()
        } else {
            0
        }
    }

    fn device_name(&self, index: usize) -> Option<String> {
        if !self.available {
            return None;
        }
        self.devices.get(index).map(|d| d.name.clone())
    }

    fn open_input(&self, index: usize) -> Result<Arc<dyn VideoInput>, StartError> {
        if !self.available {
            return Err(StartError::DriverNotFound);
        }
        let device = self
            .devices
            .get(index)
            .ok_or(StartError::InvalidDeviceIndex(index))?;
        let input = device.input.as_ref().ok_or(StartError::NoInputCapability)?;
        Ok(Arc::clone(input) as Arc<dyn VideoInput>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::ScanMode;

    fn mode() -> DisplayMode {
        DisplayMode {
            name: "sim".into(),
            width: 8,
            height: 4,
            frame_duration: 1000,
            frame_scale: 60000,
            scan: ScanMode::Progressive,
        }
    }

    #[test]
    fn unavailable_driver_reports_not_found() {
        let source = SimSource::unavailable();
        assert_eq!(source.device_count(), 0);
        let err = source.open_input(0).map(|_| ()).expect_err("driver missing");
        assert_eq!(err, StartError::DriverNotFound);
    }

    #[test]
    fn delivery_requires_streaming() {
        let mut source = SimSource::new();
        let input = source.add_device("dev", vec![mode()]);
        // No sink, not streaming.
        assert!(!input.deliver_frame(&[0; 64], 16, 4, TimecodeSources::default()));
        input.start_streams();
        // Streaming but still no sink.
        assert!(!input.deliver_frame(&[0; 64], 16, 4, TimecodeSources::default()));
    }
}
