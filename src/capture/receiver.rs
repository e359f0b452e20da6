//! Frame receiver
//!
//! Arrived frames are stored in an internal queue whose only purpose is to
//! absorb the cadence mismatch between the driver's delivery thread and the
//! consumer. Frame-rate matching is done on the application side.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use tracing::{debug, info, trace, warn};

use super::frame::{DisplayMode, Frame, PixelFormat};
use super::queue::{FrameQueue, MAX_QUEUE_LEN};
use super::source::{
    ArrivedFrame, CaptureSource, DetectedFormatFlags, FrameSink, StartError, VideoInput,
};
use super::timecode::decode_timecode;

/// Lifecycle of a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiverState {
    Idle = 0,
    Streaming = 1,
    Reconfiguring = 2,
    Stopped = 3,
}

impl ReceiverState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ReceiverState::Streaming,
            2 => ReceiverState::Reconfiguring,
            3 => ReceiverState::Stopped,
            _ => ReceiverState::Idle,
        }
    }
}

/// Everything the shared mutex guards: queue contents, the current display
/// mode and the session pixel format. Format-name reads go through the same
/// lock because the mode is replaced wholesale during reconfiguration.
struct Shared {
    queue: FrameQueue,
    mode: Option<DisplayMode>,
    pixel_format: PixelFormat,
}

/// Receives frame and format-change notifications from a capture driver and
/// buffers frames for a consumer polling at its own cadence.
///
/// The producer side runs on the driver's callback thread via [`FrameSink`];
/// everything else is meant for the application thread. All operations are
/// synchronous: they either complete immediately or block briefly on the
/// shared lock.
pub struct Receiver {
    /// Self-reference handed to the driver as the event sink.
    weak_self: Weak<Receiver>,
    shared: Mutex<Shared>,
    /// Driver input handle; shared ownership exists only at this boundary.
    input: Mutex<Option<Arc<dyn VideoInput>>>,
    state: AtomicU8,
    /// Single-flight guard serializing overlapping format changes.
    reconfiguring: AtomicBool,
    /// Approximate queue length, readable without the lock.
    queued: CachePadded<AtomicUsize>,
    dropped: CachePadded<AtomicU64>,
    last_error: Mutex<Option<String>>,
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Receiver {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            shared: Mutex::new(Shared {
                queue: FrameQueue::new(),
                mode: None,
                pixel_format: PixelFormat::Yuv8,
            }),
            input: Mutex::new(None),
            state: AtomicU8::new(ReceiverState::Idle as u8),
            reconfiguring: AtomicBool::new(false),
            queued: CachePadded::new(AtomicUsize::new(0)),
            dropped: CachePadded::new(AtomicU64::new(0)),
            last_error: Mutex::new(None),
        })
    }

    // ---- Lifecycle ---------------------------------------------------

    /// Resolve the device and display mode by ordinal index, register this
    /// receiver as the driver's event sink and begin streaming.
    ///
    /// Fails softly: on error nothing is retained, the reason is recorded
    /// for [`Receiver::last_error`], and the caller may retry from scratch.
    pub fn start(
        &self,
        source: &dyn CaptureSource,
        device_index: usize,
        format_index: usize,
        pixel_format: PixelFormat,
    ) -> Result<(), StartError> {
        match self.initialize_input(source, device_index, format_index, pixel_format) {
            Ok(()) => {
                *lock_recover(&self.last_error) = None;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "failed to start capture");
                *lock_recover(&self.last_error) = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn initialize_input(
        &self,
        source: &dyn CaptureSource,
        device_index: usize,
        format_index: usize,
        pixel_format: PixelFormat,
    ) -> Result<(), StartError> {
        if lock_recover(&self.input).is_some() {
            return Err(StartError::DeviceBusy);
        }

        let input = source.open_input(device_index)?;

        let mode = input
            .display_modes()
            .into_iter()
            .nth(format_index)
            .ok_or(StartError::InvalidFormatIndex(format_index))?;

        input.set_sink(Some(Arc::new(SinkHandle(self.weak_self.clone()))));

        // Automatic format detection stays on so the driver reports signal
        // changes through `format_changed`.
        if let Err(err) = input.enable(&mode, pixel_format, true) {
            input.set_sink(None);
            return Err(err);
        }

        info!(
            mode = %mode.name,
            width = mode.width,
            height = mode.height,
            ?pixel_format,
            "capture input enabled"
        );

        {
            let mut shared = lock_recover(&self.shared);
            shared.mode = Some(mode);
            shared.pixel_format = pixel_format;
        }

        input.start_streams();
        *lock_recover(&self.input) = Some(input);
        self.state
            .store(ReceiverState::Streaming as u8, Ordering::Release);
        Ok(())
    }

    /// Halt streaming, deregister the event sink and release the input and
    /// display-mode handles. Idempotent; safe when never started.
    ///
    /// Synchronous: once this returns the driver delivers no further
    /// notifications, so no concurrency hazard outlives it.
    pub fn stop(&self) {
        // Take the handle first and release the input mutex: stopping the
        // streams may wait out an in-flight callback, and that callback can
        // itself need the input handle to reconfigure.
        let input = lock_recover(&self.input).take();
        if let Some(input) = input {
            input.stop_streams();
            input.set_sink(None);
            input.disable();
            info!("capture input stopped");
        }

        lock_recover(&self.shared).mode = None;
        self.state
            .store(ReceiverState::Stopped as u8, Ordering::Release);
    }

    pub fn state(&self) -> ReceiverState {
        ReceiverState::from_u8(self.state.load(Ordering::Acquire))
    }

    // ---- Accessors ----------------------------------------------------

    /// Width and height of the current display mode, or `(0, 0)` when no
    /// input is active.
    pub fn dimensions(&self) -> (u32, u32) {
        let shared = lock_recover(&self.shared);
        shared.mode.as_ref().map_or((0, 0), |m| (m.width, m.height))
    }

    /// Frame duration of the current mode in flicks, or 0 when idle.
    pub fn frame_duration(&self) -> i64 {
        let shared = lock_recover(&self.shared);
        shared
            .mode
            .as_ref()
            .map_or(0, DisplayMode::frame_duration_flicks)
    }

    pub fn is_progressive(&self) -> bool {
        let shared = lock_recover(&self.shared);
        shared.mode.as_ref().is_some_and(DisplayMode::is_progressive)
    }

    /// Expected byte footprint of one frame under the current mode and the
    /// session pixel format.
    pub fn frame_byte_size(&self) -> usize {
        let shared = lock_recover(&self.shared);
        let pixel_format = shared.pixel_format;
        shared
            .mode
            .as_ref()
            .map_or(0, |m| pixel_format.frame_byte_size(m.width, m.height))
    }

    /// Name of the current display mode. Guarded by the same lock as
    /// format-change mutation since the mode may be swapped concurrently.
    pub fn format_name(&self) -> Option<String> {
        let shared = lock_recover(&self.shared);
        shared.mode.as_ref().map(|m| m.name.clone())
    }

    /// Frames discarded because the queue was full. Monotonically
    /// non-decreasing; never an error condition.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Human-readable reason the most recent `start` failed, if it did.
    pub fn last_error(&self) -> Option<String> {
        lock_recover(&self.last_error).clone()
    }

    // ---- Frame queue (consumer side) -----------------------------------

    /// Approximate queue length, read without the lock. For display and
    /// monitoring only.
    pub fn queued_frames(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Scoped exclusive access to the oldest frame's bytes.
    ///
    /// Returns `None` without touching the lock state when the queue is
    /// empty. The returned guard holds the shared lock until dropped, which
    /// stalls the producer thread: keep the read window short.
    pub fn lock_oldest_frame(&self) -> Option<FrameDataGuard<'_>> {
        let shared = lock_recover(&self.shared);
        if shared.queue.is_empty() {
            return None;
        }
        Some(FrameDataGuard { shared })
    }

    /// Remove the oldest frame. No-op when the queue is empty.
    pub fn dequeue_frame(&self) {
        let mut shared = lock_recover(&self.shared);
        shared.queue.pop_oldest();
        self.queued.store(shared.queue.len(), Ordering::Relaxed);
    }

    /// Timecode of the oldest queued frame, or
    /// [`TIMECODE_NONE`](super::frame::TIMECODE_NONE) when the queue is
    /// empty or the frame carried no timecode.
    pub fn oldest_timecode(&self) -> u32 {
        lock_recover(&self.shared).queue.oldest_timecode()
    }
}

/// Scoped view of the oldest queued frame. Holds the receiver's lock for
/// its lifetime; dropping it releases the data for further queue operations.
pub struct FrameDataGuard<'a> {
    shared: MutexGuard<'a, Shared>,
}

impl Deref for FrameDataGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // Non-empty by construction.
        self.shared.queue.oldest().map_or(&[][..], |f| &f.data[..])
    }
}

/// The sink actually registered with the driver. Forwards callbacks to the
/// receiver; anything arriving after the receiver is gone is dropped.
struct SinkHandle(Weak<Receiver>);

impl FrameSink for SinkHandle {
    fn frame_arrived(&self, frame: ArrivedFrame<'_>) {
        if let Some(receiver) = self.0.upgrade() {
            receiver.frame_arrived(frame);
        }
    }

    fn format_changed(&self, mode: DisplayMode, flags: DetectedFormatFlags) {
        if let Some(receiver) = self.0.upgrade() {
            receiver.format_changed(mode, flags);
        }
    }
}

// ---- Driver callbacks (producer side) ----------------------------------

impl FrameSink for Receiver {
    fn frame_arrived(&self, frame: ArrivedFrame<'_>) {
        // Unsynchronized pre-check: when over-queued, skip the copy and the
        // lock entirely so the driver thread never stalls.
        if self.queued.load(Ordering::Relaxed) >= MAX_QUEUE_LEN {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("overqueuing: arrived frame was dropped");
            return;
        }

        debug_assert_eq!(frame.data.len(), frame.row_bytes * frame.height as usize);

        // Copy the driver's buffer before taking the lock; the pointer is
        // only valid for the duration of this callback.
        let data = Bytes::copy_from_slice(frame.data);
        let timecode = decode_timecode(&frame.timecodes);

        let mut shared = lock_recover(&self.shared);
        if !shared.queue.push(Frame { timecode, data }) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("overqueuing: arrived frame was dropped");
            return;
        }
        self.queued.store(shared.queue.len(), Ordering::Relaxed);
    }

    fn format_changed(&self, mode: DisplayMode, flags: DetectedFormatFlags) {
        // Single-flight: a second notification racing the reconfigure
        // sequence below is dropped rather than interleaved.
        if self.reconfiguring.swap(true, Ordering::AcqRel) {
            warn!(
                mode = %mode.name,
                "format change ignored: reconfiguration already in flight"
            );
            return;
        }

        self.state
            .store(ReceiverState::Reconfiguring as u8, Ordering::Release);
        info!(
            mode = %mode.name,
            width = mode.width,
            height = mode.height,
            ycbcr422 = flags.ycbcr422,
            rgb444 = flags.rgb444,
            "video input format changed"
        );

        // Step 1, under lock: swap the mode and flush stale frames. They
        // were captured under the old geometry and cannot be interpreted
        // against the new one. Consumer reads observe either the full old
        // state or the full new state, never a mix.
        let pixel_format = {
            let mut shared = lock_recover(&self.shared);
            let flushed = shared.queue.flush();
            self.queued.store(0, Ordering::Relaxed);
            shared.mode = Some(mode.clone());
            if flushed > 0 {
                debug!(flushed, "flushed stale frames from queue");
            }
            shared.pixel_format
        };

        // Step 2, outside the lock: reconfigure the driver so concurrent
        // consumer reads stay unblocked.
        let input = lock_recover(&self.input).clone();
        if let Some(input) = input {
            input.pause_streams();
            if let Err(err) = input.enable(&mode, pixel_format, true) {
                // Do not leave the input disabled; flush and resume with
                // whatever configuration the driver retained.
                warn!(%err, "re-enabling input after format change failed");
            }
            input.flush_streams();
            input.start_streams();
        }

        self.state
            .store(ReceiverState::Streaming as u8, Ordering::Release);
        self.reconfiguring.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::TIMECODE_NONE;
    use crate::capture::sim::SimSource;
    use crate::capture::timecode::{Timecode, TimecodeSources};

    fn tiny_mode(name: &str, width: u32, height: u32) -> DisplayMode {
        DisplayMode {
            name: name.into(),
            width,
            height,
            frame_duration: 1000,
            frame_scale: 60000,
            scan: crate::capture::frame::ScanMode::Progressive,
        }
    }

    fn started_receiver() -> (Arc<Receiver>, Arc<crate::capture::sim::SimInput>) {
        let mut source = SimSource::new();
        let input = source.add_device(
            "Sim A",
            vec![tiny_mode("tiny8x4", 8, 4), tiny_mode("tiny4x2", 4, 2)],
        );
        let receiver = Receiver::new();
        receiver
            .start(&source, 0, 0, PixelFormat::Yuv8)
            .expect("start");
        (receiver, input)
    }

    fn deliver(receiver: &Receiver, timecode_bcd: u32) {
        // 8x4 Yuv8: 16 bpp -> 64 bytes, 16 bytes per row.
        let data = vec![0u8; 64];
        receiver.frame_arrived(ArrivedFrame {
            data: &data,
            row_bytes: 16,
            height: 4,
            timecodes: TimecodeSources {
                primary: Some(Timecode {
                    bcd: timecode_bcd,
                    drop_frame: false,
                }),
                secondary: None,
            },
        });
    }

    #[test]
    fn arrivals_beyond_capacity_are_dropped_and_counted() {
        let (receiver, _input) = started_receiver();
        for i in 0..12 {
            deliver(&receiver, i);
        }
        assert_eq!(receiver.queued_frames(), MAX_QUEUE_LEN);
        assert_eq!(receiver.dropped_frames(), 4);
        // FIFO: the oldest frame is the first arrival.
        assert_eq!(receiver.oldest_timecode(), 0);
    }

    #[test]
    fn empty_queue_reads_are_benign() {
        let (receiver, _input) = started_receiver();
        assert_eq!(receiver.queued_frames(), 0);
        assert_eq!(receiver.oldest_timecode(), TIMECODE_NONE);
        receiver.dequeue_frame();
        assert_eq!(receiver.queued_frames(), 0);
    }

    #[test]
    fn lock_oldest_on_empty_does_not_hold_the_lock() {
        let (receiver, _input) = started_receiver();
        assert!(receiver.lock_oldest_frame().is_none());
        // Would deadlock here if the failed acquire had kept the lock.
        receiver.dequeue_frame();
        assert_eq!(receiver.oldest_timecode(), TIMECODE_NONE);
    }

    #[test]
    fn scoped_access_reads_oldest_bytes() {
        let (receiver, _input) = started_receiver();
        deliver(&receiver, 0x11);
        deliver(&receiver, 0x22);

        let guard = receiver.lock_oldest_frame().expect("non-empty");
        assert_eq!(guard.len(), 64);
        drop(guard);

        receiver.dequeue_frame();
        assert_eq!(receiver.oldest_timecode(), 0x22);
    }

    #[test]
    fn format_change_flushes_queue_and_swaps_mode() {
        let (receiver, _input) = started_receiver();
        for i in 0..5 {
            deliver(&receiver, i);
        }
        assert_eq!(receiver.dimensions(), (8, 4));

        receiver.format_changed(tiny_mode("tiny4x2", 4, 2), DetectedFormatFlags::default());

        assert_eq!(receiver.queued_frames(), 0);
        assert_eq!(receiver.oldest_timecode(), TIMECODE_NONE);
        assert_eq!(receiver.dimensions(), (4, 2));
        assert_eq!(receiver.format_name().as_deref(), Some("tiny4x2"));
        assert_eq!(receiver.state(), ReceiverState::Streaming);
        // Flushed frames are not counted as drops.
        assert_eq!(receiver.dropped_frames(), 0);
    }

    #[test]
    fn format_change_reenables_with_session_pixel_format() {
        let mut source = SimSource::new();
        let input = source.add_device("Sim A", vec![tiny_mode("a", 8, 4), tiny_mode("b", 4, 2)]);
        let receiver = Receiver::new();
        receiver
            .start(&source, 0, 0, PixelFormat::Bgra8)
            .expect("start");

        receiver.format_changed(tiny_mode("b", 4, 2), DetectedFormatFlags::default());

        let (mode, pixel_format) = input.enabled().expect("still enabled");
        assert_eq!(mode.name, "b");
        assert_eq!(pixel_format, PixelFormat::Bgra8);
        assert_eq!(input.enable_count(), 2);
        assert_eq!(receiver.frame_byte_size(), 4 * 2 * 4);
    }

    #[test]
    fn start_with_invalid_format_index_retains_nothing() {
        let mut source = SimSource::new();
        let input = source.add_device("Sim A", vec![tiny_mode("only", 8, 4)]);
        let receiver = Receiver::new();

        let err = receiver
            .start(&source, 0, 7, PixelFormat::Yuv8)
            .expect_err("format index out of range");
        assert_eq!(err, StartError::InvalidFormatIndex(7));
        assert!(receiver
            .last_error()
            .expect("recorded")
            .contains("invalid format index"));
        assert!(input.enabled().is_none());
        assert_eq!(receiver.state(), ReceiverState::Idle);
        assert_eq!(receiver.dimensions(), (0, 0));
    }

    #[test]
    fn start_with_invalid_device_index_fails() {
        let mut source = SimSource::new();
        source.add_device("Sim A", vec![tiny_mode("only", 8, 4)]);
        let receiver = Receiver::new();

        let err = receiver
            .start(&source, 3, 0, PixelFormat::Yuv8)
            .expect_err("device index out of range");
        assert_eq!(err, StartError::InvalidDeviceIndex(3));
    }

    #[test]
    fn start_on_device_without_input_fails() {
        let mut source = SimSource::new();
        source.add_device_without_input("Sim Monitor");
        let receiver = Receiver::new();

        let err = receiver
            .start(&source, 0, 0, PixelFormat::Yuv8)
            .expect_err("no input capability");
        assert_eq!(err, StartError::NoInputCapability);
    }

    #[test]
    fn start_on_busy_device_fails_and_clears_sink() {
        let mut source = SimSource::new();
        let input = source.add_device("Sim A", vec![tiny_mode("only", 8, 4)]);
        input.set_busy(true);
        let receiver = Receiver::new();

        let err = receiver
            .start(&source, 0, 0, PixelFormat::Yuv8)
            .expect_err("device busy");
        assert_eq!(err, StartError::DeviceBusy);
        assert!(!input.has_sink());
    }

    #[test]
    fn failed_start_allows_retry_from_scratch() {
        let mut source = SimSource::new();
        source.add_device("Sim A", vec![tiny_mode("only", 8, 4)]);
        let receiver = Receiver::new();

        assert!(receiver.start(&source, 0, 7, PixelFormat::Yuv8).is_err());
        receiver
            .start(&source, 0, 0, PixelFormat::Yuv8)
            .expect("retry succeeds");
        assert_eq!(receiver.state(), ReceiverState::Streaming);
        assert!(receiver.last_error().is_none());
    }

    #[test]
    fn stop_is_idempotent() {
        let receiver = Receiver::new();
        receiver.stop(); // never started
        assert_eq!(receiver.state(), ReceiverState::Stopped);

        let (receiver, input) = started_receiver();
        receiver.stop();
        receiver.stop();
        assert_eq!(receiver.state(), ReceiverState::Stopped);
        assert_eq!(receiver.dimensions(), (0, 0));
        assert!(input.enabled().is_none());
        assert!(!input.has_sink());
    }

    #[test]
    fn queued_frames_survive_stop() {
        let (receiver, _input) = started_receiver();
        deliver(&receiver, 0x01);
        receiver.stop();
        // The consumer may still drain what arrived before the stop.
        assert_eq!(receiver.queued_frames(), 1);
        assert_eq!(receiver.oldest_timecode(), 0x01);
    }
}
