//! Bounded FIFO of captured frames.
//!
//! The queue only exists to absorb scheduling jitter between the driver
//! thread and the consumer; it never blocks the producer. Frame-rate
//! matching is the consumer's problem.

use std::collections::VecDeque;

use super::frame::{Frame, TIMECODE_NONE};

/// Maximum number of frames buffered before arrivals are dropped.
pub const MAX_QUEUE_LEN: usize = 8;

/// Bounded frame FIFO. Not synchronized itself; the receiver wraps it in
/// the mutex that also guards the display mode.
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::with_capacity(MAX_QUEUE_LEN),
            capacity: MAX_QUEUE_LEN,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    /// Append a frame. Returns `false` (frame discarded) when full, so the
    /// length never exceeds the capacity.
    pub fn push(&mut self, frame: Frame) -> bool {
        if self.is_full() {
            return false;
        }
        self.frames.push_back(frame);
        true
    }

    /// Remove the oldest frame. No-op when empty.
    pub fn pop_oldest(&mut self) {
        self.frames.pop_front();
    }

    pub fn oldest(&self) -> Option<&Frame> {
        self.frames.front()
    }

    pub fn oldest_timecode(&self) -> u32 {
        self.frames.front().map_or(TIMECODE_NONE, |f| f.timecode)
    }

    /// Discard everything. Returns how many frames were flushed.
    pub fn flush(&mut self) -> usize {
        let flushed = self.frames.len();
        self.frames.clear();
        flushed
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}
