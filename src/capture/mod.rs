pub mod frame;
pub mod queue;
pub mod receiver;
pub mod sim;
pub mod source;
pub mod timecode;

pub use frame::{DisplayMode, Frame, PixelFormat, ScanMode, FLICKS_PER_SECOND, TIMECODE_NONE};
pub use queue::MAX_QUEUE_LEN;
pub use receiver::{FrameDataGuard, Receiver, ReceiverState};
pub use source::{CaptureSource, FrameSink, StartError, VideoInput};
