//! Realtime audio capture pipeline: a cpal input stream accumulates
//! fixed-duration PCM buffers and hands them over a wait-free SPSC queue
//! to a consumer worker thread.

pub mod accumulator;
pub mod capture;
pub mod device;
pub mod queue;

pub use accumulator::{FrameAccumulator, PushResult};
pub use capture::{AudioCallback, CaptureConfig, CaptureSource};
pub use device::{DeviceInfo, DeviceManager};
pub use queue::{audio_queue, BufferConsumer, BufferProducer};

/// Interleaved signed 16-bit PCM samples, native-endian in memory.
pub type PcmBuffer = Vec<i16>;
