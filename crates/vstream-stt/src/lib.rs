//! Speech-to-text core: event types, the recognizer seam, and the stream
//! processor that turns per-chunk recognizer output into deduplicated
//! partial/final transcription events.

pub mod engine;
pub mod processor;
pub mod sink;
pub mod types;

pub use engine::SpeechEngine;
pub use processor::{ProcessorConfig, StreamProcessor};
pub use sink::{NullSink, TranscriptionSink};
pub use types::*;
