//! Vosk-backed implementation of the `SpeechEngine` seam: a thread-safe,
//! chunked driver around the single-threaded Vosk recognizer.

pub mod driver;

pub use driver::VoskEngine;
