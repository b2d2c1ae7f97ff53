//! Transcription quality and timing evaluation: WER/CER against a
//! reference text, real-time factor, latency and confidence statistics,
//! optional VAD accuracy, and report export in text/JSON/CSV form.

pub mod levenshtein;
pub mod manager;
pub mod report;
pub mod text;

pub use levenshtein::{calculate_cer, calculate_wer, edit_ops, EditOps};
pub use manager::BenchmarkManager;
pub use report::{
    export_results, BenchmarkResults, ReportFormat, SegmentKind, TranscriptionSegment,
};
pub use text::{normalize, tokenize};
