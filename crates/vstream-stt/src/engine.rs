use crate::types::{RecognizerOutput, SttError};

/// The seam between the stream processor and a concrete recognizer.
///
/// Implementations serialize access internally; methods take `&self` so an
/// engine can be shared between the capture worker and transport handlers.
/// Chunk-level engine errors are absorbed by the implementation (logged and
/// reported as an empty outcome) so the stream keeps flowing.
pub trait SpeechEngine: Send + Sync {
    /// Feed PCM (possibly empty) and obtain the recognizer outcome.
    /// With `force_final` and empty input, requests the forced-final
    /// result for any pending utterance.
    fn process(&self, pcm: &[i16], force_final: bool) -> RecognizerOutput;

    /// Clear recognizer state; the next `process` begins a new utterance.
    fn reset(&self);

    /// Constrain recognition to a JSON array of phrases; an empty string
    /// clears constraints.
    fn set_grammar(&self, grammar: &str) -> Result<(), SttError>;

    fn set_max_alternatives(&self, max: u32);

    fn set_nlsml_output(&self, enable: bool);

    /// Whether a non-empty partial is currently pending.
    fn has_partial_result(&self) -> bool;

    /// Monotonic count of samples fed through `process`. Never reset.
    fn total_samples(&self) -> u64;

    /// Whether the engine was configured to emit partial results.
    fn partials_enabled(&self) -> bool;
}
