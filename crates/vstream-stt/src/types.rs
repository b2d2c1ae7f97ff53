//! Core types for speech-to-text functionality

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionKind {
    /// Best current hypothesis for an ongoing utterance; may change.
    Partial,
    /// Committed hypothesis for a completed utterance; never revised.
    Final,
}

/// A transcription leaving the core, delivered once per subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionEvent {
    pub text: String,
    pub kind: TranscriptionKind,
    pub session_id: String,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    /// Milliseconds since the Unix epoch.
    pub emitted_at: u64,
}

impl TranscriptionEvent {
    pub fn is_final(&self) -> bool {
        self.kind == TranscriptionKind::Final
    }
}

/// Word-level timing from a final result.
#[derive(Debug, Clone, PartialEq)]
pub struct WordTiming {
    pub word: String,
    /// Start offset in seconds.
    pub start: f32,
    /// End offset in seconds.
    pub end: f32,
    pub conf: f32,
}

/// One entry of an N-best list.
#[derive(Debug, Clone, PartialEq)]
pub struct AlternativeResult {
    pub text: String,
    pub confidence: f32,
}

/// A committed utterance as produced by the recognizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalResult {
    /// May be empty when the utterance contained no recognizable speech.
    pub text: String,
    pub words: Option<Vec<WordTiming>>,
    pub alternatives: Option<Vec<AlternativeResult>>,
}

impl FinalResult {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Confidence of the top alternative, or 1.0 when the engine produced
    /// a single hypothesis.
    pub fn confidence(&self) -> f32 {
        self.alternatives
            .as_ref()
            .and_then(|alts| alts.first())
            .map(|alt| alt.confidence)
            .unwrap_or(1.0)
    }
}

/// Per-chunk recognizer outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerOutput {
    /// A complete utterance is available now.
    Final(FinalResult),
    /// Best hypothesis so far for the ongoing utterance; may be empty.
    Partial(String),
    /// Nothing to report for this input.
    Empty,
}

/// Recognizer configuration; changes apply to subsequent chunks.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub sample_rate: u32,
    pub model_path: String,
    pub speaker_model_path: Option<String>,
    /// Include word-level timing in final results.
    pub word_times: bool,
    /// Emit partial recognition results.
    pub partial_words: bool,
    /// N-best list size; 0 disables alternatives.
    pub max_alternatives: u32,
    pub nlsml_output: bool,
    /// JSON array of allowed phrases; `None` leaves recognition
    /// unconstrained.
    pub grammar: Option<String>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        let model_path = std::env::var("VSTREAM_MODEL_PATH")
            .unwrap_or_else(|_| "models/vosk-model-small-en-us-0.15".to_string());
        Self {
            sample_rate: 16_000,
            model_path,
            speaker_model_path: None,
            word_times: true,
            partial_words: true,
            max_alternatives: 0,
            nlsml_output: false,
            grammar: None,
        }
    }
}

/// Milliseconds since the Unix epoch, for `TranscriptionEvent::emitted_at`.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Error, Debug)]
pub enum SttError {
    #[error("Failed to load model from: {path}")]
    ModelLoad { path: String },

    #[error("Failed to create recognizer with sample rate {sample_rate}")]
    RecognizerInit { sample_rate: u32 },

    #[error("Invalid grammar (expected a JSON array of phrases): {0}")]
    InvalidGrammar(String),

    #[error("Engine error: {0}")]
    Engine(String),
}
