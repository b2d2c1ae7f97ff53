use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use vosk::{CompleteResult, DecodingState, Model, Recognizer, SpeakerModel};

use vstream_stt::{
    AlternativeResult, FinalResult, RecognizerConfig, RecognizerOutput, SpeechEngine, SttError,
    WordTiming,
};

/// Recognizer toggles that survive a rebuild.
#[derive(Debug, Clone, Copy)]
struct RecognizerSettings {
    word_times: bool,
    partial_words: bool,
    max_alternatives: u32,
    nlsml: bool,
}

struct EngineState {
    model: Model,
    speaker_model: Option<SpeakerModel>,
    recognizer: Recognizer,
    /// Set when the last call produced a complete utterance; the next
    /// non-empty input resets the recognizer first so the engine's
    /// lookahead cannot replay tail context into the new utterance.
    just_finalized: bool,
    settings: RecognizerSettings,
    grammar: Option<Vec<String>>,
}

/// Thread-safe, chunked driver around the Vosk recognizer.
///
/// The recognizer is single-threaded internally; every engine interaction
/// happens under one mutex, and the work done under the lock is bounded to
/// a single chunked `process` call. `total_samples` is maintained outside
/// the lock and only needs to be monotonic.
pub struct VoskEngine {
    state: Mutex<EngineState>,
    total_samples: AtomicU64,
    decode_errors: AtomicU64,
    sample_rate: u32,
    partial_words: bool,
}

impl VoskEngine {
    pub fn new(config: &RecognizerConfig) -> Result<Self, SttError> {
        if !Path::new(&config.model_path).exists() {
            return Err(SttError::ModelLoad {
                path: config.model_path.clone(),
            });
        }

        let model = Model::new(&config.model_path).ok_or_else(|| SttError::ModelLoad {
            path: config.model_path.clone(),
        })?;

        let speaker_model = match &config.speaker_model_path {
            Some(path) => match SpeakerModel::new(path) {
                Some(spk) => Some(spk),
                None => {
                    // Speaker ID is an enhancement; fall back to plain
                    // recognition rather than failing startup.
                    warn!("Failed to load speaker model from {}; continuing without", path);
                    None
                }
            },
            None => None,
        };

        let grammar = match config.grammar.as_deref() {
            Some(g) if !g.is_empty() => Some(parse_grammar(g)?),
            _ => None,
        };

        let settings = RecognizerSettings {
            word_times: config.word_times,
            partial_words: config.partial_words,
            max_alternatives: config.max_alternatives,
            nlsml: config.nlsml_output,
        };

        let recognizer = build_recognizer(
            &model,
            speaker_model.as_ref(),
            grammar.as_deref(),
            config.sample_rate,
            settings,
        )?;

        info!(
            "Vosk engine initialized (model: {}, sample rate: {} Hz, speaker ID: {})",
            config.model_path,
            config.sample_rate,
            if speaker_model.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            state: Mutex::new(EngineState {
                model,
                speaker_model,
                recognizer,
                just_finalized: false,
                settings,
                grammar,
            }),
            total_samples: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            sample_rate: config.sample_rate,
            partial_words: config.partial_words,
        })
    }

    /// Non-zero engine return codes observed so far.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    fn convert_complete(result: CompleteResult<'_>, include_words: bool) -> FinalResult {
        match result {
            CompleteResult::Single(single) => {
                let words = if include_words && !single.result.is_empty() {
                    Some(
                        single
                            .result
                            .into_iter()
                            .map(|w| WordTiming {
                                word: w.word.to_string(),
                                start: w.start,
                                end: w.end,
                                conf: w.conf,
                            })
                            .collect(),
                    )
                } else {
                    None
                };
                FinalResult {
                    text: single.text.to_string(),
                    words,
                    alternatives: None,
                }
            }
            CompleteResult::Multiple(multiple) => {
                let alternatives: Vec<AlternativeResult> = multiple
                    .alternatives
                    .iter()
                    .map(|alt| AlternativeResult {
                        text: alt.text.to_string(),
                        confidence: alt.confidence,
                    })
                    .collect();
                FinalResult {
                    text: alternatives
                        .first()
                        .map(|alt| alt.text.clone())
                        .unwrap_or_default(),
                    words: None,
                    alternatives: Some(alternatives),
                }
            }
        }
    }
}

fn parse_grammar(grammar: &str) -> Result<Vec<String>, SttError> {
    serde_json::from_str::<Vec<String>>(grammar)
        .map_err(|e| SttError::InvalidGrammar(e.to_string()))
}

fn build_recognizer(
    model: &Model,
    speaker_model: Option<&SpeakerModel>,
    grammar: Option<&[String]>,
    sample_rate: u32,
    settings: RecognizerSettings,
) -> Result<Recognizer, SttError> {
    let rate = sample_rate as f32;

    let mut recognizer = match (grammar, speaker_model) {
        (Some(phrases), _) => Recognizer::new_with_grammar(model, rate, phrases),
        (None, Some(spk)) => Recognizer::new_with_speaker(model, rate, spk),
        (None, None) => Recognizer::new(model, rate),
    }
    .ok_or(SttError::RecognizerInit { sample_rate })?;

    recognizer.set_words(settings.word_times);
    recognizer.set_partial_words(settings.partial_words && settings.word_times);
    recognizer.set_max_alternatives(settings.max_alternatives as u16);
    recognizer.set_nlsml(settings.nlsml);

    Ok(recognizer)
}

impl SpeechEngine for VoskEngine {
    fn process(&self, pcm: &[i16], force_final: bool) -> RecognizerOutput {
        if pcm.is_empty() && !force_final {
            return RecognizerOutput::Empty;
        }

        self.total_samples.fetch_add(pcm.len() as u64, Ordering::Relaxed);

        let mut state = self.state.lock();

        if !pcm.is_empty() {
            if state.just_finalized {
                state.recognizer.reset();
                state.just_finalized = false;
                debug!("Reset recognizer after final result");
            }

            // 100ms of audio per engine submission
            let chunk_size = (self.sample_rate / 10) as usize;
            let mut last_partial: Option<String> = None;

            for chunk in pcm.chunks(chunk_size) {
                match state.recognizer.accept_waveform(chunk) {
                    Ok(DecodingState::Finalized) => {
                        // Complete utterance: return now, the remainder of
                        // this buffer must not bleed into the old utterance
                        let include_words = state.settings.word_times;
                        let result =
                            Self::convert_complete(state.recognizer.result(), include_words);
                        state.just_finalized = true;
                        return RecognizerOutput::Final(result);
                    }
                    Ok(DecodingState::Running) => {
                        last_partial = Some(state.recognizer.partial_result().partial.to_string());
                    }
                    Ok(DecodingState::Failed) => {
                        self.decode_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Vosk decode failed for current chunk");
                    }
                    Err(e) => {
                        self.decode_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Vosk rejected waveform: {:?}", e);
                    }
                }
            }

            return match last_partial {
                Some(partial) => RecognizerOutput::Partial(partial),
                None => RecognizerOutput::Empty,
            };
        }

        // Empty input with force_final: flush the pending utterance
        let include_words = state.settings.word_times;
        let result = Self::convert_complete(state.recognizer.final_result(), include_words);
        state.just_finalized = true;
        debug!("Forced final result: \"{}\"", result.text);
        RecognizerOutput::Final(result)
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.recognizer.reset();
        state.just_finalized = false;
    }

    fn set_grammar(&self, grammar: &str) -> Result<(), SttError> {
        let parsed = if grammar.is_empty() {
            None
        } else {
            Some(parse_grammar(grammar)?)
        };

        let mut state = self.state.lock();
        state.grammar = parsed;
        // The binding fixes grammar at construction, so constraint changes
        // rebuild the recognizer; the loaded model is reused.
        let rebuilt = build_recognizer(
            &state.model,
            state.speaker_model.as_ref(),
            state.grammar.as_deref(),
            self.sample_rate,
            state.settings,
        )?;
        state.recognizer = rebuilt;
        state.just_finalized = false;
        info!(
            "Grammar {}",
            if state.grammar.is_some() { "updated" } else { "cleared" }
        );
        Ok(())
    }

    fn set_max_alternatives(&self, max: u32) {
        let mut state = self.state.lock();
        state.settings.max_alternatives = max;
        state.recognizer.set_max_alternatives(max as u16);
    }

    fn set_nlsml_output(&self, enable: bool) {
        let mut state = self.state.lock();
        state.settings.nlsml = enable;
        state.recognizer.set_nlsml(enable);
    }

    fn has_partial_result(&self) -> bool {
        let mut state = self.state.lock();
        !state.recognizer.partial_result().partial.trim().is_empty()
    }

    fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::Relaxed)
    }

    fn partials_enabled(&self) -> bool {
        self.partial_words
    }
}
