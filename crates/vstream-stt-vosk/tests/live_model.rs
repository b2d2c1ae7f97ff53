//! Driver tests against a real Vosk model. These need model files on disk,
//! so they run only when VSTREAM_MODEL_PATH points at a model directory
//! and pass trivially otherwise.

use vstream_stt::{RecognizerConfig, RecognizerOutput, SpeechEngine};
use vstream_stt_vosk::VoskEngine;

fn live_engine() -> Option<VoskEngine> {
    let model_path = std::env::var("VSTREAM_MODEL_PATH").ok()?;
    let config = RecognizerConfig {
        model_path,
        ..Default::default()
    };
    Some(VoskEngine::new(&config).expect("model at VSTREAM_MODEL_PATH should load"))
}

#[test]
fn total_samples_counts_every_process_call() {
    let Some(engine) = live_engine() else { return };

    let second_of_silence = vec![0i16; 16_000];
    engine.process(&second_of_silence, false);
    assert_eq!(engine.total_samples(), 16_000);

    engine.process(&second_of_silence, false);
    assert_eq!(engine.total_samples(), 32_000);

    // Forced final with empty input adds nothing
    engine.process(&[], true);
    assert_eq!(engine.total_samples(), 32_000);
}

#[test]
fn silence_never_produces_final_text() {
    let Some(engine) = live_engine() else { return };

    let buffer = vec![0i16; 1600];
    for _ in 0..10 {
        match engine.process(&buffer, false) {
            RecognizerOutput::Final(result) => assert!(result.text.is_empty()),
            RecognizerOutput::Partial(partial) => assert!(partial.is_empty()),
            RecognizerOutput::Empty => {}
        }
    }
}

#[test]
fn reset_then_forced_final_is_never_a_partial() {
    let Some(engine) = live_engine() else { return };

    engine.process(&vec![0i16; 4800], false);
    engine.reset();

    match engine.process(&[], true) {
        RecognizerOutput::Partial(p) => panic!("forced final returned partial {p:?}"),
        RecognizerOutput::Final(_) | RecognizerOutput::Empty => {}
    }
    assert!(!engine.has_partial_result());
}

#[test]
fn grammar_updates_and_clears() {
    let Some(engine) = live_engine() else { return };

    engine.set_grammar(r#"["yes", "no", "maybe"]"#).unwrap();
    engine.set_grammar("").unwrap();
    assert!(engine.set_grammar("not json").is_err());
}
