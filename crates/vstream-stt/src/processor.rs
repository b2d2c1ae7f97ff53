//! Stream processor: turns the recognizer's per-chunk output into a
//! deduplicated, time-bounded sequence of transcription events.
//!
//! Finalization is time-driven, not VAD-driven: every
//! `finalize_interval` the pending utterance is forced final and the
//! recognizer reset, which bounds how stale a hypothesis can get during
//! continuous speech.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use vstream_bench::{BenchmarkManager, SegmentKind};

use crate::engine::SpeechEngine;
use crate::sink::TranscriptionSink;
use crate::types::{epoch_millis, FinalResult, RecognizerOutput, TranscriptionEvent, TranscriptionKind};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub session_id: String,
    /// Forced finalization interval. Zero forces a final on every call.
    pub finalize_interval: Duration,
    /// Expected input buffer duration, for logging only.
    pub buffer_ms: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            session_id: "mic-capture".to_string(),
            finalize_interval: Duration::from_millis(2000),
            buffer_ms: 100,
        }
    }
}

/// Single-consumer stream processor. Not thread-safe: it is owned by the
/// capture worker and its state never leaves that thread.
pub struct StreamProcessor<E: SpeechEngine> {
    engine: Arc<E>,
    sink: Arc<dyn TranscriptionSink>,
    benchmark: Option<Arc<BenchmarkManager>>,
    config: ProcessorConfig,
    show_partial: bool,

    last_final_text: String,
    last_partial_text: String,
    last_finalize_at: Instant,
    accumulated_samples: u64,
}

impl<E: SpeechEngine> StreamProcessor<E> {
    pub fn new(
        engine: Arc<E>,
        sink: Arc<dyn TranscriptionSink>,
        benchmark: Option<Arc<BenchmarkManager>>,
        config: ProcessorConfig,
    ) -> Self {
        let show_partial = engine.partials_enabled();
        info!(
            "Stream processor initialized (time-based finalization every {}ms, {}ms buffers)",
            config.finalize_interval.as_millis(),
            config.buffer_ms
        );
        Self {
            engine,
            sink,
            benchmark,
            config,
            show_partial,
            last_final_text: String::new(),
            last_partial_text: String::new(),
            last_finalize_at: Instant::now(),
            accumulated_samples: 0,
        }
    }

    /// Feed one accumulated buffer through the recognizer and emit any
    /// resulting events.
    pub fn process_audio(&mut self, pcm: &[i16]) {
        if pcm.is_empty() {
            return;
        }

        let now = Instant::now();
        let elapsed = now - self.last_finalize_at;
        self.accumulated_samples += pcm.len() as u64;

        match self.engine.process(pcm, false) {
            RecognizerOutput::Final(result) if !result.text.is_empty() => {
                self.handle_final(result);
            }
            RecognizerOutput::Partial(partial) if !partial.is_empty() && self.show_partial => {
                self.handle_partial(partial);
            }
            _ => {}
        }

        if elapsed >= self.config.finalize_interval {
            debug!("Time-based finalization after {}ms", elapsed.as_millis());
            self.force_finalize();
        }
    }

    /// Force a final for the pending utterance and reset the recognizer.
    pub fn force_finalize(&mut self) {
        if let RecognizerOutput::Final(result) = self.engine.process(&[], true) {
            if !result.text.is_empty() && result.text != self.last_final_text {
                self.handle_final(result);
            }
        }

        self.engine.reset();
        self.last_partial_text.clear();
        self.last_finalize_at = Instant::now();
    }

    pub fn last_final_text(&self) -> &str {
        &self.last_final_text
    }

    fn handle_final(&mut self, result: FinalResult) {
        if result.text == self.last_final_text {
            return;
        }

        let now = Instant::now();
        let confidence = result.confidence();
        self.last_final_text = result.text.clone();

        info!("[final] {}", result.text);
        self.sink.publish(TranscriptionEvent {
            text: result.text.clone(),
            kind: TranscriptionKind::Final,
            session_id: self.config.session_id.clone(),
            confidence,
            emitted_at: epoch_millis(),
        });

        if let Some(benchmark) = &self.benchmark {
            let latency_ms = (now - self.last_finalize_at).as_secs_f64() * 1000.0;
            benchmark.add_transcription(
                &result.text,
                SegmentKind::Final,
                confidence as f64,
                self.accumulated_samples,
                latency_ms,
            );
            self.accumulated_samples = 0;
        }

        self.last_finalize_at = now;
    }

    fn handle_partial(&mut self, partial: String) {
        if partial == self.last_partial_text {
            return;
        }
        // Partials go to the local observer only, never to the sink
        info!("[partial] {}", partial);
        self.last_partial_text = partial;
    }
}
