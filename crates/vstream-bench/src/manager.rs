use std::time::Instant;

use parking_lot::Mutex;

use crate::levenshtein::{calculate_cer, calculate_wer};
use crate::report::{BenchmarkResults, SegmentKind, TranscriptionSegment};
use crate::text::{normalize, tokenize};

pub type ProgressCallback = Box<dyn Fn(&BenchmarkResults) + Send + Sync>;

/// Records transcription segments with timing and confidence over a
/// session and derives the aggregate report.
///
/// All methods take `&self`; state lives behind a mutex so the stream
/// processor, transport handlers and the stats command can share one
/// instance. `add_*` calls outside a running session are no-ops.
pub struct BenchmarkManager {
    sample_rate: u32,
    inner: Mutex<Inner>,
    progress: Mutex<Option<ProgressCallback>>,
}

struct Inner {
    running: bool,
    started_at: Instant,
    last_segment_at: Instant,
    reference_text: Option<String>,
    segments: Vec<TranscriptionSegment>,
    total_samples: u64,
    vad_ground_truth: Vec<bool>,
    vad_decisions: Vec<bool>,
    vad_frame_ms: f64,
    processing_ms: f64,
}

impl BenchmarkManager {
    pub fn new(sample_rate: u32) -> Self {
        let now = Instant::now();
        Self {
            sample_rate,
            inner: Mutex::new(Inner {
                running: false,
                started_at: now,
                last_segment_at: now,
                reference_text: None,
                segments: Vec::new(),
                total_samples: 0,
                vad_ground_truth: Vec::new(),
                vad_decisions: Vec::new(),
                vad_frame_ms: 20.0,
                processing_ms: 0.0,
            }),
            progress: Mutex::new(None),
        }
    }

    /// Set the reference transcription. Normalized on entry.
    pub fn set_reference(&self, text: &str) {
        let normalized = normalize(text);
        tracing::info!("Benchmark reference text set ({} characters)", normalized.len());
        self.inner.lock().reference_text = Some(normalized);
    }

    pub fn set_vad_ground_truth(&self, labels: Vec<bool>, frame_ms: f64) {
        tracing::info!(
            "VAD ground truth set ({} frames, {}ms per frame)",
            labels.len(),
            frame_ms
        );
        let mut inner = self.inner.lock();
        inner.vad_ground_truth = labels;
        inner.vad_frame_ms = frame_ms;
    }

    pub fn set_progress_callback(&self, callback: ProgressCallback) {
        *self.progress.lock() = Some(callback);
    }

    /// Begin a session, clearing any previous segment log.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        inner.segments.clear();
        inner.vad_decisions.clear();
        inner.total_samples = 0;
        inner.processing_ms = 0.0;
        inner.running = true;
        inner.started_at = Instant::now();
        inner.last_segment_at = inner.started_at;
        tracing::info!("Benchmark session started");
    }

    /// End the session and return the final report.
    pub fn stop(&self) -> BenchmarkResults {
        let results = {
            let mut inner = self.inner.lock();
            inner.running = false;
            inner.processing_ms = inner.started_at.elapsed().as_secs_f64() * 1000.0;
            self.compute(&inner)
        };
        tracing::info!(
            "Benchmark completed - WER: {:.2}%, CER: {:.2}%, RTF: {:.2}x",
            results.word_error_rate,
            results.character_error_rate,
            results.real_time_factor
        );
        results
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Record one transcription segment. No-op outside a running session.
    pub fn add_transcription(
        &self,
        text: &str,
        kind: SegmentKind,
        confidence: f64,
        audio_samples: u64,
        latency_ms: f64,
    ) {
        let results_for_progress = {
            let mut inner = self.inner.lock();
            if !inner.running {
                return;
            }

            let now = Instant::now();
            let start_ms = (inner.last_segment_at - inner.started_at).as_secs_f64() * 1000.0;
            let end_ms = (now - inner.started_at).as_secs_f64() * 1000.0;
            let latency_ms = if latency_ms > 0.0 {
                latency_ms
            } else {
                // Fall back to time between calls (less accurate)
                end_ms - start_ms
            };

            inner.segments.push(TranscriptionSegment {
                text: normalize(text),
                kind,
                start_ms,
                end_ms,
                confidence,
                audio_samples,
                latency_ms,
                vad_detected: false,
                silence_frames_before: 0,
            });
            inner.total_samples += audio_samples;
            inner.last_segment_at = now;

            if self.progress.lock().is_some() {
                Some(self.compute(&inner))
            } else {
                None
            }
        };

        if let Some(results) = results_for_progress {
            if let Some(callback) = self.progress.lock().as_ref() {
                callback(&results);
            }
        }
    }

    /// Record a VAD decision for accuracy analysis. No-op outside a
    /// running session.
    pub fn add_vad_decision(&self, is_speech: bool, silence_frames_before: u32) {
        let mut inner = self.inner.lock();
        if !inner.running {
            return;
        }
        inner.vad_decisions.push(is_speech);
        if let Some(last) = inner.segments.last_mut() {
            last.vad_detected = is_speech;
            last.silence_frames_before = silence_frames_before;
        }
    }

    /// Current results; safe to call during a running session.
    pub fn snapshot(&self) -> BenchmarkResults {
        let inner = self.inner.lock();
        self.compute(&inner)
    }

    fn compute(&self, inner: &Inner) -> BenchmarkResults {
        let mut results = BenchmarkResults {
            segments: inner.segments.clone(),
            ..Default::default()
        };

        // Hypothesis is the non-empty final segments joined in order
        let mut final_texts: Vec<&str> = Vec::new();
        for segment in &inner.segments {
            match segment.kind {
                SegmentKind::Final => {
                    results.final_segments += 1;
                    if !segment.text.is_empty() {
                        final_texts.push(&segment.text);
                    }
                }
                SegmentKind::Partial => results.partial_segments += 1,
            }
        }
        results.hypothesis_text = final_texts.join(" ");
        results.partial_to_final_ratio =
            results.partial_segments as f64 / results.final_segments.max(1) as f64;

        if let Some(reference) = &inner.reference_text {
            results.reference_text = reference.clone();
            let (wer, ops) = calculate_wer(reference, &results.hypothesis_text);
            results.word_error_rate = wer;
            results.character_error_rate = calculate_cer(reference, &results.hypothesis_text);
            results.word_substitutions = ops.substitutions;
            results.word_deletions = ops.deletions;
            results.word_insertions = ops.insertions;
            results.word_errors = ops.distance;
            results.total_words = tokenize(reference).len();
        }

        // Latency, confidence and silence-before-speech statistics
        let mut latencies: Vec<f64> = Vec::new();
        let mut confidences: Vec<f64> = Vec::new();
        let mut silence_before: Vec<f64> = Vec::new();
        for segment in &inner.segments {
            if segment.latency_ms > 0.0 {
                latencies.push(segment.latency_ms);
            }
            confidences.push(segment.confidence);
            if segment.vad_detected && segment.silence_frames_before > 0 {
                silence_before.push(segment.silence_frames_before as f64 * inner.vad_frame_ms);
            }
        }
        if !latencies.is_empty() {
            results.average_latency_ms = latencies.iter().sum::<f64>() / latencies.len() as f64;
            results.min_latency_ms = latencies.iter().copied().fold(f64::INFINITY, f64::min);
            results.max_latency_ms = latencies.iter().copied().fold(0.0, f64::max);
        }
        if !confidences.is_empty() {
            results.average_confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
            results.min_confidence = confidences.iter().copied().fold(f64::INFINITY, f64::min);
            results.max_confidence = confidences.iter().copied().fold(0.0, f64::max);
        }
        if !silence_before.is_empty() {
            results.average_silence_before_speech_ms =
                silence_before.iter().sum::<f64>() / silence_before.len() as f64;
        }

        // VAD accuracy over the common prefix
        if !inner.vad_ground_truth.is_empty() && !inner.vad_decisions.is_empty() {
            let min_len = inner.vad_ground_truth.len().min(inner.vad_decisions.len());
            let mut correct = 0usize;
            for i in 0..min_len {
                let truth = inner.vad_ground_truth[i];
                let decision = inner.vad_decisions[i];
                if truth == decision {
                    correct += 1;
                } else if !truth && decision {
                    results.vad_false_positives += 1;
                } else {
                    results.vad_false_negatives += 1;
                }
            }
            results.vad_accuracy = correct as f64 * 100.0 / min_len as f64;
        }

        results.total_samples_processed = inner.total_samples;
        results.total_segments = inner.segments.len();

        let processing_ms = if inner.running {
            inner.started_at.elapsed().as_secs_f64() * 1000.0
        } else {
            inner.processing_ms
        };
        results.total_processing_time_ms = processing_ms;
        if processing_ms > 0.0 {
            results.samples_per_second = inner.total_samples as f64 / (processing_ms / 1000.0);
        }

        results.total_audio_duration_ms =
            inner.total_samples as f64 / self.sample_rate as f64 * 1000.0;
        if results.total_audio_duration_ms > 0.0 {
            results.real_time_factor = processing_ms / results.total_audio_duration_ms;
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> BenchmarkManager {
        BenchmarkManager::new(16_000)
    }

    #[test]
    fn session_counts_partials_and_finals() {
        let m = manager();
        m.start();
        m.add_transcription("hello", SegmentKind::Partial, 1.0, 0, 0.0);
        m.add_transcription("hello world", SegmentKind::Partial, 1.0, 0, 0.0);
        m.add_transcription("hello world", SegmentKind::Final, 0.9, 48_000, 120.0);
        let results = m.stop();

        assert_eq!(results.partial_segments, 2);
        assert_eq!(results.final_segments, 1);
        assert_eq!(results.total_segments, 3);
        assert_eq!(results.partial_segments + results.final_segments, results.total_segments);
        assert_eq!(results.hypothesis_text, "hello world");
        assert_eq!(results.total_samples_processed, 48_000);
        assert!((results.partial_to_final_ratio - 2.0).abs() < 1e-9);
        assert!((results.total_audio_duration_ms - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn wer_against_reference() {
        let m = manager();
        m.set_reference("the quick brown fox");
        m.start();
        m.add_transcription("the quik brown fox jumps", SegmentKind::Final, 1.0, 16_000, 50.0);
        let results = m.stop();

        assert!((results.word_error_rate - 50.0).abs() < 1e-9);
        assert_eq!(results.word_substitutions, 1);
        assert_eq!(results.word_deletions, 0);
        assert_eq!(results.word_insertions, 1);
        assert_eq!(results.word_errors, 2);
        assert_eq!(results.total_words, 4);
    }

    #[test]
    fn add_after_stop_is_a_no_op() {
        let m = manager();
        m.start();
        m.add_transcription("one", SegmentKind::Final, 1.0, 100, 1.0);
        m.stop();
        m.add_transcription("two", SegmentKind::Final, 1.0, 100, 1.0);
        m.add_vad_decision(true, 3);

        let results = m.snapshot();
        assert_eq!(results.total_segments, 1);
        assert_eq!(results.hypothesis_text, "one");
    }

    #[test]
    fn ratio_with_zero_finals_uses_denominator_one() {
        let m = manager();
        m.start();
        m.add_transcription("a", SegmentKind::Partial, 1.0, 0, 0.0);
        m.add_transcription("ab", SegmentKind::Partial, 1.0, 0, 0.0);
        let results = m.stop();
        assert!((results.partial_to_final_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn latency_stats_ignore_non_positive_latencies() {
        let m = manager();
        m.start();
        m.add_transcription("a", SegmentKind::Final, 0.8, 0, 100.0);
        m.add_transcription("b", SegmentKind::Final, 0.6, 0, 300.0);
        let results = m.stop();

        assert!((results.average_latency_ms - 200.0).abs() < 1e-9);
        assert!((results.min_latency_ms - 100.0).abs() < 1e-9);
        assert!((results.max_latency_ms - 300.0).abs() < 1e-9);
        assert!((results.average_confidence - 0.7).abs() < 1e-9);
        assert!((results.min_confidence - 0.6).abs() < 1e-9);
        assert!((results.max_confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn vad_accuracy_over_common_prefix() {
        let m = manager();
        m.set_vad_ground_truth(vec![true, true, false, false], 20.0);
        m.start();
        m.add_transcription("x", SegmentKind::Final, 1.0, 0, 1.0);
        m.add_vad_decision(true, 0);
        m.add_vad_decision(false, 0); // false negative
        m.add_vad_decision(true, 0); // false positive
        let results = m.stop();

        // prefix length 3: correct, miss, false alarm
        assert!((results.vad_accuracy - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(results.vad_false_positives, 1);
        assert_eq!(results.vad_false_negatives, 1);
    }

    #[test]
    fn empty_final_text_counts_but_does_not_join() {
        let m = manager();
        m.start();
        m.add_transcription("", SegmentKind::Final, 1.0, 0, 1.0);
        m.add_transcription("real words", SegmentKind::Final, 1.0, 0, 1.0);
        let results = m.stop();

        assert_eq!(results.final_segments, 2);
        assert_eq!(results.hypothesis_text, "real words");
    }

    #[test]
    fn progress_callback_sees_live_results() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let m = manager();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        m.set_progress_callback(Box::new(move |results| {
            seen_cb.store(results.total_segments, Ordering::SeqCst);
        }));
        m.start();
        m.add_transcription("a", SegmentKind::Final, 1.0, 0, 1.0);
        m.add_transcription("b", SegmentKind::Final, 1.0, 0, 1.0);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
