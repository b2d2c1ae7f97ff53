use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Partial,
    Final,
}

/// One recorded transcription with timing and quality attached. Times are
/// millisecond offsets from the start of the evaluation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub text: String,
    pub kind: SegmentKind,
    pub start_ms: f64,
    pub end_ms: f64,
    pub confidence: f64,
    pub audio_samples: u64,
    pub latency_ms: f64,
    pub vad_detected: bool,
    pub silence_frames_before: u32,
}

/// Complete evaluation results, derived purely from the segment log and
/// the reference text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkResults {
    // Text comparison
    pub reference_text: String,
    pub hypothesis_text: String,

    // Accuracy
    pub word_error_rate: f64,
    pub character_error_rate: f64,
    pub total_words: usize,
    pub word_errors: usize,
    pub word_substitutions: usize,
    pub word_deletions: usize,
    pub word_insertions: usize,

    // Timing
    pub total_audio_duration_ms: f64,
    pub total_processing_time_ms: f64,
    pub real_time_factor: f64,
    pub average_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,

    // Throughput
    pub total_samples_processed: u64,
    pub total_segments: usize,
    pub samples_per_second: f64,

    // Quality
    pub average_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,

    // VAD (only populated when ground truth was supplied)
    pub vad_accuracy: f64,
    pub vad_false_positives: usize,
    pub vad_false_negatives: usize,
    pub average_silence_before_speech_ms: f64,

    // Engine-specific
    pub partial_segments: usize,
    pub final_segments: usize,
    pub partial_to_final_ratio: f64,

    pub segments: Vec<TranscriptionSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Human-readable sections.
    Text,
    /// Nested JSON object.
    Json,
    /// `metric,value,unit` rows.
    Csv,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "txt" | "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("invalid report format: {other} (expected txt, json or csv)")),
        }
    }
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Write results to `output_path` in the requested format.
pub fn export_results(
    results: &BenchmarkResults,
    output_path: &Path,
    model_path: Option<&Path>,
    format: ReportFormat,
) -> io::Result<()> {
    let content = match format {
        ReportFormat::Text => render_text(results, model_path),
        ReportFormat::Json => {
            let value = render_json(results, model_path);
            serde_json::to_string_pretty(&value).map_err(io::Error::other)?
        }
        ReportFormat::Csv => render_csv(results),
    };
    fs::write(output_path, content)?;
    tracing::info!("Benchmark results exported to {}", output_path.display());
    Ok(())
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn dir_size(path: &Path) -> Option<u64> {
    let mut total = 0u64;
    let entries = fs::read_dir(path).ok()?;
    for entry in entries.flatten() {
        let meta = entry.metadata().ok()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Some(total)
}

fn render_text(r: &BenchmarkResults, model_path: Option<&Path>) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "=== VSTREAM BENCHMARK RESULTS ===\n");

    let _ = writeln!(out, "MODEL INFORMATION:");
    if let Some(path) = model_path {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let _ = writeln!(out, "  Model: {}", name.unwrap_or_else(|| path.display().to_string()));
        let _ = writeln!(out, "  Full path: {}", path.display());
        match dir_size(path) {
            Some(bytes) => {
                let _ = writeln!(out, "  Size: {:.2} MB ({} bytes)", bytes as f64 / (1024.0 * 1024.0), bytes);
            }
            None => {
                let _ = writeln!(out, "  Size: Unknown");
            }
        }
    }
    let _ = writeln!(out, "  Timestamp: {}\n", epoch_seconds());

    let _ = writeln!(out, "ACCURACY METRICS:");
    let _ = writeln!(out, "  Word Error Rate (WER): {:.2}%", r.word_error_rate);
    let _ = writeln!(out, "  Character Error Rate (CER): {:.2}%", r.character_error_rate);
    let _ = writeln!(out, "  Total Words: {}", r.total_words);
    let _ = writeln!(out, "  Word Errors: {}", r.word_errors);
    let _ = writeln!(out, "    Substitutions: {}", r.word_substitutions);
    let _ = writeln!(out, "    Deletions: {}", r.word_deletions);
    let _ = writeln!(out, "    Insertions: {}\n", r.word_insertions);

    let _ = writeln!(out, "TIMING METRICS:");
    let _ = writeln!(out, "  Total Audio Duration: {:.2} s", r.total_audio_duration_ms / 1000.0);
    let _ = writeln!(out, "  Total Processing Time: {:.2} s", r.total_processing_time_ms / 1000.0);
    let _ = writeln!(out, "  Real-Time Factor: {:.2}x", r.real_time_factor);
    let _ = writeln!(out, "  Average Latency: {:.2} ms", r.average_latency_ms);
    let _ = writeln!(out, "  Min Latency: {:.2} ms", r.min_latency_ms);
    let _ = writeln!(out, "  Max Latency: {:.2} ms\n", r.max_latency_ms);

    let _ = writeln!(out, "RECOGNIZER METRICS:");
    let _ = writeln!(out, "  Partial Segments: {}", r.partial_segments);
    let _ = writeln!(out, "  Final Segments: {}", r.final_segments);
    let _ = writeln!(out, "  Partial/Final Ratio: {:.2}\n", r.partial_to_final_ratio);

    let _ = writeln!(out, "QUALITY METRICS:");
    let _ = writeln!(out, "  Average Confidence: {:.3}", r.average_confidence);
    let _ = writeln!(out, "  Min Confidence: {:.3}", r.min_confidence);
    let _ = writeln!(out, "  Max Confidence: {:.3}\n", r.max_confidence);

    if r.vad_accuracy > 0.0 {
        let _ = writeln!(out, "VAD METRICS:");
        let _ = writeln!(out, "  VAD Accuracy: {:.2}%", r.vad_accuracy);
        let _ = writeln!(out, "  False Positives: {}", r.vad_false_positives);
        let _ = writeln!(out, "  False Negatives: {}", r.vad_false_negatives);
        let _ = writeln!(out, "  Avg Silence Before Speech: {:.2} ms\n", r.average_silence_before_speech_ms);
    }

    let _ = writeln!(out, "THROUGHPUT METRICS:");
    let _ = writeln!(out, "  Total Samples: {}", r.total_samples_processed);
    let _ = writeln!(out, "  Total Segments: {}", r.total_segments);
    let _ = writeln!(out, "  Samples/Second: {:.0}\n", r.samples_per_second);

    if !r.reference_text.is_empty() {
        let _ = writeln!(out, "REFERENCE TEXT:\n{}\n", r.reference_text);
    }
    let _ = writeln!(out, "HYPOTHESIS TEXT:\n{}\n", r.hypothesis_text);

    if r.total_segments > 0 {
        let _ = writeln!(out, "SEGMENT ANALYSIS:");
        let _ = writeln!(
            out,
            "  Average segment duration: {:.2} ms",
            r.total_audio_duration_ms / r.total_segments as f64
        );
        let _ = writeln!(out, "  Average processing time per segment: {:.2} ms", r.average_latency_ms);
    }

    out
}

fn render_json(r: &BenchmarkResults, model_path: Option<&Path>) -> serde_json::Value {
    let mut root = json!({
        "metadata": {
            "model_path": model_path.map(|p| p.display().to_string()).unwrap_or_default(),
            "timestamp": epoch_seconds(),
            "engine": "vstream",
            "backend": "vosk",
        },
        "accuracy": {
            "word_error_rate": r.word_error_rate,
            "character_error_rate": r.character_error_rate,
            "total_words": r.total_words,
            "word_errors": r.word_errors,
            "word_substitutions": r.word_substitutions,
            "word_deletions": r.word_deletions,
            "word_insertions": r.word_insertions,
        },
        "timing": {
            "total_audio_duration_ms": r.total_audio_duration_ms,
            "total_processing_time_ms": r.total_processing_time_ms,
            "real_time_factor": r.real_time_factor,
            "average_latency_ms": r.average_latency_ms,
            "min_latency_ms": r.min_latency_ms,
            "max_latency_ms": r.max_latency_ms,
        },
        "engine_metrics": {
            "partial_segments": r.partial_segments,
            "final_segments": r.final_segments,
            "partial_to_final_ratio": r.partial_to_final_ratio,
        },
        "quality": {
            "average_confidence": r.average_confidence,
            "min_confidence": r.min_confidence,
            "max_confidence": r.max_confidence,
        },
        "text": {
            "reference": r.reference_text,
            "hypothesis": r.hypothesis_text,
        },
        "throughput": {
            "total_samples": r.total_samples_processed,
            "total_segments": r.total_segments,
            "samples_per_second": r.samples_per_second,
        },
    });

    if r.vad_accuracy > 0.0 {
        root["vad"] = json!({
            "accuracy": r.vad_accuracy,
            "false_positives": r.vad_false_positives,
            "false_negatives": r.vad_false_negatives,
            "average_silence_before_speech_ms": r.average_silence_before_speech_ms,
        });
    }

    root
}

fn render_csv(r: &BenchmarkResults) -> String {
    use std::fmt::Write;

    let mut out = String::from("metric,value,unit\n");
    let _ = writeln!(out, "word_error_rate,{},percent", r.word_error_rate);
    let _ = writeln!(out, "character_error_rate,{},percent", r.character_error_rate);
    let _ = writeln!(out, "real_time_factor,{},ratio", r.real_time_factor);
    let _ = writeln!(out, "average_latency,{},milliseconds", r.average_latency_ms);
    let _ = writeln!(out, "min_latency,{},milliseconds", r.min_latency_ms);
    let _ = writeln!(out, "max_latency,{},milliseconds", r.max_latency_ms);
    let _ = writeln!(out, "average_confidence,{},score", r.average_confidence);
    let _ = writeln!(out, "total_segments,{},count", r.total_segments);
    let _ = writeln!(out, "partial_segments,{},count", r.partial_segments);
    let _ = writeln!(out, "final_segments,{},count", r.final_segments);
    let _ = writeln!(out, "partial_to_final_ratio,{},ratio", r.partial_to_final_ratio);
    let _ = writeln!(out, "total_words,{},count", r.total_words);
    let _ = writeln!(out, "word_errors,{},count", r.word_errors);
    let _ = writeln!(out, "samples_per_second,{},rate", r.samples_per_second);

    if r.vad_accuracy > 0.0 {
        let _ = writeln!(out, "vad_accuracy,{},percent", r.vad_accuracy);
        let _ = writeln!(out, "vad_false_positives,{},count", r.vad_false_positives);
        let _ = writeln!(out, "vad_false_negatives,{},count", r.vad_false_negatives);
    }

    out
}
