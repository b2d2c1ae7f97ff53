use std::path::PathBuf;

use clap::Parser;

use vstream_bench::ReportFormat;
use vstream_foundation::AppError;

const ALLOWED_SAMPLE_RATES: [u32; 4] = [8_000, 16_000, 32_000, 48_000];

#[derive(Parser, Debug, Clone)]
#[command(name = "vstream", about = "Vosk-based streaming speech recognition server")]
pub struct Args {
    /// Path to the Vosk model directory (required)
    #[arg(long)]
    pub model: Option<String>,

    /// Path to a speaker model (optional)
    #[arg(long = "spk-model")]
    pub spk_model: Option<String>,

    /// WebSocket server port
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Audio sample rate in Hz
    #[arg(long = "sample-rate", default_value_t = 16_000)]
    pub sample_rate: u32,

    /// Enable N-best results (0 disables alternatives)
    #[arg(long = "alternatives", default_value_t = 0)]
    pub max_alternatives: u32,

    /// Disable partial results
    #[arg(long = "no-partial")]
    pub no_partial: bool,

    /// Grammar as a JSON array of phrases
    #[arg(long)]
    pub grammar: Option<String>,

    /// Audio buffer size in milliseconds. Lower = less latency,
    /// higher = better efficiency
    #[arg(long = "buffer-ms", default_value_t = 100)]
    pub buffer_ms: u32,

    /// Finalization interval in milliseconds. Lower = more frequent
    /// results, higher = longer context
    #[arg(long = "finalize-ms", default_value_t = 2000)]
    pub finalize_ms: u32,

    /// Enable microphone capture
    #[arg(long)]
    pub mic: bool,

    /// Microphone device index (default: system default input)
    #[arg(long = "mic-device")]
    pub mic_device: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// List available audio input devices and exit
    #[arg(long = "list-devices")]
    pub list_devices: bool,

    /// Enable benchmarking with a reference text file
    #[arg(long = "benchmark")]
    pub benchmark_reference: Option<PathBuf>,

    /// Enable live benchmarking (no reference file)
    #[arg(long = "benchmark-live")]
    pub benchmark_live: bool,

    /// Output file for benchmark results
    #[arg(long = "benchmark-output")]
    pub benchmark_output: Option<PathBuf>,

    /// Benchmark output format: txt, json or csv
    #[arg(long = "benchmark-format", default_value = "txt")]
    pub benchmark_format: String,
}

impl Args {
    pub fn benchmark_enabled(&self) -> bool {
        self.benchmark_reference.is_some() || self.benchmark_live
    }

    pub fn report_format(&self) -> ReportFormat {
        self.benchmark_format.parse().unwrap_or(ReportFormat::Text)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.model.is_none() {
            return Err(AppError::Config("Model path is required (--model)".into()));
        }

        if !ALLOWED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(AppError::Config(format!(
                "Sample rate must be 8000, 16000, 32000, or 48000 Hz (got {})",
                self.sample_rate
            )));
        }

        if self.buffer_ms == 0 || self.buffer_ms > 5000 {
            return Err(AppError::Config(format!(
                "Buffer size must be between 1 and 5000 ms (got {})",
                self.buffer_ms
            )));
        }

        if self.finalize_ms == 0 || self.finalize_ms > 30_000 {
            return Err(AppError::Config(format!(
                "Finalize interval must be between 1 and 30000 ms (got {})",
                self.finalize_ms
            )));
        }

        if self.max_alternatives > 10 {
            return Err(AppError::Config(format!(
                "Max alternatives must be between 0 and 10 (got {})",
                self.max_alternatives
            )));
        }

        self.benchmark_format
            .parse::<ReportFormat>()
            .map_err(AppError::Config)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).expect("argv should parse")
    }

    #[test]
    fn defaults_validate_with_model() {
        let args = parse(&["vstream", "--model", "m"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.port, 8080);
        assert_eq!(args.sample_rate, 16_000);
        assert_eq!(args.buffer_ms, 100);
        assert_eq!(args.finalize_ms, 2000);
    }

    #[test]
    fn missing_model_is_rejected() {
        let args = parse(&["vstream"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn unknown_flag_fails_to_parse() {
        assert!(Args::try_parse_from(["vstream", "--model", "m", "--bogus"]).is_err());
    }

    #[test]
    fn sample_rate_must_be_in_allowed_set() {
        let args = parse(&["vstream", "--model", "m", "--sample-rate", "22050"]);
        assert!(args.validate().is_err());
        let args = parse(&["vstream", "--model", "m", "--sample-rate", "48000"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn out_of_range_numerics_are_rejected() {
        assert!(parse(&["vstream", "--model", "m", "--buffer-ms", "0"]).validate().is_err());
        assert!(parse(&["vstream", "--model", "m", "--buffer-ms", "6000"]).validate().is_err());
        assert!(parse(&["vstream", "--model", "m", "--finalize-ms", "40000"]).validate().is_err());
        assert!(parse(&["vstream", "--model", "m", "--alternatives", "11"]).validate().is_err());
    }

    #[test]
    fn benchmark_format_is_checked() {
        assert!(parse(&["vstream", "--model", "m", "--benchmark-format", "xml"]).validate().is_err());
        let args = parse(&["vstream", "--model", "m", "--benchmark-format", "json"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.report_format(), ReportFormat::Json);
    }

    #[test]
    fn benchmark_enabled_by_reference_or_live() {
        assert!(!parse(&["vstream", "--model", "m"]).benchmark_enabled());
        assert!(parse(&["vstream", "--model", "m", "--benchmark", "ref.txt"]).benchmark_enabled());
        assert!(parse(&["vstream", "--model", "m", "--benchmark-live"]).benchmark_enabled());
    }
}
