//! Application wiring: engine, benchmark, microphone pipeline, WebSocket
//! server, periodic stats and graceful shutdown.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use vstream_audio::{CaptureConfig, CaptureSource};
use vstream_bench::{export_results, BenchmarkManager};
use vstream_foundation::{AppError, AppState, ShutdownHandler, StateManager};
use vstream_stt::{ProcessorConfig, SpeechEngine, StreamProcessor, TranscriptionEvent};
use vstream_stt_vosk::VoskEngine;

use crate::cli::Args;
use crate::server::{self, BroadcastSink, ServerState};

pub struct VstreamApp {
    args: Args,
}

impl VstreamApp {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    pub async fn run(self) -> Result<(), AppError> {
        let args = &self.args;
        let state_manager = StateManager::new();
        let shutdown = ShutdownHandler::new().install();

        // Engine
        let recognizer_config = vstream_stt::RecognizerConfig {
            sample_rate: args.sample_rate,
            model_path: args.model.clone().unwrap_or_default(),
            speaker_model_path: args.spk_model.clone(),
            word_times: true,
            partial_words: !args.no_partial,
            max_alternatives: args.max_alternatives,
            nlsml_output: false,
            grammar: args.grammar.clone(),
        };
        let engine = Arc::new(
            VoskEngine::new(&recognizer_config).map_err(|e| AppError::Fatal(e.to_string()))?,
        );

        // Benchmark
        let benchmark = self.init_benchmark()?;

        // Broadcast channel carrying final transcriptions to all clients
        let (events_tx, _) = broadcast::channel::<TranscriptionEvent>(256);

        // Microphone pipeline
        let mut capture: Option<CaptureSource> = None;
        let mut mic_dropped: Option<Arc<AtomicU64>> = None;
        if args.mic {
            let source = self.init_microphone(
                Arc::clone(&engine),
                events_tx.clone(),
                benchmark.clone(),
            )?;
            mic_dropped = Some(source.dropped_frames_handle());
            capture = Some(source);
        }

        // Server
        let server_state = Arc::new(ServerState {
            engine: Arc::clone(&engine) as Arc<dyn SpeechEngine>,
            benchmark: benchmark.clone(),
            events: events_tx,
            shutdown: shutdown.clone(),
            started_at: Instant::now(),
            messages_processed: AtomicU64::new(0),
            connected_clients: AtomicUsize::new(0),
            mic_dropped_frames: mic_dropped,
        });
        let mut server_task = tokio::spawn(server::serve(Arc::clone(&server_state), args.port));

        state_manager.transition(AppState::Running)?;
        info!("Server ready. Waiting for connections...");

        // Main loop: wait for shutdown, log stats periodically
        let mut stats_interval = tokio::time::interval(Duration::from_secs(30));
        stats_interval.tick().await; // immediate first tick

        let run_result: Result<(), AppError> = loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
                result = &mut server_task => {
                    break match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(AppError::Fatal(format!("Server task failed: {e}"))),
                    };
                }
                _ = stats_interval.tick() => {
                    self.log_stats(&server_state, benchmark.as_deref());
                }
            }
        };

        info!("Shutting down...");
        state_manager.transition(AppState::Stopping)?;
        shutdown.request_shutdown();

        if let Some(benchmark) = &benchmark {
            self.finalize_benchmark(benchmark);
        }

        if let Some(mut capture) = capture {
            info!("Stopping microphone capture...");
            capture.stop();
        }

        if !server_task.is_finished() {
            if tokio::time::timeout(Duration::from_secs(3), &mut server_task)
                .await
                .is_err()
            {
                warn!("Server did not stop in time, aborting");
                server_task.abort();
            }
        }

        state_manager.transition(AppState::Stopped)?;
        info!("Shutdown complete");
        run_result
    }

    fn init_benchmark(&self) -> Result<Option<Arc<BenchmarkManager>>, AppError> {
        if !self.args.benchmark_enabled() {
            return Ok(None);
        }

        let manager = Arc::new(BenchmarkManager::new(self.args.sample_rate));

        if let Some(path) = &self.args.benchmark_reference {
            let text = std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!(
                    "Cannot open benchmark reference file {}: {e}",
                    path.display()
                ))
            })?;
            manager.set_reference(&text);
            info!("Benchmark mode: reference file {} loaded", path.display());
        } else {
            info!("Benchmark mode: live performance monitoring");
            let last_update = Mutex::new(Instant::now());
            manager.set_progress_callback(Box::new(move |results| {
                let mut last = last_update.lock();
                if last.elapsed() >= Duration::from_secs(5) {
                    info!(
                        "[live] segments: {} | avg confidence: {:.3} | RTF: {:.2}x",
                        results.total_segments, results.average_confidence, results.real_time_factor
                    );
                    *last = Instant::now();
                }
            }));
        }

        manager.start();
        Ok(Some(manager))
    }

    fn init_microphone(
        &self,
        engine: Arc<VoskEngine>,
        events_tx: broadcast::Sender<TranscriptionEvent>,
        benchmark: Option<Arc<BenchmarkManager>>,
    ) -> Result<CaptureSource, AppError> {
        let args = &self.args;
        info!("Setting up microphone capture...");

        let capture_config = CaptureConfig {
            sample_rate: args.sample_rate,
            channels: 1,
            frames_per_buffer: args.buffer_ms * args.sample_rate / 1000,
            device_index: args.mic_device,
            queue_capacity: 128,
            accumulate_ms: args.buffer_ms,
        };
        let mut source = CaptureSource::new(capture_config)?;

        let mut processor = StreamProcessor::new(
            engine,
            Arc::new(BroadcastSink(events_tx)),
            benchmark,
            ProcessorConfig {
                session_id: "mic-capture".to_string(),
                finalize_interval: Duration::from_millis(args.finalize_ms as u64),
                buffer_ms: args.buffer_ms,
            },
        );
        source.set_audio_callback(Some(Box::new(move |samples| {
            processor.process_audio(samples);
        })));

        source.start()?;
        info!(
            "Microphone capture started ({}ms buffers, finalize every {}ms)",
            args.buffer_ms, args.finalize_ms
        );
        Ok(source)
    }

    fn finalize_benchmark(&self, benchmark: &BenchmarkManager) {
        info!("Finalizing benchmark results...");
        let results = benchmark.stop();

        let format = self.args.report_format();
        let output: PathBuf = self.args.benchmark_output.clone().unwrap_or_else(|| {
            let epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            PathBuf::from(format!("benchmark_results_{}.{}", epoch, format.extension()))
        });

        let model_path = self.args.model.as_deref().map(Path::new);
        match export_results(&results, &output, model_path, format) {
            Ok(()) => {
                info!("=== BENCHMARK SUMMARY ===");
                info!("Word Error Rate: {:.2}%", results.word_error_rate);
                info!("Character Error Rate: {:.2}%", results.character_error_rate);
                info!("Real-time Factor: {:.2}x", results.real_time_factor);
                info!("Average Latency: {:.2} ms", results.average_latency_ms);
                info!("Average Confidence: {:.3}", results.average_confidence);
                info!("Results exported to: {}", output.display());
            }
            Err(e) => error!("Failed to export benchmark results: {e}"),
        }
    }

    fn log_stats(&self, state: &ServerState, benchmark: Option<&BenchmarkManager>) {
        info!(
            "Stats: {} clients, {} messages processed, {} samples",
            state.connected_clients.load(Ordering::Relaxed),
            state.messages_processed.load(Ordering::Relaxed),
            state.engine.total_samples(),
        );
        if let Some(dropped) = &state.mic_dropped_frames {
            let dropped = dropped.load(Ordering::Relaxed);
            if dropped > 0 {
                warn!("Microphone dropped {} frames so far", dropped);
            }
        }
        if let Some(benchmark) = benchmark {
            let results = benchmark.snapshot();
            info!(
                "Benchmark: WER={:.2}%, RTF={:.2}x, segments={}",
                results.word_error_rate, results.real_time_factor, results.total_segments
            );
        }
    }
}
