//! WebSocket transport: remote clients stream PCM in and receive
//! transcriptions and command replies; final transcriptions from any
//! producer fan out to every connected client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use vstream_bench::{BenchmarkManager, SegmentKind};
use vstream_foundation::{AppError, ShutdownGuard};
use vstream_stt::{
    epoch_millis, RecognizerOutput, SpeechEngine, TranscriptionEvent, TranscriptionKind,
    TranscriptionSink,
};

/// Inbound client messages, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Audio {
        samples: Vec<i16>,
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
        #[serde(default = "default_channels")]
        channels: u16,
        #[serde(default = "default_session_id")]
        session_id: String,
        #[serde(default)]
        timestamp: u64,
    },
    Command {
        command: String,
        #[serde(default)]
        params: Value,
    },
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_channels() -> u16 {
    1
}

fn default_session_id() -> String {
    "default".to_string()
}

/// Outbound server messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Transcription {
        content: String,
        session_id: String,
        confidence: f32,
        is_final: bool,
    },
    CommandResponse {
        command: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(flatten)]
        data: Map<String, Value>,
    },
}

impl ServerMessage {
    fn ok(command: &str, message: &str) -> Self {
        Self::CommandResponse {
            command: command.to_string(),
            status: "ok".to_string(),
            message: Some(message.to_string()),
            data: Map::new(),
        }
    }

    fn ok_with(command: &str, data: Map<String, Value>) -> Self {
        Self::CommandResponse {
            command: command.to_string(),
            status: "ok".to_string(),
            message: None,
            data,
        }
    }

    fn error(command: &str, message: &str) -> Self {
        Self::CommandResponse {
            command: command.to_string(),
            status: "error".to_string(),
            message: Some(message.to_string()),
            data: Map::new(),
        }
    }
}

/// Publishes final transcriptions into the fan-out channel. A send with
/// no subscribers is not an error; it just means nobody is listening.
pub struct BroadcastSink(pub broadcast::Sender<TranscriptionEvent>);

impl TranscriptionSink for BroadcastSink {
    fn publish(&self, event: TranscriptionEvent) {
        if self.0.send(event).is_err() {
            debug!("No transcription subscribers connected");
        }
    }
}

pub struct ServerState {
    pub engine: Arc<dyn SpeechEngine>,
    pub benchmark: Option<Arc<BenchmarkManager>>,
    pub events: broadcast::Sender<TranscriptionEvent>,
    pub shutdown: ShutdownGuard,
    pub started_at: Instant,
    pub messages_processed: AtomicU64,
    pub connected_clients: AtomicUsize,
    pub mic_dropped_frames: Option<Arc<AtomicU64>>,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

/// Bind and serve until shutdown is requested.
pub async fn serve(state: Arc<ServerState>, port: u16) -> Result<(), AppError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Fatal(format!("Failed to bind port {port}: {e}")))?;
    info!("WebSocket server listening on {}", addr);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(|e| AppError::Fatal(format!("Server error: {e}")))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    state.connected_clients.fetch_add(1, Ordering::Relaxed);
    info!(
        "Client connected ({} active)",
        state.connected_clients.load(Ordering::Relaxed)
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);

    // Writer task: everything leaving this connection goes through one
    // channel so transcription fan-out and command replies cannot
    // interleave mid-frame.
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Forward broadcast transcriptions to this client
    let mut events_rx = state.events.subscribe();
    let forward_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => {
                    let msg = ServerMessage::Transcription {
                        is_final: event.is_final(),
                        content: event.text,
                        session_id: event.session_id,
                        confidence: event.confidence,
                    };
                    if forward_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client fell behind, skipped {} transcriptions", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Consecutive-duplicate filters are per connection; there is no
    // cross-client ordering to dedup against.
    let mut last_final_text = String::new();
    let mut last_partial_text = String::new();

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Audio {
                    samples,
                    session_id,
                    ..
                }) => {
                    handle_audio(
                        &state,
                        &out_tx,
                        &samples,
                        session_id,
                        &mut last_final_text,
                        &mut last_partial_text,
                    )
                    .await;
                }
                Ok(ClientMessage::Command { command, params }) => {
                    debug!("Received command: {}", command);
                    let response = handle_command(&state, &command, &params);
                    if out_tx.send(response).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Malformed client message, skipping: {}", e);
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;

    state.connected_clients.fetch_sub(1, Ordering::Relaxed);
    info!(
        "Client disconnected ({} active)",
        state.connected_clients.load(Ordering::Relaxed)
    );
}

async fn handle_audio(
    state: &ServerState,
    out_tx: &mpsc::Sender<ServerMessage>,
    samples: &[i16],
    session_id: String,
    last_final_text: &mut String,
    last_partial_text: &mut String,
) {
    let started = Instant::now();
    let output = state.engine.process(samples, false);
    state.messages_processed.fetch_add(1, Ordering::Relaxed);
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    match output {
        RecognizerOutput::Final(result) if !result.text.is_empty() => {
            if result.text == *last_final_text {
                return;
            }
            *last_final_text = result.text.clone();
            let confidence = result.confidence();

            // Finals fan out to every connected client
            let _ = state.events.send(TranscriptionEvent {
                text: result.text.clone(),
                kind: TranscriptionKind::Final,
                session_id,
                confidence,
                emitted_at: epoch_millis(),
            });

            if let Some(benchmark) = &state.benchmark {
                benchmark.add_transcription(
                    &result.text,
                    SegmentKind::Final,
                    confidence as f64,
                    samples.len() as u64,
                    latency_ms,
                );
            }
        }
        RecognizerOutput::Partial(partial) if !partial.is_empty() => {
            if partial == *last_partial_text {
                return;
            }
            *last_partial_text = partial.clone();

            // Partials are never broadcast; only the producing client
            // sees its own
            let _ = out_tx
                .send(ServerMessage::Transcription {
                    content: partial.clone(),
                    session_id,
                    confidence: 1.0,
                    is_final: false,
                })
                .await;

            if let Some(benchmark) = &state.benchmark {
                benchmark.add_transcription(
                    &partial,
                    SegmentKind::Partial,
                    1.0,
                    samples.len() as u64,
                    latency_ms,
                );
            }
        }
        _ => {}
    }
}

fn handle_command(state: &ServerState, command: &str, params: &Value) -> ServerMessage {
    match command {
        "reset" => {
            state.engine.reset();
            info!("Recognizer reset via command");
            ServerMessage::ok(command, "Recognizer reset")
        }
        "set_grammar" => match params.get("grammar") {
            Some(grammar) => match state.engine.set_grammar(&grammar.to_string()) {
                Ok(()) => {
                    info!("Grammar updated via command");
                    ServerMessage::ok(command, "Grammar updated")
                }
                Err(e) => ServerMessage::error(command, &e.to_string()),
            },
            None => ServerMessage::error(command, "Missing grammar parameter"),
        },
        "stats" => {
            let mut data = Map::new();
            data.insert("stats".to_string(), stats_json(state));
            ServerMessage::ok_with(command, data)
        }
        "benchmark_results" => match &state.benchmark {
            Some(benchmark) => {
                let mut data = Map::new();
                data.insert("benchmark".to_string(), benchmark_summary(benchmark));
                ServerMessage::ok_with(command, data)
            }
            None => ServerMessage::error(command, "Benchmark not enabled"),
        },
        "stop" => {
            info!("Stop requested via command");
            state.shutdown.request_shutdown();
            ServerMessage::ok(command, "Server stopping")
        }
        other => {
            warn!("Unknown command received: {}", other);
            ServerMessage::error(other, "Unknown command")
        }
    }
}

pub fn stats_json(state: &ServerState) -> Value {
    let mut stats = json!({
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "messages_processed": state.messages_processed.load(Ordering::Relaxed),
        "running": true,
        "samples_processed": state.engine.total_samples(),
        "connected_clients": state.connected_clients.load(Ordering::Relaxed),
        "microphone_enabled": state.mic_dropped_frames.is_some(),
    });

    if let Some(dropped) = &state.mic_dropped_frames {
        stats["dropped_frames"] = json!(dropped.load(Ordering::Relaxed));
    }

    stats["benchmark"] = match &state.benchmark {
        Some(benchmark) => benchmark_summary(benchmark),
        None => json!({ "enabled": false }),
    };

    stats
}

fn benchmark_summary(benchmark: &BenchmarkManager) -> Value {
    let results = benchmark.snapshot();
    json!({
        "enabled": true,
        "word_error_rate": results.word_error_rate,
        "character_error_rate": results.character_error_rate,
        "real_time_factor": results.real_time_factor,
        "average_confidence": results.average_confidence,
        "total_segments": results.total_segments,
        "partial_segments": results.partial_segments,
        "final_segments": results.final_segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex as PlMutex;
    use std::collections::VecDeque;
    use vstream_foundation::ShutdownHandler;
    use vstream_stt::{FinalResult, SttError};

    struct MockEngine {
        outputs: PlMutex<VecDeque<RecognizerOutput>>,
        resets: AtomicUsize,
    }

    impl MockEngine {
        fn scripted(outputs: Vec<RecognizerOutput>) -> Arc<Self> {
            Arc::new(Self {
                outputs: PlMutex::new(outputs.into()),
                resets: AtomicUsize::new(0),
            })
        }
    }

    impl SpeechEngine for MockEngine {
        fn process(&self, _pcm: &[i16], _force_final: bool) -> RecognizerOutput {
            self.outputs
                .lock()
                .pop_front()
                .unwrap_or(RecognizerOutput::Empty)
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::Relaxed);
        }

        fn set_grammar(&self, grammar: &str) -> Result<(), SttError> {
            serde_json::from_str::<Vec<String>>(grammar)
                .map(|_| ())
                .map_err(|e| SttError::InvalidGrammar(e.to_string()))
        }

        fn set_max_alternatives(&self, _max: u32) {}
        fn set_nlsml_output(&self, _enable: bool) {}

        fn has_partial_result(&self) -> bool {
            false
        }

        fn total_samples(&self) -> u64 {
            7
        }

        fn partials_enabled(&self) -> bool {
            true
        }
    }

    fn test_state(engine: Arc<MockEngine>) -> Arc<ServerState> {
        let (events, _) = broadcast::channel(16);
        Arc::new(ServerState {
            engine,
            benchmark: None,
            events,
            shutdown: ShutdownHandler::new().install(),
            started_at: Instant::now(),
            messages_processed: AtomicU64::new(0),
            connected_clients: AtomicUsize::new(0),
            mic_dropped_frames: None,
        })
    }

    #[tokio::test]
    async fn reset_command_resets_engine() {
        let engine = MockEngine::scripted(vec![]);
        let state = test_state(Arc::clone(&engine));

        let response = handle_command(&state, "reset", &Value::Null);
        match response {
            ServerMessage::CommandResponse { command, status, .. } => {
                assert_eq!(command, "reset");
                assert_eq!(status, "ok");
            }
            other => panic!("unexpected response {other:?}"),
        }
        assert_eq!(engine.resets.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn set_grammar_requires_parameter() {
        let state = test_state(MockEngine::scripted(vec![]));

        let missing = handle_command(&state, "set_grammar", &json!({}));
        let ok = handle_command(&state, "set_grammar", &json!({"grammar": ["yes", "no"]}));

        match missing {
            ServerMessage::CommandResponse { status, .. } => assert_eq!(status, "error"),
            other => panic!("unexpected response {other:?}"),
        }
        match ok {
            ServerMessage::CommandResponse { status, .. } => assert_eq!(status, "ok"),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn stats_command_reports_engine_counters() {
        let state = test_state(MockEngine::scripted(vec![]));
        state.messages_processed.store(3, Ordering::Relaxed);

        let stats = stats_json(&state);
        assert_eq!(stats["messages_processed"], 3);
        assert_eq!(stats["samples_processed"], 7);
        assert_eq!(stats["microphone_enabled"], false);
        assert_eq!(stats["benchmark"]["enabled"], false);
    }

    #[tokio::test]
    async fn stop_command_requests_shutdown() {
        let state = test_state(MockEngine::scripted(vec![]));
        handle_command(&state, "stop", &Value::Null);
        assert!(state.shutdown.is_shutdown_requested());
    }

    #[tokio::test]
    async fn unknown_command_is_an_error() {
        let state = test_state(MockEngine::scripted(vec![]));
        match handle_command(&state, "rewind", &Value::Null) {
            ServerMessage::CommandResponse { status, message, .. } => {
                assert_eq!(status, "error");
                assert_eq!(message.as_deref(), Some("Unknown command"));
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn remote_finals_broadcast_and_dedup() {
        let engine = MockEngine::scripted(vec![
            RecognizerOutput::Final(FinalResult::from_text("ok")),
            RecognizerOutput::Final(FinalResult::from_text("ok")),
            RecognizerOutput::Final(FinalResult::from_text("done")),
        ]);
        let state = test_state(engine);
        let mut events_rx = state.events.subscribe();
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let mut last_final = String::new();
        let mut last_partial = String::new();
        for _ in 0..3 {
            handle_audio(
                &state,
                &out_tx,
                &[0i16; 160],
                "s1".to_string(),
                &mut last_final,
                &mut last_partial,
            )
            .await;
        }

        // Duplicate "ok" suppressed: exactly two broadcasts
        assert_eq!(events_rx.try_recv().unwrap().text, "ok");
        assert_eq!(events_rx.try_recv().unwrap().text, "done");
        assert!(events_rx.try_recv().is_err());
        assert_eq!(state.messages_processed.load(Ordering::Relaxed), 3);
        // Finals are not echoed on the per-connection channel
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn remote_partials_reply_to_sender_only() {
        let engine = MockEngine::scripted(vec![
            RecognizerOutput::Partial("hel".into()),
            RecognizerOutput::Partial("hel".into()),
            RecognizerOutput::Partial("hello".into()),
        ]);
        let state = test_state(engine);
        let mut events_rx = state.events.subscribe();
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let mut last_final = String::new();
        let mut last_partial = String::new();
        for _ in 0..3 {
            handle_audio(
                &state,
                &out_tx,
                &[0i16; 160],
                "s1".to_string(),
                &mut last_final,
                &mut last_partial,
            )
            .await;
        }

        // Two distinct partials sent back to the producer, none broadcast
        let first = out_rx.try_recv().unwrap();
        let second = out_rx.try_recv().unwrap();
        match (first, second) {
            (
                ServerMessage::Transcription { content: a, is_final: fa, .. },
                ServerMessage::Transcription { content: b, is_final: fb, .. },
            ) => {
                assert_eq!((a.as_str(), fa), ("hel", false));
                assert_eq!((b.as_str(), fb), ("hello", false));
            }
            other => panic!("unexpected messages {other:?}"),
        }
        assert!(out_rx.try_recv().is_err());
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn audio_message_parses_with_defaults() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "audio", "samples": [1, -2, 3]}"#).unwrap();
        match msg {
            ClientMessage::Audio {
                samples,
                sample_rate,
                channels,
                session_id,
                timestamp,
            } => {
                assert_eq!(samples, vec![1, -2, 3]);
                assert_eq!(sample_rate, 16_000);
                assert_eq!(channels, 1);
                assert_eq!(session_id, "default");
                assert_eq!(timestamp, 0);
            }
            other => panic!("expected audio message, got {other:?}"),
        }
    }

    #[test]
    fn command_message_parses_with_params() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "command", "command": "set_grammar", "params": {"grammar": ["yes", "no"]}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Command { command, params } => {
                assert_eq!(command, "set_grammar");
                assert_eq!(params["grammar"][0], "yes");
            }
            other => panic!("expected command message, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "video"}"#).is_err());
    }

    #[test]
    fn transcription_message_wire_shape() {
        let msg = ServerMessage::Transcription {
            content: "hello world".into(),
            session_id: "s1".into(),
            confidence: 0.9,
            is_final: true,
        };
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "transcription");
        assert_eq!(value["content"], "hello world");
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["is_final"], true);
    }

    #[test]
    fn command_response_flattens_payload() {
        let mut data = Map::new();
        data.insert("stats".to_string(), json!({"uptime_seconds": 5}));
        let msg = ServerMessage::ok_with("stats", data);
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "command_response");
        assert_eq!(value["command"], "stats");
        assert_eq!(value["status"], "ok");
        assert_eq!(value["stats"]["uptime_seconds"], 5);
        assert!(value.get("message").is_none());
    }
}
