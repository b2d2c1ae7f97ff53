use crate::types::TranscriptionEvent;

/// Subscriber interface over which transcription events leave the core.
pub trait TranscriptionSink: Send + Sync {
    fn publish(&self, event: TranscriptionEvent);
}

/// Discards every event; useful when running without a server.
pub struct NullSink;

impl TranscriptionSink for NullSink {
    fn publish(&self, _event: TranscriptionEvent) {}
}
