use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::accumulator::{FrameAccumulator, PushResult};
use crate::device::{DeviceInfo, DeviceManager};
use crate::queue::{audio_queue, BufferConsumer, BufferProducer};
use crate::PcmBuffer;
use vstream_foundation::AudioError;

/// Consumer callback invoked on the worker thread with each accumulated
/// buffer. Buffers are borrowed so the worker can recycle their storage
/// back to the capture pool.
pub type AudioCallback = Box<dyn FnMut(&[i16]) + Send>;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: u32,
    /// Input device index as printed by `list_devices`; `None` = host default.
    pub device_index: Option<usize>,
    /// Queue capacity in accumulated buffers.
    pub queue_capacity: usize,
    /// How much audio to accumulate before handing a buffer to the consumer.
    pub accumulate_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            frames_per_buffer: 160,
            device_index: None,
            queue_capacity: 128,
            accumulate_ms: 100,
        }
    }
}

/// Condvar-backed signal from the realtime callback to the consumer worker.
/// The worker only ever waits with a bound, so a missed notify costs at
/// most one timeout period.
struct QueueSignal {
    lock: Mutex<()>,
    cond: Condvar,
}

impl QueueSignal {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    fn notify(&self) {
        self.cond.notify_one();
    }

    fn notify_all(&self) {
        self.cond.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        self.cond.wait_for(&mut guard, timeout);
    }
}

/// Microphone capture source.
///
/// The cpal callback accumulates bursts into fixed-duration buffers and
/// moves them into the queue with a wait-free try-enqueue; overflow is
/// counted, never blocked on. A worker thread delivers buffers to the
/// registered callback, or the owner can poll `dequeue` instead.
///
/// Buffer storage is reserved at `start` and circulates: the worker
/// returns drained buffers through a second wait-free ring, so the
/// realtime callback never allocates.
pub struct CaptureSource {
    config: CaptureConfig,
    device_manager: DeviceManager,
    stream: Option<Stream>,
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    dropped_frames: Arc<AtomicU64>,
    signal: Arc<QueueSignal>,
    consumer: Arc<Mutex<Option<BufferConsumer>>>,
    recycle_tx: Arc<Mutex<Option<BufferProducer>>>,
    callback: Arc<Mutex<Option<AudioCallback>>>,
}

impl CaptureSource {
    pub fn new(config: CaptureConfig) -> Result<Self, AudioError> {
        Ok(Self {
            config,
            device_manager: DeviceManager::new()?,
            stream: None,
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
            dropped_frames: Arc::new(AtomicU64::new(0)),
            signal: Arc::new(QueueSignal::new()),
            consumer: Arc::new(Mutex::new(None)),
            recycle_tx: Arc::new(Mutex::new(None)),
            callback: Arc::new(Mutex::new(None)),
        })
    }

    /// Register or replace the consumer callback. `None` disables
    /// worker-thread delivery; `dequeue` remains available. Takes effect
    /// immediately for delivery, at the next `start` for worker spawning.
    pub fn set_audio_callback(&self, callback: Option<AudioCallback>) {
        *self.callback.lock() = callback;
    }

    /// Open the device and start the stream. Idempotent while running.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = self.device_manager.open_input(self.config.device_index)?;
        if let Ok(name) = device.name() {
            tracing::info!("Using audio input device: {}", name);
        }
        let sample_format = device.default_input_config()?.sample_format();

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.frames_per_buffer),
        };

        let (producer, rx) = audio_queue(self.config.queue_capacity);
        *self.consumer.lock() = Some(rx);

        // Enough pooled buffers to cover a full queue plus one in the
        // worker's hands and one spare
        let pool_buffers = self.config.queue_capacity + 2;
        let (recycle_tx, recycle_rx) = audio_queue(pool_buffers + 2);
        *self.recycle_tx.lock() = Some(recycle_tx);

        let accumulator = FrameAccumulator::new(
            self.config.sample_rate,
            self.config.accumulate_ms,
            self.config.channels,
            self.config.frames_per_buffer as usize,
            pool_buffers,
        );
        tracing::info!(
            "Accumulating {}ms of audio ({} frames) per buffer, {} pooled buffers",
            self.config.accumulate_ms,
            accumulator.target_frames(),
            pool_buffers
        );

        self.running.store(true, Ordering::SeqCst);
        self.dropped_frames.store(0, Ordering::SeqCst);

        let stream = self.build_stream(
            device,
            stream_config,
            sample_format,
            producer,
            accumulator,
            recycle_rx,
        );
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                *self.consumer.lock() = None;
                *self.recycle_tx.lock() = None;
                return Err(e);
            }
        };

        if let Err(e) = stream.play() {
            self.running.store(false, Ordering::SeqCst);
            *self.consumer.lock() = None;
            *self.recycle_tx.lock() = None;
            return Err(e.into());
        }
        self.stream = Some(stream);

        if self.callback.lock().is_some() {
            if let Err(e) = self.spawn_worker() {
                self.stop();
                return Err(e);
            }
        }

        Ok(())
    }

    /// Stop the stream, join the worker and drain the queue.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.signal.notify_all();

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        if let Some(stream) = self.stream.take() {
            drop(stream);
        }

        if let Some(consumer) = self.consumer.lock().as_mut() {
            while consumer.try_pop().is_some() {}
        }
        *self.recycle_tx.lock() = None;
        tracing::info!("Capture stopped");
    }

    /// Pull-mode access: dequeue one accumulated buffer. Non-blocking.
    /// Hand the buffer back through `recycle` when done with it, or the
    /// capture pool eventually drains and audio is dropped.
    pub fn dequeue(&self) -> Option<PcmBuffer> {
        self.consumer.lock().as_mut()?.try_pop()
    }

    /// Return a dequeued buffer's storage to the capture pool.
    pub fn recycle(&self, mut buffer: PcmBuffer) {
        buffer.clear();
        if let Some(tx) = self.recycle_tx.lock().as_mut() {
            let _ = tx.try_push(buffer);
        }
    }

    /// Frames lost to queue overflow since the last `start`.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Shared handle to the dropped-frames counter (for stats reporting).
    pub fn dropped_frames_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped_frames)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enumerate input devices for CLI use.
    pub fn list_devices() -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(DeviceManager::new()?.enumerate())
    }

    fn spawn_worker(&mut self) -> Result<(), AudioError> {
        let running = Arc::clone(&self.running);
        let signal = Arc::clone(&self.signal);
        let consumer = Arc::clone(&self.consumer);
        let recycle_tx = Arc::clone(&self.recycle_tx);
        let callback = Arc::clone(&self.callback);

        let handle = thread::Builder::new()
            .name("audio-consumer".to_string())
            .spawn(move || {
                tracing::debug!("Audio consumer worker started");
                while running.load(Ordering::SeqCst) {
                    let delivered = {
                        let mut cb_guard = callback.lock();
                        match cb_guard.as_mut() {
                            Some(cb) => {
                                let buf = consumer.lock().as_mut().and_then(|c| c.try_pop());
                                match buf {
                                    Some(mut buf) => {
                                        cb(&buf);
                                        // Storage goes back to the
                                        // capture pool
                                        buf.clear();
                                        if let Some(tx) = recycle_tx.lock().as_mut() {
                                            let _ = tx.try_push(buf);
                                        }
                                        true
                                    }
                                    None => false,
                                }
                            }
                            None => false,
                        }
                    };
                    if !delivered {
                        signal.wait_timeout(Duration::from_millis(100));
                    }
                }
                tracing::debug!("Audio consumer worker stopped");
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn consumer worker: {e}")))?;

        self.worker = Some(handle);
        Ok(())
    }

    fn build_stream(
        &self,
        device: cpal::Device,
        config: StreamConfig,
        sample_format: SampleFormat,
        mut producer: BufferProducer,
        mut accumulator: FrameAccumulator,
        mut recycle_rx: BufferConsumer,
    ) -> Result<Stream, AudioError> {
        let running = Arc::clone(&self.running);
        let dropped = Arc::clone(&self.dropped_frames);
        let signal = Arc::clone(&self.signal);
        let channels = self.config.channels as usize;
        // One burst of headroom; the host may deliver larger bursts than
        // requested, so keep a floor as well
        let scratch_capacity = (self.config.frames_per_buffer as usize * channels).max(4096);

        let err_fn = |err: cpal::StreamError| {
            // Runtime device errors are non-fatal; the stream keeps going
            // where it can and the gap shows up as missing buffers.
            tracing::error!("Audio stream error: {}", err);
        };

        // No allocation, locking or logging beyond this point: everything
        // below runs on the realtime thread. Buffer storage circulates
        // between the pool, the queue and the recycle ring.
        let mut handle_i16 = move |data: &[i16]| {
            if !running.load(Ordering::SeqCst) {
                return;
            }

            // Reclaim buffers the worker has finished with
            while let Some(returned) = recycle_rx.try_pop() {
                accumulator.recycle(returned);
            }

            match accumulator.push(data) {
                PushResult::Pending => {}
                PushResult::Full(buffer) => {
                    let frames = (buffer.len() / channels) as u64;
                    match producer.try_push(buffer) {
                        Ok(()) => signal.notify(),
                        Err(rejected) => {
                            dropped.fetch_add(frames, Ordering::Relaxed);
                            accumulator.recycle(rejected);
                        }
                    }
                }
                PushResult::Dropped { frames } => {
                    dropped.fetch_add(frames as u64, Ordering::Relaxed);
                }
            }
        };

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &_| handle_i16(data),
                err_fn,
                None,
            )?,
            SampleFormat::F32 => {
                let mut scratch: Vec<i16> = Vec::with_capacity(scratch_capacity);
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &_| {
                        scratch.clear();
                        for &s in data {
                            scratch.push((s.clamp(-1.0, 1.0) * 32767.0).round() as i16);
                        }
                        handle_i16(&scratch);
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let mut scratch: Vec<i16> = Vec::with_capacity(scratch_capacity);
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &_| {
                        scratch.clear();
                        for &s in data {
                            scratch.push((s as i32 - 32768) as i16);
                        }
                        handle_i16(&scratch);
                    },
                    err_fn,
                    None,
                )?
            }
            other => {
                return Err(AudioError::FormatNotSupported {
                    format: format!("{:?}", other),
                });
            }
        };

        Ok(stream)
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod convert_tests {
    // Sample widening used by the capture callback

    #[test]
    fn f32_to_i16_clamps_and_scales() {
        let src = [-1.5f32, -1.0, 0.0, 0.5, 1.0, 2.0];
        let out: Vec<i16> = src
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
            .collect();
        assert_eq!(out, vec![-32767, -32767, 0, 16384, 32767, 32767]);
    }

    #[test]
    fn u16_to_i16_centers() {
        let src = [0u16, 32768, 65535];
        let out: Vec<i16> = src.iter().map(|&s| (s as i32 - 32768) as i16).collect();
        assert_eq!(out, vec![-32768, 0, 32767]);
    }
}
