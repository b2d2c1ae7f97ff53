use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::PcmBuffer;

/// Create a bounded SPSC queue of owned PCM buffers.
///
/// The producer half lives on the realtime callback thread, the consumer
/// half on the worker. Neither operation blocks or allocates; a failed
/// enqueue returns the buffer to the caller so it can be accounted as
/// dropped.
pub fn audio_queue(capacity: usize) -> (BufferProducer, BufferConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (BufferProducer { producer }, BufferConsumer { consumer })
}

/// Producer half (realtime thread).
pub struct BufferProducer {
    producer: Producer<PcmBuffer>,
}

impl BufferProducer {
    /// Try to enqueue a buffer without blocking. On a full queue the
    /// buffer is handed back unchanged.
    pub fn try_push(&mut self, buffer: PcmBuffer) -> Result<(), PcmBuffer> {
        self.producer.push(buffer).map_err(|PushError::Full(b)| b)
    }

    /// Free slots remaining.
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half (worker thread).
pub struct BufferConsumer {
    consumer: Consumer<PcmBuffer>,
}

impl BufferConsumer {
    /// Dequeue the next buffer if one is available. Non-blocking.
    pub fn try_pop(&mut self) -> Option<PcmBuffer> {
        self.consumer.pop().ok()
    }

    /// Buffers currently queued.
    pub fn slots(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.slots() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_preserves_order() {
        let (mut tx, mut rx) = audio_queue(4);
        tx.try_push(vec![1, 2]).unwrap();
        tx.try_push(vec![3, 4]).unwrap();

        assert_eq!(rx.try_pop(), Some(vec![1, 2]));
        assert_eq!(rx.try_pop(), Some(vec![3, 4]));
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn full_queue_returns_buffer_and_is_unchanged() {
        let (mut tx, mut rx) = audio_queue(2);
        tx.try_push(vec![1]).unwrap();
        tx.try_push(vec![2]).unwrap();

        // Third push fails and hands the buffer back
        let rejected = tx.try_push(vec![3]).unwrap_err();
        assert_eq!(rejected, vec![3]);

        // The two retained buffers drain in order
        assert_eq!(rx.try_pop(), Some(vec![1]));
        assert_eq!(rx.try_pop(), Some(vec![2]));
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn slots_track_occupancy() {
        let (mut tx, mut rx) = audio_queue(2);
        assert_eq!(tx.slots(), 2);
        tx.try_push(vec![0]).unwrap();
        assert_eq!(tx.slots(), 1);
        assert_eq!(rx.slots(), 1);
        rx.try_pop();
        assert!(rx.is_empty());
    }
}
