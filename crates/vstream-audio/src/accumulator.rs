use crate::PcmBuffer;

/// Outcome of feeding one burst to the accumulator.
#[derive(Debug)]
pub enum PushResult {
    /// Still accumulating toward the target frame count.
    Pending,
    /// Target reached; the full buffer, swapped for a pooled spare.
    Full(PcmBuffer),
    /// Audio had to be discarded: the spare pool was empty at the target
    /// boundary, or the burst would have grown the buffer past its
    /// reserved capacity. Carries the discarded frame count.
    Dropped { frames: usize },
}

/// Accumulates realtime callback bursts into fixed-duration buffers.
///
/// All storage is reserved at construction: the active buffer and a pool
/// of spares, each sized to the target plus one burst of headroom (a burst
/// may straddle the target boundary). Emission swaps in a spare; drained
/// buffers come back through `recycle`. The push path never touches the
/// allocator, so it is safe to call from a realtime audio callback. When
/// the pool is empty or a burst would overflow the reserved capacity, the
/// audio is discarded and reported as dropped frames.
pub struct FrameAccumulator {
    buffer: PcmBuffer,
    spares: Vec<PcmBuffer>,
    frames: usize,
    target_frames: usize,
    channels: usize,
    capacity: usize,
}

impl FrameAccumulator {
    pub fn new(
        sample_rate: u32,
        accumulate_ms: u32,
        channels: u16,
        headroom_frames: usize,
        pool_buffers: usize,
    ) -> Self {
        let target_frames = (sample_rate as usize * accumulate_ms as usize) / 1000;
        let channels = channels as usize;
        let capacity = (target_frames + headroom_frames) * channels;

        let mut spares = Vec::with_capacity(pool_buffers + 2);
        for _ in 0..pool_buffers {
            spares.push(Vec::with_capacity(capacity));
        }

        Self {
            buffer: Vec::with_capacity(capacity),
            spares,
            frames: 0,
            target_frames,
            channels,
            capacity,
        }
    }

    /// Append one interleaved burst. Allocation-free: a full buffer is
    /// exchanged for a pooled spare, and overflow is reported as a drop.
    pub fn push(&mut self, samples: &[i16]) -> PushResult {
        let burst_frames = samples.len() / self.channels;

        if self.buffer.len() + samples.len() > self.capacity {
            // Growing past the reservation would reallocate on the
            // realtime thread; discard instead
            let frames = self.frames + burst_frames;
            self.buffer.clear();
            self.frames = 0;
            return PushResult::Dropped { frames };
        }

        self.buffer.extend_from_slice(samples);
        self.frames += burst_frames;

        if self.frames < self.target_frames {
            return PushResult::Pending;
        }

        match self.spares.pop() {
            Some(spare) => {
                let full = std::mem::replace(&mut self.buffer, spare);
                self.frames = 0;
                PushResult::Full(full)
            }
            None => {
                let frames = self.frames;
                self.buffer.clear();
                self.frames = 0;
                PushResult::Dropped { frames }
            }
        }
    }

    /// Return a drained buffer to the spare pool. The buffer keeps its
    /// allocation; only its contents are cleared.
    pub fn recycle(&mut self, mut buffer: PcmBuffer) {
        buffer.clear();
        self.spares.push(buffer);
    }

    /// Frames buffered since the last emission.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn target_frames(&self) -> usize {
        self.target_frames
    }

    /// Spare buffers currently available for emission.
    pub fn available_spares(&self) -> usize {
        self.spares.len()
    }

    /// Discard any partially accumulated audio.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 16kHz, 100ms => 1600 frames per buffer

    fn accumulator(pool: usize) -> FrameAccumulator {
        FrameAccumulator::new(16_000, 100, 1, 160, pool)
    }

    #[test]
    fn emits_nothing_below_target() {
        let mut acc = accumulator(4);
        let burst = vec![0i16; 160];
        for _ in 0..9 {
            assert!(matches!(acc.push(&burst), PushResult::Pending));
        }
        assert_eq!(acc.frames(), 1440);
    }

    #[test]
    fn exactly_target_frames_emits_one_buffer() {
        let mut acc = accumulator(4);
        let burst = vec![7i16; 160];
        let mut emitted = None;
        for _ in 0..10 {
            if let PushResult::Full(buf) = acc.push(&burst) {
                assert!(emitted.is_none());
                emitted = Some(buf);
            }
        }
        let buf = emitted.expect("10 bursts of 160 frames reach the 1600-frame target");
        assert_eq!(buf.len(), 1600);
        assert_eq!(acc.frames(), 0);
    }

    #[test]
    fn one_frame_short_does_not_emit() {
        let mut acc = FrameAccumulator::new(16_000, 100, 1, 1600, 4);
        assert!(matches!(acc.push(&vec![0i16; 1599]), PushResult::Pending));
        assert_eq!(acc.frames(), 1599);
        // The next single frame completes the buffer
        match acc.push(&[0i16; 1]) {
            PushResult::Full(buf) => assert_eq!(buf.len(), 1600),
            other => panic!("expected a full buffer, got {other:?}"),
        }
    }

    #[test]
    fn stereo_counts_frames_not_samples() {
        let mut acc = FrameAccumulator::new(16_000, 100, 2, 160, 4);
        // 1600 stereo frames = 3200 samples
        assert!(matches!(acc.push(&vec![0i16; 3198]), PushResult::Pending));
        match acc.push(&[0i16; 2]) {
            PushResult::Full(buf) => {
                assert_eq!(buf.len(), 3200);
                assert_eq!(buf.len() % 2, 0);
            }
            other => panic!("expected a full buffer, got {other:?}"),
        }
    }

    #[test]
    fn straddling_burst_emits_with_overshoot() {
        let mut acc = FrameAccumulator::new(16_000, 100, 1, 480, 4);
        acc.push(&vec![0i16; 1500]);
        match acc.push(&vec![0i16; 480]) {
            PushResult::Full(buf) => assert_eq!(buf.len(), 1980),
            other => panic!("expected a full buffer, got {other:?}"),
        }
        assert_eq!(acc.frames(), 0);
    }

    #[test]
    fn empty_pool_drops_at_the_target_boundary() {
        let mut acc = accumulator(1);
        let burst = vec![0i16; 1600];

        let PushResult::Full(first) = acc.push(&burst) else {
            panic!("expected a full buffer");
        };
        assert_eq!(acc.available_spares(), 0);

        // No spare left: the next full buffer is discarded in place
        match acc.push(&burst) {
            PushResult::Dropped { frames } => assert_eq!(frames, 1600),
            other => panic!("expected a drop, got {other:?}"),
        }

        // Recycling the drained buffer restores emission
        acc.recycle(first);
        assert!(matches!(acc.push(&burst), PushResult::Full(_)));
    }

    #[test]
    fn recycled_buffers_keep_their_allocation() {
        let mut acc = accumulator(1);
        let burst = vec![0i16; 1600];

        let PushResult::Full(buf) = acc.push(&burst) else {
            panic!("expected a full buffer");
        };
        let ptr = buf.as_ptr();
        let cap = buf.capacity();
        acc.recycle(buf);

        let PushResult::Full(again) = acc.push(&burst) else {
            panic!("expected a full buffer");
        };
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(again.capacity(), cap);
    }

    #[test]
    fn oversized_burst_is_dropped_not_grown() {
        // Capacity is (1600 + 160) mono samples; a burst that would
        // overflow it is discarded along with the accumulated audio
        let mut acc = accumulator(4);
        acc.push(&vec![0i16; 1500]);
        match acc.push(&vec![0i16; 400]) {
            PushResult::Dropped { frames } => assert_eq!(frames, 1900),
            other => panic!("expected a drop, got {other:?}"),
        }
        assert_eq!(acc.frames(), 0);
    }

    #[test]
    fn reset_discards_partial_audio() {
        let mut acc = accumulator(4);
        acc.push(&vec![0i16; 800]);
        acc.reset();
        assert_eq!(acc.frames(), 0);
        assert!(matches!(acc.push(&vec![0i16; 1599]), PushResult::Pending));
    }
}
