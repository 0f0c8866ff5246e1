use std::time::Instant;

use tracing::debug;

use crate::buffer::{Buffer, BufferPool};
use crate::parser::{Discard, FrameSink};
use crate::stats::{FpsMeter, StatsRecorder};

/// Connects the parser to the buffer pool and the statistics.
pub(crate) struct PoolSink<'a> {
    pool: &'a BufferPool,
    stats: &'a StatsRecorder,
    fps: &'a mut FpsMeter,
    sequence: &'a mut u64,
    /// Frames published through this sink.
    pub delivered: u64,
}

impl<'a> PoolSink<'a> {
    pub fn new(
        pool: &'a BufferPool,
        stats: &'a StatsRecorder,
        fps: &'a mut FpsMeter,
        sequence: &'a mut u64,
    ) -> Self {
        Self {
            pool,
            stats,
            fps,
            sequence,
            delivered: 0,
        }
    }

    /// Every part gets a number, published or not, so gaps show drops.
    fn next_sequence(&mut self) -> u64 {
        let seq = *self.sequence;
        *self.sequence += 1;
        self.stats.set_fps(self.fps.tick(Instant::now()));
        seq
    }
}

impl FrameSink for PoolSink<'_> {
    fn acquire(&mut self) -> Option<Buffer> {
        let buf = self.pool.acquire_free();
        match buf {
            Some(_) => self.stats.buffer_acquired(),
            None => self.stats.overrun(),
        }
        buf
    }

    fn publish(&mut self, mut frame: Buffer) {
        frame.set_sequence(self.next_sequence());
        self.delivered += 1;
        self.stats.frame_published();
        self.pool.publish_filled(frame);
    }

    fn recycle(&mut self, buffer: Buffer) {
        self.pool.recycle(buffer);
    }

    fn discard(&mut self, reason: Discard) {
        let sequence = self.next_sequence();
        debug!(sequence, reason = reason.as_str(), "frame discarded");
        self.stats.frame_discarded(reason);
    }
}
