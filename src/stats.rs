//! Streaming statistics shared between the reader thread and the application.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use metrics::{counter, gauge};
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::warn;

use crate::parser::Discard;

/// Connection state machine of the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Streaming = 2,
    Error = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Streaming,
            3 => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Default)]
struct Counters {
    total_frames: AtomicU64,
    discarded_frames: AtomicU64,
    buffer_overruns: AtomicU64,
    reconnects: AtomicU64,
    fps_bits: AtomicU64,
    state: AtomicU8,
    in_overrun: AtomicBool,
}

/// Lock-free counters written by the reader, read by anyone.
#[derive(Default)]
pub struct StatsRecorder {
    counters: CachePadded<Counters>,
    last_error: ArcSwapOption<String>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn frame_published(&self) {
        self.counters.total_frames.fetch_add(1, Ordering::Relaxed);
        counter!("mjpeg_frames_total").increment(1);
    }

    pub(crate) fn frame_discarded(&self, reason: Discard) {
        self.counters.discarded_frames.fetch_add(1, Ordering::Relaxed);
        counter!("mjpeg_discarded_frames_total", "reason" => reason.as_str()).increment(1);
    }

    /// No free buffer for a new part.
    pub(crate) fn overrun(&self) {
        self.counters.buffer_overruns.fetch_add(1, Ordering::Relaxed);
        counter!("mjpeg_buffer_overruns_total").increment(1);
        if !self.counters.in_overrun.swap(true, Ordering::Relaxed) {
            warn!("out of free buffers, dropping frames");
        }
    }

    pub(crate) fn buffer_acquired(&self) {
        self.counters.in_overrun.store(false, Ordering::Relaxed);
    }

    pub(crate) fn reconnect(&self) {
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        counter!("mjpeg_reconnects_total").increment(1);
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.counters.state.store(state as u8, Ordering::Release);
        if state != ConnectionState::Streaming {
            self.set_fps(0.0);
        }
    }

    pub(crate) fn set_fps(&self, fps: f64) {
        self.counters.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        gauge!("mjpeg_fps").set(fps);
    }

    pub(crate) fn set_last_error(&self, error: Option<String>) {
        self.last_error.store(error.map(Arc::new));
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.counters.state.load(Ordering::Acquire))
    }

    /// Counter values at this instant. Queue depths are left at zero.
    pub fn snapshot(&self) -> Stats {
        let c = &self.counters;
        Stats {
            total_frames: c.total_frames.load(Ordering::Relaxed),
            discarded_frames: c.discarded_frames.load(Ordering::Relaxed),
            buffer_overruns: c.buffer_overruns.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            fps: f64::from_bits(c.fps_bits.load(Ordering::Relaxed)),
            state: self.state(),
            in_overrun: c.in_overrun.load(Ordering::Relaxed),
            last_error: self.last_error.load_full().map(|e| e.as_ref().clone()),
            free_buffers: 0,
            filled_buffers: 0,
        }
    }
}

/// Point-in-time copy of the client statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    /// Frames handed to the filled queue.
    pub total_frames: u64,
    /// Parts that did not produce a frame (overrun, oversized, empty).
    pub discarded_frames: u64,
    pub buffer_overruns: u64,
    pub reconnects: u64,
    pub fps: f64,
    pub state: ConnectionState,
    /// Currently out of free buffers.
    pub in_overrun: bool,
    pub last_error: Option<String>,
    pub free_buffers: usize,
    pub filled_buffers: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  State           : {:?}", self.state)?;
        writeln!(f, "  FPS             : {:.1}", self.fps)?;
        writeln!(f, "  Buffer overruns : {}", self.buffer_overruns)?;
        writeln!(f, "  Reconnects      : {}", self.reconnects)?;
        writeln!(f, "  Total frames    : {}", self.total_frames)?;
        writeln!(f, "  Discarded frames: {}", self.discarded_frames)?;
        write!(
            f,
            "  Buffer queue    : {} free, {} filled",
            self.free_buffers, self.filled_buffers
        )?;
        if let Some(err) = &self.last_error {
            write!(f, "\n  Last error      : {err}")?;
        }
        Ok(())
    }
}

/// Frame rate over the last `window` frames. Owned by the reader.
pub(crate) struct FpsMeter {
    window: HeapRb<Instant>,
}

impl FpsMeter {
    pub fn new(window: usize) -> Self {
        Self {
            window: HeapRb::new(window.max(2)),
        }
    }

    /// Record a frame at `now` and return the current rate.
    pub fn tick(&mut self, now: Instant) -> f64 {
        self.window.push_overwrite(now);

        let n = self.window.occupied_len();
        let (Some(first), Some(last)) = (self.window.iter().next(), self.window.iter().last()) else {
            return 0.0;
        };
        let span = last.duration_since(*first).as_secs_f64();
        if n < 2 || span <= 0.0 {
            return 0.0;
        }
        (n - 1) as f64 / span
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}
