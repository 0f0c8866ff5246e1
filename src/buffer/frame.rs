use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;

/// Fixed-capacity frame buffer recycled between the reader and the application.
///
/// A buffer is never shared: it moves between the application, the free queue,
/// the reader and the filled queue. `used` never exceeds `capacity`.
pub struct Buffer {
    data: Box<[u8]>,
    used: usize,
    timestamp: SystemTime,
    sequence: u64,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
            timestamp: SystemTime::UNIX_EPOCH,
            sequence: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid frame bytes.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Wall-clock time the first byte of the frame was received.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Frame number within the client's lifetime. Gaps mean frames were dropped.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The JPEG bytes of the frame.
    pub fn frame(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Copy the frame out so it can outlive the buffer.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.frame())
    }

    /// Write `src` at `offset`, truncated to the capacity. Returns bytes written.
    pub(crate) fn write_at(&mut self, offset: usize, src: &[u8]) -> usize {
        if offset >= self.data.len() {
            return 0;
        }
        let n = src.len().min(self.data.len() - offset);
        self.data[offset..offset + n].copy_from_slice(&src[..n]);
        n
    }

    pub(crate) fn mark_filled(&mut self, used: usize, timestamp: SystemTime) {
        self.used = used.min(self.data.len());
        self.timestamp = timestamp;
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub(crate) fn clear(&mut self) {
        self.used = 0;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("used", &self.used)
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .finish()
    }
}
