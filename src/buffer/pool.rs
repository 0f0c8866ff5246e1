//! Free/filled buffer queues shared between the reader thread and the application.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use flume::{Receiver, Selector, Sender};
use tracing::debug;

use super::Buffer;
use crate::error::{ClientError, DequeueError};

/// Two FIFO queues of fixed-size buffers.
///
/// The application fills `free` and drains `filled`. The reader only ever uses
/// the non-blocking side of each queue, so a slow consumer cannot stall the
/// network read.
pub struct BufferPool {
    free_tx: Sender<Buffer>,
    free_rx: Receiver<Buffer>,
    filled_tx: Sender<Buffer>,
    filled_rx: Receiver<Buffer>,

    /// Never sent on. Dropping the sender disconnects `shutdown_rx`, which
    /// wakes every waiter at once.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    stopped: AtomicBool,

    allocated: AtomicUsize,
}

impl BufferPool {
    pub fn new() -> Self {
        let (free_tx, free_rx) = flume::unbounded();
        let (filled_tx, filled_rx) = flume::unbounded();
        let (shutdown_tx, shutdown_rx) = flume::bounded(1);

        Self {
            free_tx,
            free_rx,
            filled_tx,
            filled_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            stopped: AtomicBool::new(false),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Allocate `count` buffers of `buffer_size` bytes. They are handed to the
    /// caller; nothing is queued until `enqueue_buffer`.
    pub fn request_buffers(
        &self,
        buffer_size: usize,
        count: usize,
    ) -> Result<Vec<Buffer>, ClientError> {
        if buffer_size == 0 {
            return Err(ClientError::InvalidArgument(
                "buffer size must be greater than zero".into(),
            ));
        }
        if count == 0 {
            return Err(ClientError::InvalidArgument(
                "buffer count must be greater than zero".into(),
            ));
        }

        self.allocated.fetch_add(count, Ordering::Relaxed);
        debug!(buffer_size, count, "allocated frame buffers");

        Ok((0..count).map(|_| Buffer::new(buffer_size)).collect())
    }

    /// Hand a buffer to the reader to be filled.
    pub fn enqueue_buffer(&self, mut buf: Buffer) {
        buf.clear();
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.free_tx.send(buf);
    }

    /// Block until a frame is available or the pool is stopped.
    pub fn dequeue_buffer(&self) -> Result<Buffer, DequeueError> {
        if self.is_stopped() {
            return Err(DequeueError::Stopped);
        }

        self.selector().wait()
    }

    /// Like [`dequeue_buffer`](Self::dequeue_buffer) but gives up after `timeout`.
    pub fn dequeue_buffer_timeout(&self, timeout: Duration) -> Result<Buffer, DequeueError> {
        if self.is_stopped() {
            return Err(DequeueError::Stopped);
        }

        self.selector()
            .wait_timeout(timeout)
            .unwrap_or(Err(DequeueError::Timeout))
    }

    /// Async variant for consumers running on a tokio runtime.
    pub async fn dequeue_buffer_async(&self) -> Result<Buffer, DequeueError> {
        if self.is_stopped() {
            return Err(DequeueError::Stopped);
        }

        tokio::select! {
            biased;
            _ = self.shutdown_rx.recv_async() => Err(DequeueError::Stopped),
            frame = self.filled_rx.recv_async() => frame.map_err(|_| DequeueError::Stopped),
        }
    }

    fn selector(&self) -> Selector<'_, Result<Buffer, DequeueError>> {
        Selector::new()
            .recv(&self.shutdown_rx, |_| Err(DequeueError::Stopped))
            .recv(&self.filled_rx, |frame| {
                frame.map_err(|_| DequeueError::Stopped)
            })
    }

    /// Wake every waiting consumer with [`DequeueError::Stopped`].
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Total number of buffers ever allocated by this pool.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn free_len(&self) -> usize {
        self.free_rx.len()
    }

    pub fn filled_len(&self) -> usize {
        self.filled_rx.len()
    }

    /// Reader side: take a free buffer without waiting.
    pub(crate) fn acquire_free(&self) -> Option<Buffer> {
        self.free_rx.try_recv().ok()
    }

    /// Reader side: hand a completed frame to the consumers.
    pub(crate) fn publish_filled(&self, buf: Buffer) {
        let _ = self.filled_tx.send(buf);
    }

    /// Reader side: give back a buffer whose frame was dropped.
    pub(crate) fn recycle(&self, buf: Buffer) {
        self.enqueue_buffer(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
