//! Public handle: buffer setup, start/stop, frame retrieval and statistics.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::buffer::Buffer;
use crate::engine::{Engine, Shared};
use crate::error::{ClientError, DequeueError};
use crate::stats::{ConnectionState, Stats};
use crate::transport::Transport;
use crate::Config;

#[cfg(feature = "http")]
use crate::transport::HttpTransport;

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Threaded MJPEG client.
///
/// Request buffers, enqueue them, then [`start`](Self::start). Frames are
/// read on a dedicated background thread and handed out by
/// [`dequeue_buffer`](Self::dequeue_buffer); give each buffer back with
/// [`enqueue_buffer`](Self::enqueue_buffer) once done with it. The reader
/// reconnects on any failure until [`stop`](Self::stop).
///
/// All methods take `&self`, so the client can be shared in an `Arc` between
/// the thread that controls it and the threads that consume frames.
pub struct MjpegClient<T: Transport> {
    config: Config,
    shared: Arc<Shared>,
    transport: Mutex<Option<T>>,
    worker: Mutex<Option<Worker>>,
    started: AtomicBool,
}

#[cfg(feature = "http")]
impl MjpegClient<HttpTransport> {
    /// Client for `config.stream.url` over HTTP.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let transport = HttpTransport::new()
            .map_err(|e| ClientError::InvalidArgument(format!("http client: {e}")))?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> MjpegClient<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            transport: Mutex::new(Some(transport)),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Allocate `count` buffers of `buffer_size` bytes. Only before `start`.
    pub fn request_buffers(
        &self,
        buffer_size: usize,
        count: usize,
    ) -> Result<Vec<Buffer>, ClientError> {
        if self.started.load(Ordering::Acquire) {
            return Err(ClientError::AlreadyStarted);
        }
        self.shared.pool.request_buffers(buffer_size, count)
    }

    pub fn enqueue_buffer(&self, buf: Buffer) {
        self.shared.pool.enqueue_buffer(buf);
    }

    /// Block until a frame arrives. `Err(Stopped)` once the client is stopped.
    pub fn dequeue_buffer(&self) -> Result<Buffer, DequeueError> {
        self.shared.pool.dequeue_buffer()
    }

    pub fn dequeue_buffer_timeout(&self, timeout: Duration) -> Result<Buffer, DequeueError> {
        self.shared.pool.dequeue_buffer_timeout(timeout)
    }

    pub async fn dequeue_buffer_async(&self) -> Result<Buffer, DequeueError> {
        self.shared.pool.dequeue_buffer_async().await
    }

    /// Spawn the reader thread. A client can be started once.
    pub fn start(&self) -> Result<(), ClientError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyStarted);
        }
        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ClientError::AlreadyStarted)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Engine::new(transport, &self.config, self.shared.clone(), shutdown_rx);
        let (ready_tx, ready_rx) = flume::bounded(1);

        let handle = thread::Builder::new()
            .name("mjpeg-reader".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                runtime.block_on(engine.run());
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(ClientError::Runtime(e));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(ClientError::Runtime(io::Error::other(
                    "reader thread exited during startup",
                )));
            }
        }

        info!(url = %self.config.stream.url, "client started");
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Worker {
            handle,
            shutdown: shutdown_tx,
        });
        Ok(())
    }

    /// Stop reading, wake every consumer blocked in `dequeue_buffer`, and join
    /// the reader thread. Idempotent.
    pub fn stop(&self) {
        self.started.store(true, Ordering::Release);
        self.shared.pool.shutdown();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(true);
            if worker.handle.join().is_err() {
                error!("reader thread panicked");
            }
            info!("client stopped");
        }
        self.shared.stats.set_state(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.stats.state()
    }

    /// Consistent snapshot; safe to call while streaming.
    pub fn stats(&self) -> Stats {
        let mut stats = self.shared.stats.snapshot();
        stats.free_buffers = self.shared.pool.free_len();
        stats.filled_buffers = self.shared.pool.filled_len();
        stats
    }

    pub fn print_stats(&self) {
        info!("MJPEGClient {}:\n{}", self.config.stream.url, self.stats());
    }
}

impl<T: Transport> Drop for MjpegClient<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
