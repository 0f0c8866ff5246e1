//! The reader loop: connect, stream into the parser, reconnect on failure.

mod backoff;
mod sink;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::buffer::BufferPool;
use crate::error::{ProtocolError, StreamError};
use crate::parser::{Boundary, MjpegParser, ParserOptions};
use crate::stats::{ConnectionState, FpsMeter, StatsRecorder};
use crate::transport::{ByteStream, Transport};
use crate::{Config, ReconnectConfig};

use backoff::Backoff;
use sink::PoolSink;

/// State shared between the client handle and the reader thread.
#[derive(Default)]
pub(crate) struct Shared {
    pub pool: BufferPool,
    pub stats: StatsRecorder,
}

pub(crate) struct Engine<T> {
    transport: T,
    url: String,
    shared: Arc<Shared>,
    parser: ParserOptions,
    reconnect: ReconnectConfig,
    fps: FpsMeter,
    sequence: u64,
    session_frames: u64,
    shutdown: watch::Receiver<bool>,
}

/// Resolves once stop is requested (or the client handle is gone).
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl<T: Transport> Engine<T> {
    pub fn new(
        transport: T,
        config: &Config,
        shared: Arc<Shared>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            url: config.stream.url.clone(),
            shared,
            parser: ParserOptions {
                max_header_len: config.stream.max_header_len,
                require_jpeg: config.stream.require_jpeg,
            },
            reconnect: config.reconnect.clone(),
            fps: FpsMeter::new(config.stream.fps_window),
            sequence: 0,
            session_frames: 0,
            shutdown,
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn run(mut self) {
        let mut backoff = Backoff::new(
            Duration::from_millis(self.reconnect.interval_ms),
            Duration::from_millis(self.reconnect.max_interval_ms),
        );
        let mut reconnects = 0u64;
        info!(url = %self.url, "reader started");

        while !self.stopping() {
            self.shared.stats.set_state(ConnectionState::Connecting);

            if let Err(err) = self.stream_once().await {
                self.shared.stats.set_state(ConnectionState::Error);
                self.shared.stats.set_last_error(Some(err.to_string()));
                warn!(error = %err, frames = self.session_frames, "stream interrupted");
            }
            if self.stopping() {
                break;
            }

            if self.reconnect.limit.is_some_and(|limit| reconnects >= limit) {
                warn!(reconnects, "reconnect limit reached, giving up");
                self.shared.pool.shutdown();
                break;
            }
            if self.session_frames > 0 {
                backoff.reset();
            }

            reconnects += 1;
            self.shared.stats.reconnect();
            let delay = backoff.next_delay();
            debug!(?delay, attempt = reconnects, "reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled(&mut self.shutdown) => break,
            }
        }

        self.shared.stats.set_state(ConnectionState::Disconnected);
        info!("reader stopped");
    }

    /// One connection. Returns `Ok` only when stopped.
    #[instrument(skip(self), fields(url = %self.url))]
    async fn stream_once(&mut self) -> Result<(), StreamError> {
        self.session_frames = 0;

        let opened = tokio::select! {
            opened = self.transport.open(&self.url) => opened,
            _ = cancelled(&mut self.shutdown) => return Ok(()),
        };
        let (head, mut body) = opened?;

        if head.status != 200 {
            return Err(ProtocolError::BadStatus(head.status).into());
        }
        let boundary = Boundary::from_content_type(head.content_type.as_deref().unwrap_or(""))?;

        info!(boundary = boundary.token(), "streaming");
        self.shared.stats.set_state(ConnectionState::Streaming);
        self.shared.stats.set_last_error(None);
        self.fps.reset();

        let mut parser = MjpegParser::new(boundary, self.parser.clone());
        let mut sink = PoolSink::new(
            &self.shared.pool,
            &self.shared.stats,
            &mut self.fps,
            &mut self.sequence,
        );

        let result = loop {
            let chunk = tokio::select! {
                chunk = body.next_chunk() => chunk,
                _ = cancelled(&mut self.shutdown) => break Ok(()),
            };

            match chunk {
                Ok(Some(bytes)) => {
                    if let Err(err) = parser.feed(&bytes, &mut sink) {
                        break Err(err.into());
                    }
                }
                Ok(None) => {
                    break Err(parser
                        .finish(&mut sink)
                        .err()
                        .map_or(StreamError::Closed, StreamError::from));
                }
                Err(err) => break Err(err.into()),
            }
        };

        // Anything still in flight goes back to the free queue; dropping the
        // body closes the connection.
        parser.abort(&mut sink);
        self.session_frames = sink.delivered;
        result
    }
}
