//! In-memory transport that replays scripted connections.
//!
//! Each call to `open` consumes the next [`Script`]. Once the scripts run
//! out, `open` never completes, which parks the reader in `Connecting` until
//! the client is stopped.

use std::collections::VecDeque;
use std::future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::{ByteStream, ResponseHead, Transport};
use crate::error::TransportError;

/// How a scripted body ends once its chunks are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Clean end of stream.
    Eof,
    /// Connection reset by peer.
    Reset,
    /// Never delivers another byte.
    Hang,
}

#[derive(Debug, Clone)]
pub enum Script {
    /// The connect attempt fails.
    Refuse,
    Connect {
        head: ResponseHead,
        chunks: Vec<Bytes>,
        ending: Ending,
    },
}

impl Script {
    /// A `200 OK` response with the given content-type and body chunks.
    pub fn stream(content_type: impl Into<String>, chunks: Vec<Bytes>, ending: Ending) -> Self {
        Script::Connect {
            head: ResponseHead {
                status: 200,
                content_type: Some(content_type.into()),
            },
            chunks,
            ending,
        }
    }
}

pub struct ScriptedTransport {
    scripts: VecDeque<Script>,
    chunk_delay: Option<Duration>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
            chunk_delay: None,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait this long before delivering each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Counter of connect attempts, readable after the transport is moved.
    pub fn opens(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }
}

impl Transport for ScriptedTransport {
    type Body = ScriptedBody;

    async fn open(&mut self, _url: &str) -> Result<(ResponseHead, ScriptedBody), TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        match self.scripts.pop_front() {
            Some(Script::Refuse) => Err(TransportError::Refused("scripted refusal".into())),
            Some(Script::Connect {
                head,
                chunks,
                ending,
            }) => Ok((
                head,
                ScriptedBody {
                    chunks: chunks.into(),
                    ending,
                    delay: self.chunk_delay,
                },
            )),
            None => future::pending().await,
        }
    }
}

pub struct ScriptedBody {
    chunks: VecDeque<Bytes>,
    ending: Ending,
    delay: Option<Duration>,
}

impl ByteStream for ScriptedBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }

        match self.ending {
            Ending::Eof => Ok(None),
            Ending::Reset => Err(io::Error::from(io::ErrorKind::ConnectionReset).into()),
            Ending::Hang => future::pending().await,
        }
    }
}
