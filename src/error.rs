//! Error types for setup, transport, protocol framing and consumer-side waits.

use std::io;

use thiserror::Error;

/// Setup-time failures, reported synchronously to the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("client already started")]
    AlreadyStarted,

    #[error("failed to start reader thread: {0}")]
    Runtime(#[from] io::Error),
}

/// Connection-level failures. Recovered by reconnecting.
#[derive(Debug, Error)]
pub enum TransportError {
    #[cfg(feature = "http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("connection refused: {0}")]
    Refused(String),
}

/// Malformed multipart framing or an unusable response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected response status {0}")]
    BadStatus(u16),

    #[error("content-type does not declare a multipart boundary")]
    MissingBoundary,

    #[error("part header too long (limit {limit} bytes)")]
    HeaderTooLong { limit: usize },

    #[error("invalid header line: {0}")]
    MalformedHeader(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("unexpected part content-type: {0}")]
    UnexpectedContentType(String),

    #[error("boundary string expected, but not found")]
    BoundaryMismatch,

    #[error("stream ended in the middle of a part")]
    Truncated,

    #[error("closing boundary received")]
    EndOfStream,
}

/// Everything that ends a streaming session and drives a reconnect.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connection closed by server")]
    Closed,
}

/// Why `dequeue_buffer` returned without a frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DequeueError {
    #[error("buffer pool stopped")]
    Stopped,

    #[error("timed out waiting for a frame")]
    Timeout,
}
