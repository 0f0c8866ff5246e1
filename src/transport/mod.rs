//! Connection seam between the reader loop and the network.
//!
//! The reader needs only three things from a transport: open a GET and see
//! the response status and content-type, pull body chunks until EOF, and close.
//! Closing is dropping the body.

use std::future::Future;

use bytes::Bytes;

use crate::error::TransportError;

#[cfg(feature = "http")]
pub mod http;
pub mod scripted;

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use scripted::{Ending, Script, ScriptedTransport};

/// What the reader needs from the response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_type: Option<String>,
}

pub trait Transport: Send + 'static {
    type Body: ByteStream;

    fn open(
        &mut self,
        url: &str,
    ) -> impl Future<Output = Result<(ResponseHead, Self::Body), TransportError>> + Send;
}

pub trait ByteStream: Send {
    /// Next piece of the body, `None` at end of stream.
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;
}
