use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use super::{ByteStream, ResponseHead, Transport};
use crate::error::TransportError;

/// HTTP GET over reqwest. No timeouts beyond reqwest's defaults are set.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mjpeg-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    type Body = HttpBody;

    async fn open(&mut self, url: &str) -> Result<(ResponseHead, HttpBody), TransportError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "multipart/x-mixed-replace, image/jpeg")
            .send()
            .await?;

        let head = ResponseHead {
            status: response.status().as_u16(),
            content_type: response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        };
        debug!(status = head.status, content_type = ?head.content_type, "response received");

        Ok((head, HttpBody { response }))
    }
}

/// Streaming response body. Dropping it closes the connection.
pub struct HttpBody {
    response: reqwest::Response,
}

impl ByteStream for HttpBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.response.chunk().await?)
    }
}
