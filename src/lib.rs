pub mod buffer;
pub mod client;
mod engine;
pub mod error;
pub mod multipart;
pub mod parser;
pub mod stats;
pub mod transport;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use buffer::{Buffer, BufferPool};
pub use client::MjpegClient;
pub use error::{ClientError, DequeueError, ProtocolError, StreamError, TransportError};
pub use stats::{ConnectionState, Stats};

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub buffers: BufferConfig,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    /// Largest accepted part header block
    pub max_header_len: usize,
    /// Reject parts whose Content-Type is not image/jpeg
    pub require_jpeg: bool,
    /// Frames in the rolling FPS window
    pub fps_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub buffer_size: usize,
    pub buffer_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    /// Give up after this many reconnects. `None` retries forever.
    pub limit: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_header_len: 8 * 1024,
            require_jpeg: false,
            fps_window: 30,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024, // Comfortably above a 1080p JPEG
            buffer_count: 4,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_interval_ms: 10_000,
            limit: None,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then `MJPEG__SECTION__KEY` environment
    /// overrides (e.g. `MJPEG__STREAM__URL`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("MJPEG")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}
