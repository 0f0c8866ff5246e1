//! MJPEG stream reader: pulls frames from a camera URL and reports statistics.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mjpeg_client::{Config, DequeueError, MjpegClient};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mjpeg_client=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "mjpeg-client.toml".into());
    let config = Config::load(&config_path)?;
    if config.stream.url.is_empty() {
        return Err(eyre!(
            "no stream url; set stream.url in {config_path} or MJPEG__STREAM__URL"
        ));
    }
    info!("Reading {}", config.stream.url);

    let client = Arc::new(MjpegClient::new(config.clone())?);
    for buf in client.request_buffers(config.buffers.buffer_size, config.buffers.buffer_count)? {
        client.enqueue_buffer(buf);
    }
    client.start()?;

    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    stats_tick.tick().await;

    loop {
        tokio::select! {
            frame = client.dequeue_buffer_async() => match frame {
                Ok(buf) => {
                    tracing::trace!(sequence = buf.sequence(), bytes = buf.used(), "frame");
                    client.enqueue_buffer(buf);
                }
                Err(DequeueError::Stopped) => {
                    warn!("client stopped");
                    break;
                }
                Err(DequeueError::Timeout) => {}
            },
            _ = stats_tick.tick() => client.print_stats(),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let stopper = client.clone();
    tokio::task::spawn_blocking(move || stopper.stop()).await?;
    client.print_stats();

    info!("Shutting down");
    Ok(())
}
