//! depth-viewer: a minimal viewer for checking a running depth-stream server.
//!
//! Connects, receives a number of frames, validates each payload's shape,
//! and logs its size and depth statistics.
//!
//! ```text
//! depth-viewer [--url ws://127.0.0.1:8765] [--frames 10]
//! ```
//!
//! Exits non-zero if the connection fails or a payload is malformed.

use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use depth_core::decode_frame;

/// Connects to a depth-stream server and prints frame statistics.
#[derive(Debug, Parser)]
#[command(
    name = "depth-viewer",
    about = "Receives and checks frames from a depth-stream server",
    version
)]
struct Cli {
    /// WebSocket URL of the server.
    #[arg(long, default_value = "ws://127.0.0.1:8765")]
    url: String,

    /// Number of frames to receive before disconnecting.
    #[arg(long, default_value_t = 10)]
    frames: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let (mut ws, _response) = connect_async(cli.url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", cli.url))?;
    info!("connected to {}", cli.url);

    let started = Instant::now();
    let mut received = 0usize;

    while received < cli.frames {
        let message = match ws.next().await {
            Some(message) => message.context("WebSocket read failed")?,
            None => bail!("server closed the stream after {received} frame(s)"),
        };

        match message {
            WsMessage::Text(text) => {
                let frame = decode_frame(&text)
                    .with_context(|| format!("frame {received} is not a valid payload"))?;
                let stats = frame.stats();
                received += 1;
                info!(
                    "frame {received}: {}x{}, {} bytes, {:.1}% valid, range {:?}..={:?} mm",
                    frame.width(),
                    frame.height(),
                    text.len(),
                    stats.valid_ratio() * 100.0,
                    stats.min_mm,
                    stats.max_mm
                );
            }
            WsMessage::Close(frame) => {
                warn!("server closed the connection: {frame:?}");
                break;
            }
            other => debug!("ignoring {} byte non-text message", other.len()),
        }
    }

    let elapsed = started.elapsed();
    if received > 0 {
        info!(
            "received {received} frame(s) in {elapsed:.2?} ({:.1} fps)",
            received as f64 / elapsed.as_secs_f64()
        );
    }

    if let Err(e) = ws.close(None).await {
        debug!("close handshake failed: {e}");
    }
    Ok(())
}
