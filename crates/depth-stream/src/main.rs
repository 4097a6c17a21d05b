//! depth-stream server entry point.
//!
//! Opens the depth sensor, then serves live depth frames to every WebSocket
//! viewer that connects.  Each text message is one frame:
//!
//! ```json
//! {"width": 640, "height": 576, "depth_data": [[0, 1203, ...], ...]}
//! ```
//!
//! # Usage
//!
//! ```text
//! depth-stream [OPTIONS]
//!
//! Options:
//!   --bind <IP>                      Listener address [default: 0.0.0.0]
//!   --port <PORT>                    Listener port [default: 8765]
//!   --depth-mode <MODE>              Depth mode [default: nfov-unbinned]
//!   --fps <FPS>                      5, 15 or 30 [default: 30]
//!   --synchronized-images-only       Require color/depth synchronized captures
//!   --pacing-ms <MS>                 Pause between frames per viewer [default: 30]
//!   --capture-timeout-ms <MS>        Wait for one capture [default: 1000]
//!   --config <FILE>                  Optional TOML configuration file
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                          | Flag                         |
//! |-----------------------------------|------------------------------|
//! | `DEPTH_STREAM_BIND`               | `--bind`                     |
//! | `DEPTH_STREAM_PORT`               | `--port`                     |
//! | `DEPTH_STREAM_DEPTH_MODE`         | `--depth-mode`               |
//! | `DEPTH_STREAM_FPS`                | `--fps`                      |
//! | `DEPTH_STREAM_SYNC_ONLY`          | `--synchronized-images-only` |
//! | `DEPTH_STREAM_PACING_MS`          | `--pacing-ms`                |
//! | `DEPTH_STREAM_CAPTURE_TIMEOUT_MS` | `--capture-timeout-ms`       |
//! | `DEPTH_STREAM_CONFIG`             | `--config`                   |
//!
//! Flags and environment variables win over the configuration file, which
//! wins over the built-in defaults.
//!
//! # Exit status
//!
//! `0` after a signal-initiated shutdown, `1` when the sensor cannot be
//! started or the configuration is invalid.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use depth_core::{DepthMode, FrameRate};
use depth_stream::application::LifecycleController;
use depth_stream::domain::{Settings, StreamConfig};
use depth_stream::infrastructure::sensor::SyntheticSensor;
use depth_stream::infrastructure::{DeviceSession, FileConfig, ServerError, StreamServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Live depth-camera frames over WebSocket.
///
/// Every option is optional; unset options fall back to the configuration
/// file and then to the built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "depth-stream",
    about = "Streams live depth-camera frames to WebSocket viewers",
    version
)]
struct Cli {
    /// IP address to bind the WebSocket listener to [default: 0.0.0.0].
    #[arg(long, env = "DEPTH_STREAM_BIND")]
    bind: Option<IpAddr>,

    /// TCP port for the WebSocket listener [default: 8765].
    #[arg(long, env = "DEPTH_STREAM_PORT")]
    port: Option<u16>,

    /// Depth mode: nfov-2x2binned, nfov-unbinned, wfov-2x2binned,
    /// wfov-unbinned, passive-ir or off [default: nfov-unbinned].
    #[arg(long, env = "DEPTH_STREAM_DEPTH_MODE")]
    depth_mode: Option<DepthMode>,

    /// Sensor frame rate: 5, 15 or 30 [default: 30].
    #[arg(long, env = "DEPTH_STREAM_FPS")]
    fps: Option<FrameRate>,

    /// Only deliver captures whose color and depth images are synchronized.
    #[arg(
        long,
        env = "DEPTH_STREAM_SYNC_ONLY",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    synchronized_images_only: Option<bool>,

    /// Pause between two frames sent to the same viewer, in ms [default: 30].
    #[arg(long, env = "DEPTH_STREAM_PACING_MS")]
    pacing_ms: Option<u64>,

    /// How long one capture may wait for the sensor, in ms [default: 1000].
    #[arg(long, env = "DEPTH_STREAM_CAPTURE_TIMEOUT_MS")]
    capture_timeout_ms: Option<u64>,

    /// Optional TOML configuration file.
    #[arg(long, env = "DEPTH_STREAM_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// The settings given on the command line or through the environment.
    fn settings(&self) -> Settings {
        Settings {
            bind: self.bind,
            port: self.port,
            pacing_ms: self.pacing_ms,
            capture_timeout_ms: self.capture_timeout_ms,
            depth_mode: self.depth_mode,
            frame_rate: self.fps,
            synchronized_images_only: self.synchronized_images_only,
        }
    }

    /// Merges the command line over the optional configuration file and the
    /// defaults, and checks that the device configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed,
    /// or if the resulting device configuration is invalid.
    fn into_stream_config(self) -> anyhow::Result<StreamConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => FileConfig::default(),
        };

        let config = self.settings().or(file.into()).resolve();
        config
            .device
            .validate()
            .context("invalid device configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_stream_config()?;
    info!(
        "depth-stream starting: mode={}, fps={}, pacing={:?}, bind={}",
        config.device.depth_mode, config.device.frame_rate, config.pacing, config.bind_addr
    );

    let session = DeviceSession::new(
        Box::new(SyntheticSensor::new()),
        config.device,
        config.capture_timeout,
    );
    let controller = Arc::new(LifecycleController::new(session));

    let server = match StreamServer::launch(&config, Arc::clone(&controller)).await {
        Ok(server) => server,
        Err(ServerError::Lifecycle(e)) => {
            for line in e.diagnostics() {
                error!("{line}");
            }
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context("failed to start depth-stream server"),
    };

    server
        .serve(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {}
                Err(e) => {
                    error!("failed to listen for Ctrl+C signal: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;

    info!("depth-stream stopped");
    Ok(ExitCode::SUCCESS)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
