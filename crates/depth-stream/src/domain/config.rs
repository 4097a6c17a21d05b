//! Server configuration types.
//!
//! [`StreamConfig`] is the single source of truth for all runtime settings.
//! It is assembled once at startup from CLI flags, environment variables, and
//! an optional TOML file, and never changes afterwards.
//!
//! Each source is first turned into a [`Settings`] value in which every field
//! is optional.  Layers are stacked with [`Settings::or`] (the receiver wins)
//! and the result is filled up with defaults by [`Settings::resolve`]:
//!
//! ```text
//! CLI / env  ──or──►  config file  ──resolve──►  StreamConfig (defaults fill gaps)
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use depth_core::{DepthMode, DeviceConfig, FrameRate, ImageSync};

/// Default WebSocket port.
pub const DEFAULT_PORT: u16 = 8765;

/// Default sleep between two stream cycles (roughly 30 Hz).
pub const DEFAULT_PACING: Duration = Duration::from_millis(30);

/// Default upper bound on a single capture call.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(1000);

/// All runtime configuration for the streaming server.
///
/// # Example
///
/// ```rust
/// use depth_stream::domain::StreamConfig;
///
/// let cfg = StreamConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8765);
/// ```
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Fixed sleep after every stream cycle.
    ///
    /// Realized frame rate is capture latency plus this sleep, so it is
    /// always at or below `1 / pacing`.
    pub pacing: Duration,

    /// Longest a stream loop waits for one capture before treating the cycle
    /// as "no frame".
    pub capture_timeout: Duration,

    /// Sensor settings, fixed for the lifetime of the process.
    pub device: DeviceConfig,
}

impl Default for StreamConfig {
    /// | Field           | Default                            |
    /// |-----------------|------------------------------------|
    /// | bind_addr       | `0.0.0.0:8765`                     |
    /// | pacing          | 30 ms                              |
    /// | capture_timeout | 1000 ms                            |
    /// | device          | nfov-unbinned, 30 FPS, unsynced    |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            pacing: DEFAULT_PACING,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            device: DeviceConfig::default(),
        }
    }
}

/// One layer of partially specified settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub pacing_ms: Option<u64>,
    pub capture_timeout_ms: Option<u64>,
    pub depth_mode: Option<DepthMode>,
    pub frame_rate: Option<FrameRate>,
    pub synchronized_images_only: Option<bool>,
}

impl Settings {
    /// Fills every field `self` leaves unset from `lower`.
    pub fn or(self, lower: Settings) -> Settings {
        Settings {
            bind: self.bind.or(lower.bind),
            port: self.port.or(lower.port),
            pacing_ms: self.pacing_ms.or(lower.pacing_ms),
            capture_timeout_ms: self.capture_timeout_ms.or(lower.capture_timeout_ms),
            depth_mode: self.depth_mode.or(lower.depth_mode),
            frame_rate: self.frame_rate.or(lower.frame_rate),
            synchronized_images_only: self
                .synchronized_images_only
                .or(lower.synchronized_images_only),
        }
    }

    /// Produces the final configuration, using defaults for unset fields.
    pub fn resolve(self) -> StreamConfig {
        let defaults = StreamConfig::default();
        let device_defaults = defaults.device;
        StreamConfig {
            bind_addr: SocketAddr::new(
                self.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
                self.port.unwrap_or(DEFAULT_PORT),
            ),
            pacing: self
                .pacing_ms
                .map_or(defaults.pacing, Duration::from_millis),
            capture_timeout: self
                .capture_timeout_ms
                .map_or(defaults.capture_timeout, Duration::from_millis),
            device: DeviceConfig {
                depth_mode: self.depth_mode.unwrap_or(device_defaults.depth_mode),
                frame_rate: self.frame_rate.unwrap_or(device_defaults.frame_rate),
                image_sync: self
                    .synchronized_images_only
                    .map_or(device_defaults.image_sync, ImageSync::from_flag),
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
