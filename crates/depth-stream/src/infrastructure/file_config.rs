//! Optional TOML configuration file.
//!
//! Every key is optional; anything left out falls through to the command
//! line defaults.  Example:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1"
//! port = 8765
//! pacing_ms = 30
//!
//! [device]
//! depth_mode = "wfov-2x2binned"
//! fps = 15
//! synchronized_images_only = false
//! capture_timeout_ms = 1000
//! ```
//!
//! The file is read once at startup and converted into a [`Settings`] layer.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use depth_core::{DepthMode, FrameRate};

use crate::domain::Settings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum FileConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level layout of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub device: DeviceSection,
}

/// `[server]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub pacing_ms: Option<u64>,
}

/// `[device]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSection {
    pub depth_mode: Option<DepthMode>,
    pub fps: Option<FrameRate>,
    pub synchronized_images_only: Option<bool>,
    pub capture_timeout_ms: Option<u64>,
}

impl FileConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`FileConfigError::Parse`] on malformed TOML, unknown keys,
    /// an unknown depth mode, or an unsupported frame rate.
    pub fn parse(text: &str) -> Result<Self, FileConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FileConfigError::Io`] if the file cannot be read, or
    /// [`FileConfigError::Parse`] if its content is invalid.
    pub fn load(path: &Path) -> Result<Self, FileConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| FileConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }
}

impl From<FileConfig> for Settings {
    fn from(file: FileConfig) -> Self {
        Settings {
            bind: file.server.bind,
            port: file.server.port,
            pacing_ms: file.server.pacing_ms,
            capture_timeout_ms: file.device.capture_timeout_ms,
            depth_mode: file.device.depth_mode,
            frame_rate: file.device.fps,
            synchronized_images_only: file.device.synchronized_images_only,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
