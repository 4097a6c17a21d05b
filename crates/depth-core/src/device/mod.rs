//! Depth sensor driver seam.
//!
//! The physical camera is driven by a vendor SDK that this crate does not
//! link.  Any driver, real or simulated, implements [`DepthSensor`]; the
//! streaming server owns exactly one instance for the whole process.
//!
//! # Blocking contract
//!
//! All three methods are blocking calls.  `get_capture` in particular waits
//! until the next frame is ready or `timeout` elapses.  Async callers are
//! expected to run them off the scheduler thread (the server uses
//! `tokio::task::spawn_blocking`).

pub mod config;

use std::time::Duration;

use thiserror::Error;

use crate::frame::Capture;

pub use config::{ConfigError, DepthMode, DeviceConfig, FrameRate, ImageSync};

/// Failures reported by a sensor driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// No device is attached, or it has no power.
    #[error("no depth sensor detected (is it plugged in and powered?)")]
    NotConnected,

    /// Another process has the device open.
    #[error("depth sensor is already in use by another process")]
    InUse,

    /// The device is attached through a bus too slow for the requested mode.
    #[error("insufficient USB bandwidth for the requested mode (use a USB 3 port)")]
    Bandwidth,

    /// The requested configuration was refused by the driver.
    #[error("invalid sensor configuration: {0}")]
    Config(#[from] ConfigError),

    /// No frame arrived within the capture timeout.
    #[error("timed out waiting for a capture after {0:?}")]
    Timeout(Duration),

    /// Any other transient or driver-level fault.
    #[error("sensor fault: {0}")]
    Fault(String),
}

impl SensorError {
    /// `true` for failures that only affect a single capture call.
    pub fn is_transient(&self) -> bool {
        matches!(self, SensorError::Timeout(_) | SensorError::Fault(_))
    }
}

/// A depth camera driver.
///
/// Implementations must be `Send` so the owning session can move calls onto
/// a blocking worker thread.
pub trait DepthSensor: Send {
    /// Configures and powers on the camera.
    fn start(&mut self, config: &DeviceConfig) -> Result<(), SensorError>;

    /// Blocks until the next capture is available or `timeout` elapses.
    fn get_capture(&mut self, timeout: Duration) -> Result<Capture, SensorError>;

    /// Powers off the camera.  Only called on a started sensor.
    fn stop(&mut self);
}
