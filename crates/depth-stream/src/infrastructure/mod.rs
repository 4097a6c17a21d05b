//! Infrastructure layer for depth-stream.
//!
//! Handles all I/O: the depth sensor, the WebSocket listener, and the
//! optional configuration file.
//!
//! # Responsibilities
//!
//! - Owning the sensor and running blocking driver calls off the scheduler
//! - Binding the listener once the device is running
//! - Performing the WebSocket handshake and spawning one task per viewer
//! - Watching for the shutdown signal
//! - Loading the TOML configuration file

pub mod device_session;
pub mod file_config;
pub mod sensor;
pub mod ws_server;

pub use device_session::{DeviceError, DeviceSession};
pub use file_config::{FileConfig, FileConfigError};
pub use ws_server::{ServerError, StreamServer, WsFrameSink};
