//! depth-stream library crate.
//!
//! Streams depth-camera frames to remote viewers over WebSocket.  One sensor
//! is started for the whole process; every connected viewer gets its own
//! stream loop that captures, encodes, sends, and sleeps.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Viewer (JSON over WebSocket)
//!         ↑
//! [depth-stream]
//!   ├── domain/           Pure types: StreamConfig, lifecycle states
//!   ├── application/      Stream loop and lifecycle state machine
//!   └── infrastructure/
//!         ├── device_session/  Owns the sensor, async capture with timeout
//!         ├── synthetic/       Built-in simulated depth sensor
//!         ├── ws_server/       WebSocket listener and per-viewer sessions
//!         └── file_config/     Optional TOML configuration file
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` talks to the outside world only through
//!   [`application::FrameSink`] and [`infrastructure::DeviceSession`].
//! - `infrastructure` owns tokio, tungstenite, and the driver.

/// Domain layer: configuration and lifecycle types (no I/O).
pub mod domain;

/// Application layer: per-viewer stream loop and process lifecycle.
pub mod application;

/// Infrastructure layer: device session, WebSocket server, config file.
pub mod infrastructure;
