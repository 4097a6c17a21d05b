//! Domain layer for depth-stream.
//!
//! Plain types that describe how the server is configured and which state
//! the process lifecycle is in.  Nothing here reads files, opens sockets, or
//! touches the sensor.

pub mod config;
pub mod lifecycle;

pub use config::{Settings, StreamConfig};
pub use lifecycle::{LifecycleState, ShutdownTrigger};
