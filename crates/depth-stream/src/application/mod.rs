//! Application layer for depth-stream.
//!
//! Knows *what* the server does: run one capture/encode/send/pace loop per
//! viewer, and walk the process through its lifecycle.  *How* frames are
//! captured and sent is delegated to the infrastructure layer through
//! [`DeviceSession`](crate::infrastructure::DeviceSession) and [`FrameSink`].

pub mod lifecycle;
pub mod stream_loop;

pub use lifecycle::{LifecycleController, LifecycleError, DEVICE_TROUBLESHOOTING};
pub use stream_loop::{FrameSink, SinkError, StreamLoop, StreamOutcome, StreamReport};
