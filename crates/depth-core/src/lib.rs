//! # depth-core
//!
//! Shared library for depth-stream containing the depth frame model, the
//! sensor configuration and driver seam, and the JSON frame codec.
//!
//! This crate is used by both the streaming server and the viewer client.
//! It has zero dependencies on async runtimes, sockets, or vendor SDKs.
//!
//! # Architecture overview
//!
//! A depth camera produces a grid of per-pixel distance samples many times per
//! second.  The server pulls those grids from the device and pushes them to
//! remote viewers as self-describing JSON text messages.
//!
//! - **`frame`** – The captured data: a [`DepthFrame`] is a row-major grid of
//!   `u16` millimetre samples, and a [`Capture`] is one device acquisition that
//!   may or may not carry a depth component.
//!
//! - **`device`** – How the sensor is configured (depth mode, frame rate,
//!   image synchronization) and the [`DepthSensor`] trait that any driver
//!   implements.
//!
//! - **`codec`** – How a frame travels over the wire:
//!   `{"width":W,"height":H,"depth_data":[[...],...]}`.

pub mod codec;
pub mod device;
pub mod frame;

// Re-export the most-used types at the crate root so callers can write
// `depth_core::DepthFrame` instead of `depth_core::frame::DepthFrame`.
pub use codec::{decode_frame, encode_capture, encode_frame, CodecError, FramePayload};
pub use device::{
    ConfigError, DepthMode, DepthSensor, DeviceConfig, FrameRate, ImageSync, SensorError,
};
pub use frame::{Capture, DepthFrame, DepthStats, FrameError};
