//! Depth sensor drivers bundled with the server.
//!
//! The vendor SDK is an external collaborator and is not linked here.  The
//! server ships with [`SyntheticSensor`], which behaves like a real camera
//! (correct resolutions, frame timing, invalid pixels outside the field of
//! view), and [`mock::MockSensor`], a scripted driver for tests.
//!
//! # Testability
//!
//! Everything above this module depends only on the
//! [`depth_core::DepthSensor`] trait, so tests swap in [`mock::MockSensor`]
//! without any hardware.

pub mod mock;
pub mod synthetic;

pub use mock::{MockSensor, MockSensorStats};
pub use synthetic::SyntheticSensor;
