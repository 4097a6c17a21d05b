//! Process lifecycle controller.
//!
//! [`LifecycleController`] owns the one [`DeviceSession`] and drives the
//! process through `Uninitialized -> Starting -> Running -> Stopping ->
//! Stopped` (or `Starting -> Stopped` when the device cannot be started).
//!
//! Shutdown can be requested from several places at once: the interrupt
//! handler, a listener fault, and the normal fall-through at the end of the
//! server.  Only the first request performs the transition; the device's own
//! running guard makes the driver stop happen at most once as well.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, error, info};

use depth_core::SensorError;

use crate::domain::{LifecycleState, ShutdownTrigger};
use crate::infrastructure::device_session::{DeviceError, DeviceSession};

/// Errors raised by lifecycle transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The device could not be started; the process must not serve viewers.
    #[error("depth sensor could not be started: {0}")]
    DeviceUnavailable(#[source] DeviceError),

    /// The requested transition is not allowed from the current state.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Troubleshooting hints shown when the sensor cannot be opened.
pub const DEVICE_TROUBLESHOOTING: &[&str] = &[
    "check that the camera is powered and plugged into a USB 3 port",
    "make sure no other program (viewer, recorder, another server) is using the camera",
    "confirm the camera works in the vendor's viewer application",
];

impl LifecycleError {
    /// Operator-facing report: the error itself followed by hint lines.
    pub fn diagnostics(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        match self {
            LifecycleError::DeviceUnavailable(DeviceError::Unavailable(SensorError::Config(_))) => {
                lines.push(
                    "  - check the depth mode, frame rate and synchronization settings".to_string(),
                );
            }
            LifecycleError::DeviceUnavailable(_) => {
                lines.extend(DEVICE_TROUBLESHOOTING.iter().map(|hint| format!("  - {hint}")));
            }
            LifecycleError::InvalidTransition { .. } => {}
        }
        lines
    }
}

/// Drives the device session through the process lifecycle.
pub struct LifecycleController {
    session: Arc<DeviceSession>,
    state: Mutex<LifecycleState>,
    running: Arc<AtomicBool>,
}

impl LifecycleController {
    /// Takes ownership of the session.  The device is not started yet.
    pub fn new(session: DeviceSession) -> Self {
        Self {
            session: Arc::new(session),
            state: Mutex::new(LifecycleState::Uninitialized),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared handle to the device, for stream loops.
    pub fn session(&self) -> Arc<DeviceSession> {
        Arc::clone(&self.session)
    }

    /// Process-wide flag that is `true` only while the state is `Running`.
    /// Stream loops and the accept loop poll it at their cycle boundaries.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// `true` while the process is serving viewers.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Moves `Uninitialized -> Starting` and starts the device, then
    /// `Starting -> Running` on success or `Starting -> Stopped` on failure.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::DeviceUnavailable`] if the device fails to start.
    /// - [`LifecycleError::InvalidTransition`] if called more than once.
    pub fn start_device(&self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Starting)?;
        info!("starting depth sensor");

        match self.session.start() {
            Ok(()) => {
                self.transition(LifecycleState::Running)?;
                self.running.store(true, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                error!("depth sensor failed to start: {e}");
                self.transition(LifecycleState::Stopped)?;
                Err(LifecycleError::DeviceUnavailable(e))
            }
        }
    }

    /// Moves `Running -> Stopping -> Stopped`, releasing the device.
    ///
    /// Returns `true` if this call performed the shutdown and `false` if the
    /// process was not running (already shut down, or never started).
    pub fn shutdown(&self, trigger: ShutdownTrigger) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != LifecycleState::Running {
                debug!("shutdown ({trigger}) ignored in state {}", *state);
                return false;
            }
            *state = LifecycleState::Stopping;
        }

        info!("shutting down ({trigger})");
        self.running.store(false, Ordering::Relaxed);
        self.session.stop();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = LifecycleState::Stopped;
        true
    }

    fn transition(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        debug!("lifecycle: {} -> {next}", *state);
        *state = next;
        Ok(())
    }
}

impl Drop for LifecycleController {
    /// Release on every exit path, including early returns and panics.
    fn drop(&mut self) {
        self.shutdown(ShutdownTrigger::Exit);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
