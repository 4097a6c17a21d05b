//! The single, process-wide depth sensor session.
//!
//! [`DeviceSession`] owns the driver and is shared (behind an `Arc`) by the
//! lifecycle controller and every viewer's stream loop.  It adds three things
//! the raw [`DepthSensor`] does not have:
//!
//! 1. **A running guard.**  The session state lives in an atomic.  `stop()`
//!    is a compare-and-set from `Running` to `Stopped`, so the driver's stop
//!    primitive runs at most once no matter how many shutdown paths race.
//! 2. **Async capture.**  Driver calls block, so [`DeviceSession::capture`]
//!    moves them onto tokio's blocking pool and never stalls the scheduler.
//! 3. **A timeout at the capture boundary.**  If the driver stalls, the
//!    caller gets [`DeviceError::CaptureTimeout`] and moves on.  Until the
//!    abandoned driver call returns, further captures fail the same way
//!    without queueing more workers behind it.
//!
//! # Locking
//!
//! The driver sits behind a `std::sync::Mutex` because every access happens
//! on a blocking worker (or in `start`/`stop`, which are synchronous).
//! Concurrent captures from several viewers are serialized by that mutex;
//! each viewer still gets its own independently timed frame.
//!
//! `stop` never waits on the driver for longer than [`STOP_WAIT`].  If a
//! stalled capture still holds the driver, the stop primitive is handed to a
//! background thread that runs it as soon as the driver is free.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use depth_core::{Capture, DepthSensor, DeviceConfig, SensorError};

/// Extra time the async guard allows on top of the driver's own timeout.
const CAPTURE_GRACE: Duration = Duration::from_millis(250);

/// Longest `stop` blocks its caller while waiting for the driver.
pub const STOP_WAIT: Duration = Duration::from_millis(250);

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Errors surfaced by [`DeviceSession`].
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The sensor could not be started.  Fatal for the process.
    #[error("depth sensor unavailable: {0}")]
    Unavailable(#[source] SensorError),

    /// One capture call failed.  Recoverable: the cycle simply has no frame.
    #[error("capture failed: {0}")]
    Capture(#[source] SensorError),

    /// The driver did not return within the capture deadline.
    #[error("capture did not complete within {0:?}")]
    CaptureTimeout(Duration),

    /// The session is not running (never started, or already stopped).
    #[error("device session is not running")]
    NotRunning,

    /// `start` was called after the session had been stopped.
    #[error("device session has already been stopped and cannot be restarted")]
    SessionClosed,
}

impl DeviceError {
    /// `true` if the error only affects the current capture cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeviceError::Capture(_) | DeviceError::CaptureTimeout(_))
    }
}

/// State shared with blocking capture workers.
struct Inner {
    sensor: Mutex<Box<dyn DepthSensor>>,
    state: AtomicU8,
    /// Completion flag of the last capture worker that was given up on.
    abandoned: Mutex<Option<Arc<AtomicBool>>>,
}

impl Inner {
    /// Locks the driver.  A panic inside a driver call poisons the mutex; the
    /// driver itself is still usable, so the poison is cleared.
    fn lock_sensor(&self) -> MutexGuard<'_, Box<dyn DepthSensor>> {
        self.sensor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// `true` while a worker abandoned by an earlier capture is still inside
    /// the driver.  Clears the marker once that worker has finished.
    fn driver_stalled(&self) -> bool {
        let mut abandoned = self.abandoned.lock().unwrap_or_else(PoisonError::into_inner);
        match abandoned.as_ref() {
            Some(finished) if !finished.load(Ordering::Acquire) => true,
            Some(_) => {
                *abandoned = None;
                false
            }
            None => false,
        }
    }

    fn mark_abandoned(&self, finished: Arc<AtomicBool>) {
        *self.abandoned.lock().unwrap_or_else(PoisonError::into_inner) = Some(finished);
    }
}

/// Sets the shared flag when a capture worker exits, including by panic.
struct WorkerDone(Arc<AtomicBool>);

impl Drop for WorkerDone {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Owned handle to the one depth sensor in the process.
pub struct DeviceSession {
    inner: Arc<Inner>,
    config: DeviceConfig,
    capture_timeout: Duration,
}

impl DeviceSession {
    /// Wraps a driver.  The sensor is not touched until [`start`](Self::start).
    pub fn new(
        sensor: Box<dyn DepthSensor>,
        config: DeviceConfig,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sensor: Mutex::new(sensor),
                state: AtomicU8::new(IDLE),
                abandoned: Mutex::new(None),
            }),
            config,
            capture_timeout,
        }
    }

    /// The fixed configuration the sensor runs with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// `true` between a successful `start` and the first `stop`.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Configures and powers on the sensor.
    ///
    /// Starting a session that is already running is a no-op.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::Unavailable`] if the configuration is invalid or the
    ///   driver refuses to start (missing, unpowered, busy, slow bus).
    /// - [`DeviceError::SessionClosed`] if the session was already stopped.
    pub fn start(&self) -> Result<(), DeviceError> {
        let mut sensor = self.inner.lock_sensor();
        match self.inner.state.load(Ordering::Acquire) {
            RUNNING => return Ok(()),
            STOPPED => return Err(DeviceError::SessionClosed),
            _ => {}
        }

        self.config
            .validate()
            .map_err(|e| DeviceError::Unavailable(SensorError::Config(e)))?;
        sensor.start(&self.config).map_err(DeviceError::Unavailable)?;

        self.inner.state.store(RUNNING, Ordering::Release);
        info!(
            "depth sensor started ({}, {} FPS)",
            self.config.depth_mode, self.config.frame_rate
        );
        Ok(())
    }

    /// Waits for the next capture.
    ///
    /// The blocking driver call runs on tokio's blocking pool; this future
    /// only suspends.  The wait is bounded by the configured capture timeout
    /// plus a short grace period.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::NotRunning`] if the session is not (or no longer)
    ///   running.
    /// - [`DeviceError::Capture`] / [`DeviceError::CaptureTimeout`] for a
    ///   failed cycle; both are recoverable.  While an abandoned driver call
    ///   is still running, captures fail with `CaptureTimeout` immediately.
    pub async fn capture(&self) -> Result<Capture, DeviceError> {
        if !self.inner.is_running() {
            return Err(DeviceError::NotRunning);
        }

        let deadline = self.capture_timeout + CAPTURE_GRACE;
        if self.inner.driver_stalled() {
            debug!("driver still busy with an abandoned capture; skipping this cycle");
            return Err(DeviceError::CaptureTimeout(deadline));
        }

        let inner = Arc::clone(&self.inner);
        let driver_timeout = self.capture_timeout;
        let finished = Arc::new(AtomicBool::new(false));
        let done = WorkerDone(Arc::clone(&finished));
        let mut worker = tokio::task::spawn_blocking(move || {
            let _done = done;
            let mut sensor = inner.lock_sensor();
            // Re-check under the lock: `stop` may have won the race while this
            // worker was queued.
            if !inner.is_running() {
                return Err(DeviceError::NotRunning);
            }
            sensor.get_capture(driver_timeout).map_err(DeviceError::Capture)
        });

        match tokio::time::timeout(deadline, &mut worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(DeviceError::Capture(SensorError::Fault(format!(
                "capture worker failed: {join_err}"
            )))),
            Err(_) => {
                debug!("capture exceeded {deadline:?}; abandoning this cycle");
                self.inner.mark_abandoned(finished);
                Err(DeviceError::CaptureTimeout(deadline))
            }
        }
    }

    /// Powers off the sensor if it is running.
    ///
    /// Returns `true` if this call performed the stop and `false` if the
    /// session was not running.  The driver's `stop` is invoked at most once
    /// over the lifetime of the session.
    ///
    /// Blocks for at most [`STOP_WAIT`] when a capture holds the driver; the
    /// stop then completes in the background once that capture returns.
    pub fn stop(&self) -> bool {
        if self
            .inner
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Captures queued after this point see `STOPPED` and bail out.
        let busy = match self.inner.sensor.try_lock() {
            Ok(mut sensor) => {
                sensor.stop();
                false
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().stop();
                false
            }
            Err(TryLockError::WouldBlock) => true,
        };
        if busy {
            self.stop_when_free();
        } else {
            info!("depth sensor stopped");
        }
        true
    }

    /// Runs the driver stop on a helper thread and waits up to [`STOP_WAIT`].
    fn stop_when_free(&self) {
        let inner = Arc::clone(&self.inner);
        let (stopped_tx, stopped_rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("depth-sensor-stop".to_string())
            .spawn(move || {
                inner.lock_sensor().stop();
                info!("depth sensor stopped");
                let _ = stopped_tx.send(());
            });

        match spawned {
            Ok(_) => {
                if stopped_rx.recv_timeout(STOP_WAIT).is_err() {
                    warn!(
                        "depth sensor busy with a stalled capture; \
                         stop will complete when the driver returns"
                    );
                }
            }
            Err(e) => {
                error!("failed to spawn sensor stop thread: {e}; stopping inline");
                self.inner.lock_sensor().stop();
                info!("depth sensor stopped");
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.stop() {
            warn!("device session dropped while running; sensor released on drop");
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("config", &self.config)
            .field("capture_timeout", &self.capture_timeout)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use depth_core::{ConfigError, DepthFrame, DepthMode, FrameRate, ImageSync};
    use mockall::mock;
    use tokio_test::{assert_err, assert_ok};

    mock! {
        Driver {}
        impl DepthSensor for Driver {
            fn start(&mut self, config: &DeviceConfig) -> Result<(), SensorError>;
            fn get_capture(&mut self, timeout: Duration) -> Result<Capture, SensorError>;
            fn stop(&mut self);
        }
    }

    fn session_with(driver: MockDriver) -> DeviceSession {
        DeviceSession::new(
            Box::new(driver),
            DeviceConfig::default(),
            Duration::from_millis(200),
        )
    }

    fn small_capture() -> Capture {
        Capture::with_depth(DepthFrame::new(2, 2, vec![900, 901, 902, 903]).unwrap())
    }

    #[test]
    fn test_start_sets_running() {
        // Arrange
        let mut driver = MockDriver::new();
        driver.expect_start().times(1).returning(|_| Ok(()));
        driver.expect_stop().times(1).return_const(());
        let session = session_with(driver);

        // Act
        assert_ok!(session.start());

        // Assert
        assert!(session.is_running());
    }

    #[test]
    fn test_start_failure_maps_to_unavailable_and_leaves_idle() {
        let mut driver = MockDriver::new();
        driver
            .expect_start()
            .times(1)
            .returning(|_| Err(SensorError::NotConnected));
        driver.expect_stop().never();
        let session = session_with(driver);

        let result = session.start();

        assert!(matches!(
            result,
            Err(DeviceError::Unavailable(SensorError::NotConnected))
        ));
        assert!(!session.is_running());
    }

    #[test]
    fn test_invalid_config_never_reaches_driver() {
        let mut driver = MockDriver::new();
        driver.expect_start().never();
        let config = DeviceConfig {
            depth_mode: DepthMode::WfovUnbinned,
            frame_rate: FrameRate::Fps30,
            image_sync: ImageSync::Any,
        };
        let session = DeviceSession::new(Box::new(driver), config, Duration::from_millis(50));

        let result = session.start();

        assert!(matches!(
            result,
            Err(DeviceError::Unavailable(SensorError::Config(
                ConfigError::UnsupportedFrameRate { .. }
            )))
        ));
    }

    #[test]
    fn test_start_twice_starts_driver_once() {
        let mut driver = MockDriver::new();
        driver.expect_start().times(1).returning(|_| Ok(()));
        driver.expect_stop().times(1).return_const(());
        let session = session_with(driver);

        assert_ok!(session.start());
        assert_ok!(session.start());
    }

    #[test]
    fn test_stop_twice_stops_driver_once() {
        // Arrange
        let mut driver = MockDriver::new();
        driver.expect_start().returning(|_| Ok(()));
        driver.expect_stop().times(1).return_const(());
        let session = session_with(driver);
        session.start().unwrap();

        // Act / Assert: only the first call performs the stop
        assert!(session.stop());
        assert!(!session.stop());
        assert!(!session.is_running());
    }

    #[test]
    fn test_stop_without_start_never_calls_driver() {
        let mut driver = MockDriver::new();
        driver.expect_stop().never();
        let session = session_with(driver);

        assert!(!session.stop());
    }

    #[test]
    fn test_concurrent_stops_call_driver_at_most_once() {
        // Two shutdown paths (signal handler and normal exit) racing on
        // separate threads must still produce exactly one driver stop.
        let mut driver = MockDriver::new();
        driver.expect_start().returning(|_| Ok(()));
        driver.expect_stop().times(1).return_const(());
        let session = Arc::new(session_with(driver));
        session.start().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&session);
                std::thread::spawn(move || s.stop())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();

        assert_eq!(winners, 1);
    }

    #[test]
    fn test_restart_after_stop_is_rejected() {
        let mut driver = MockDriver::new();
        driver.expect_start().times(1).returning(|_| Ok(()));
        driver.expect_stop().times(1).return_const(());
        let session = session_with(driver);
        session.start().unwrap();
        session.stop();

        assert!(matches!(session.start(), Err(DeviceError::SessionClosed)));
    }

    #[test]
    fn test_drop_releases_running_sensor() {
        let mut driver = MockDriver::new();
        driver.expect_start().returning(|_| Ok(()));
        // Verified when the mock is dropped together with the session.
        driver.expect_stop().times(1).return_const(());
        let session = session_with(driver);
        session.start().unwrap();

        drop(session);
    }

    #[tokio::test]
    async fn test_capture_returns_driver_frame() {
        let mut driver = MockDriver::new();
        driver.expect_start().returning(|_| Ok(()));
        driver.expect_get_capture().returning(|_| Ok(small_capture()));
        driver.expect_stop().return_const(());
        let session = session_with(driver);
        session.start().unwrap();

        let capture = assert_ok!(session.capture().await);

        assert_eq!(capture, small_capture());
    }

    #[tokio::test]
    async fn test_capture_passes_configured_timeout_to_driver() {
        let mut driver = MockDriver::new();
        driver.expect_start().returning(|_| Ok(()));
        driver
            .expect_get_capture()
            .withf(|timeout| *timeout == Duration::from_millis(200))
            .times(1)
            .returning(|_| Ok(Capture::empty()));
        driver.expect_stop().return_const(());
        let session = session_with(driver);
        session.start().unwrap();

        assert_ok!(session.capture().await);
    }

    #[tokio::test]
    async fn test_capture_before_start_is_not_running() {
        let mut driver = MockDriver::new();
        driver.expect_get_capture().never();
        let session = session_with(driver);

        let err = assert_err!(session.capture().await);

        assert!(matches!(err, DeviceError::NotRunning));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_driver_timeout_is_recoverable() {
        let mut driver = MockDriver::new();
        driver.expect_start().returning(|_| Ok(()));
        driver
            .expect_get_capture()
            .returning(|t| Err(SensorError::Timeout(t)));
        driver.expect_stop().return_const(());
        let session = session_with(driver);
        session.start().unwrap();

        let err = assert_err!(session.capture().await);

        assert!(matches!(err, DeviceError::Capture(SensorError::Timeout(_))));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_stalled_driver_hits_async_deadline() {
        // The driver ignores its timeout and blocks far longer; the session
        // must give up at timeout + grace instead of waiting.
        let mut driver = MockDriver::new();
        driver.expect_start().returning(|_| Ok(()));
        driver.expect_get_capture().returning(|_| {
            std::thread::sleep(Duration::from_millis(800));
            Ok(Capture::empty())
        });
        driver.expect_stop().return_const(());
        let session = DeviceSession::new(
            Box::new(driver),
            DeviceConfig::default(),
            Duration::from_millis(10),
        );
        session.start().unwrap();

        let started = std::time::Instant::now();
        let err = assert_err!(session.capture().await);

        assert!(matches!(err, DeviceError::CaptureTimeout(_)));
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    /// A driver whose first capture ignores its timeout and blocks.
    struct StallingDriver {
        stall: Duration,
        captures: Arc<AtomicU8>,
        stops: Arc<AtomicU8>,
    }

    impl DepthSensor for StallingDriver {
        fn start(&mut self, _config: &DeviceConfig) -> Result<(), SensorError> {
            Ok(())
        }

        fn get_capture(&mut self, _timeout: Duration) -> Result<Capture, SensorError> {
            if self.captures.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(self.stall);
            }
            Ok(small_capture())
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stalling_session(stall: Duration) -> (DeviceSession, Arc<AtomicU8>, Arc<AtomicU8>) {
        let captures = Arc::new(AtomicU8::new(0));
        let stops = Arc::new(AtomicU8::new(0));
        let driver = StallingDriver {
            stall,
            captures: Arc::clone(&captures),
            stops: Arc::clone(&stops),
        };
        let session = DeviceSession::new(
            Box::new(driver),
            DeviceConfig::default(),
            Duration::from_millis(10),
        );
        (session, captures, stops)
    }

    #[tokio::test]
    async fn test_stalled_driver_gets_no_new_workers() {
        // Arrange
        let (session, captures, _stops) = stalling_session(Duration::from_millis(1500));
        session.start().unwrap();
        assert_err!(session.capture().await);

        // Act: the next cycle arrives while the driver is still stuck.
        let started = std::time::Instant::now();
        let err = assert_err!(session.capture().await);

        // Assert: failed at once, and nothing else reached the driver
        assert!(matches!(err, DeviceError::CaptureTimeout(_)));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(captures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_resumes_after_stalled_call_returns() {
        let (session, captures, _stops) = stalling_session(Duration::from_millis(400));
        session.start().unwrap();
        assert_err!(session.capture().await);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let capture = assert_ok!(session.capture().await);

        assert_eq!(capture, small_capture());
        assert_eq!(captures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_is_bounded_while_driver_stalls() {
        // Arrange: a capture is abandoned while the driver blocks for 1.5 s.
        let (session, _captures, stops) = stalling_session(Duration::from_millis(1500));
        session.start().unwrap();
        assert_err!(session.capture().await);

        // Act
        let started = std::time::Instant::now();
        let performed = session.stop();
        let elapsed = started.elapsed();

        // Assert: stop returns promptly and the driver is stopped exactly
        // once after the stalled call comes back.
        assert!(performed);
        assert!(elapsed < Duration::from_millis(500), "stop took {elapsed:?}");
        assert!(!session.is_running());
        assert!(!session.stop());

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while stops.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_after_stop_is_not_running() {
        let mut driver = MockDriver::new();
        driver.expect_start().returning(|_| Ok(()));
        driver.expect_get_capture().never();
        driver.expect_stop().times(1).return_const(());
        let session = session_with(driver);
        session.start().unwrap();
        session.stop();

        assert!(matches!(
            session.capture().await,
            Err(DeviceError::NotRunning)
        ));
    }
}
