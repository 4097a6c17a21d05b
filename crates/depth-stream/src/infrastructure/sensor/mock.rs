//! Scripted depth sensor for tests.
//!
//! Lets tests simulate a missing device, captures without depth, slow
//! captures, and count how many times the driver was started and stopped,
//! all without hardware.  Counters live in a shared [`MockSensorStats`] so
//! they stay readable after the sensor has been boxed into a session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use depth_core::{Capture, DepthFrame, DepthSensor, DeviceConfig, SensorError};

/// Call counters shared between a [`MockSensor`] and the test.
#[derive(Debug, Default)]
pub struct MockSensorStats {
    starts: AtomicUsize,
    stops: AtomicUsize,
    captures: AtomicUsize,
}

impl MockSensorStats {
    /// Number of `start` calls (successful or not).
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Number of `get_capture` calls.
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

/// A [`DepthSensor`] whose behaviour is set up by the test.
pub struct MockSensor {
    width: u32,
    height: u32,
    start_error: Option<SensorError>,
    skip_depth_every: Option<usize>,
    capture_delay: Duration,
    start_delay: Duration,
    stats: Arc<MockSensorStats>,
}

impl MockSensor {
    /// A working sensor producing `width` x `height` frames.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            start_error: None,
            skip_depth_every: None,
            capture_delay: Duration::ZERO,
            start_delay: Duration::ZERO,
            stats: Arc::new(MockSensorStats::default()),
        }
    }

    /// A sensor whose `start` always fails with `error`.
    pub fn failing(error: SensorError) -> Self {
        Self {
            start_error: Some(error),
            ..Self::new(1, 1)
        }
    }

    /// Every `n`-th capture (1-based) has no depth component.
    ///
    /// `n == 1` means no capture ever carries depth.
    pub fn without_depth_every(mut self, n: usize) -> Self {
        self.skip_depth_every = Some(n.max(1));
        self
    }

    /// Each capture blocks for `delay`; longer than the timeout means
    /// [`SensorError::Timeout`].
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    /// `start` blocks for `delay` before reporting its result.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Shared counters; keep a clone before boxing the sensor.
    pub fn stats(&self) -> Arc<MockSensorStats> {
        Arc::clone(&self.stats)
    }
}

impl DepthSensor for MockSensor {
    fn start(&mut self, _config: &DeviceConfig) -> Result<(), SensorError> {
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.start_delay);
        match &self.start_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn get_capture(&mut self, timeout: Duration) -> Result<Capture, SensorError> {
        let n = self.stats.captures.fetch_add(1, Ordering::SeqCst) + 1;

        if self.capture_delay > timeout {
            thread::sleep(timeout);
            return Err(SensorError::Timeout(timeout));
        }
        thread::sleep(self.capture_delay);

        if self.skip_depth_every.is_some_and(|every| n % every == 0) {
            return Ok(Capture::empty());
        }

        let value = 500 + (n % 1000) as u16;
        let samples = vec![value; self.width as usize * self.height as usize];
        DepthFrame::new(self.width, self.height, samples)
            .map(Capture::with_depth)
            .map_err(|e| SensorError::Fault(e.to_string()))
    }

    fn stop(&mut self) {
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
    }
}
