//! Per-viewer stream loop.
//!
//! Every connected viewer runs one [`StreamLoop`].  Each cycle runs strictly
//! in this order:
//!
//! ```text
//! capture ──► depth present? ──► encode ──► send ──► sleep(pacing)
//!                  │ no                               ▲
//!                  └──────────────────────────────────┘
//! ```
//!
//! The only suspension points are the capture, the send, and the pacing
//! sleep.  A failed or empty capture skips encode/send for that cycle.  A
//! closed transport ends the loop quietly.  Any other fault is logged and
//! ends this loop only; other viewers are unaffected.
//!
//! The transport is abstracted behind [`FrameSink`] so the loop can be tested
//! without a socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use depth_core::encode_capture;

use crate::infrastructure::device_session::{DeviceError, DeviceSession};

// ── Transport seam ────────────────────────────────────────────────────────────

/// Why a send did not go through.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The viewer went away.  Ends the loop without an error.
    #[error("connection closed by peer")]
    Closed,

    /// The transport failed for any other reason.
    #[error("transport fault: {0}")]
    Fault(String),
}

/// Outbound half of one viewer connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one encoded frame as a single text message.
    async fn send_text(&mut self, payload: String) -> Result<(), SinkError>;

    /// Tells the viewer the server is going away.  Best effort.
    async fn close(&mut self) {}
}

// ── Loop outcome ──────────────────────────────────────────────────────────────

/// Why a stream loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The viewer disconnected.
    ClientClosed,
    /// The process-wide running flag was cleared.
    Shutdown,
    /// The device session stopped underneath the loop.
    DeviceStopped,
    /// An unexpected fault ended this loop.
    Fault(String),
}

/// Summary returned when a stream loop ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub outcome: StreamOutcome,
    /// Frames successfully handed to the transport.
    pub frames_sent: u64,
    /// Cycles that produced no frame (empty capture or capture error).
    pub cycles_skipped: u64,
}

// ── Stream loop ───────────────────────────────────────────────────────────────

/// Capture → encode → send → pace, for one viewer.
pub struct StreamLoop<S> {
    session: Arc<DeviceSession>,
    sink: S,
    pacing: Duration,
    running: Arc<AtomicBool>,
    label: String,
}

impl<S: FrameSink> StreamLoop<S> {
    /// Creates a loop pulling from `session` and pushing into `sink`.
    ///
    /// `running` is the process-wide shutdown flag, checked once per cycle.
    /// `label` identifies the viewer in log lines.
    pub fn new(
        session: Arc<DeviceSession>,
        sink: S,
        pacing: Duration,
        running: Arc<AtomicBool>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            session,
            sink,
            pacing,
            running,
            label: label.into(),
        }
    }

    /// Runs cycles until the viewer disconnects, the process shuts down, the
    /// device stops, or an unexpected fault occurs.  Never panics on
    /// transport or device errors.
    pub async fn run(mut self) -> StreamReport {
        let mut frames_sent = 0u64;
        let mut cycles_skipped = 0u64;

        let outcome = loop {
            if !self.running.load(Ordering::Relaxed) {
                break StreamOutcome::Shutdown;
            }

            // ── capture ──
            let capture = match self.session.capture().await {
                Ok(capture) => Some(capture),
                Err(DeviceError::NotRunning) => break StreamOutcome::DeviceStopped,
                Err(e) if e.is_recoverable() => {
                    debug!("stream {}: no frame this cycle: {e}", self.label);
                    None
                }
                Err(e) => break StreamOutcome::Fault(e.to_string()),
            };

            // ── presence check + encode ──
            let payload = match capture.as_ref().map(encode_capture).transpose() {
                Ok(payload) => payload.flatten(),
                Err(e) => break StreamOutcome::Fault(format!("frame encoding failed: {e}")),
            };

            // ── send ──
            match payload {
                Some(text) => match self.sink.send_text(text).await {
                    Ok(()) => frames_sent += 1,
                    Err(SinkError::Closed) => break StreamOutcome::ClientClosed,
                    Err(SinkError::Fault(reason)) => break StreamOutcome::Fault(reason),
                },
                None => cycles_skipped += 1,
            }

            // ── pace ──
            tokio::time::sleep(self.pacing).await;
        };

        match &outcome {
            StreamOutcome::Fault(reason) => {
                warn!("stream {}: ended by unexpected fault: {reason}", self.label)
            }
            StreamOutcome::Shutdown | StreamOutcome::DeviceStopped => {
                debug!("stream {}: ended ({outcome:?}); closing", self.label);
                self.sink.close().await;
            }
            StreamOutcome::ClientClosed => debug!("stream {}: viewer left", self.label),
        }

        StreamReport {
            outcome,
            frames_sent,
            cycles_skipped,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sensor::MockSensor;
    use depth_core::{decode_frame, DeviceConfig};

    /// Records payloads; closes (or faults) after `limit` successful sends.
    struct RecordingSink {
        sent: Vec<String>,
        limit: usize,
        fail_with_fault: bool,
        closed: bool,
    }

    impl RecordingSink {
        fn closing_after(limit: usize) -> Self {
            Self {
                sent: Vec::new(),
                limit,
                fail_with_fault: false,
                closed: false,
            }
        }

        fn faulting_after(limit: usize) -> Self {
            Self {
                fail_with_fault: true,
                ..Self::closing_after(limit)
            }
        }
    }

    #[async_trait]
    impl<'a> FrameSink for &'a mut RecordingSink {
        async fn send_text(&mut self, payload: String) -> Result<(), SinkError> {
            if self.sent.len() >= self.limit {
                return Err(if self.fail_with_fault {
                    SinkError::Fault("buffer exploded".to_string())
                } else {
                    SinkError::Closed
                });
            }
            self.sent.push(payload);
            Ok(())
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn running_session(sensor: MockSensor) -> Arc<DeviceSession> {
        let session = DeviceSession::new(
            Box::new(sensor),
            DeviceConfig::default(),
            Duration::from_millis(200),
        );
        session.start().expect("mock sensor starts");
        Arc::new(session)
    }

    fn flag(value: bool) -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(value))
    }

    #[tokio::test]
    async fn test_loop_sends_frames_until_client_closes() {
        // Arrange
        let session = running_session(MockSensor::new(4, 3));
        let mut sink = RecordingSink::closing_after(3);

        // Act
        let report = StreamLoop::new(session, &mut sink, Duration::from_millis(1), flag(true), "t")
            .run()
            .await;

        // Assert
        assert_eq!(report.outcome, StreamOutcome::ClientClosed);
        assert_eq!(report.frames_sent, 3);
        assert_eq!(sink.sent.len(), 3);
        assert!(!sink.closed);
    }

    #[tokio::test]
    async fn test_sent_payloads_have_declared_shape() {
        let session = running_session(MockSensor::new(5, 2));
        let mut sink = RecordingSink::closing_after(2);

        StreamLoop::new(session, &mut sink, Duration::from_millis(1), flag(true), "t")
            .run()
            .await;

        for text in &sink.sent {
            let frame = decode_frame(text).expect("valid payload");
            assert_eq!((frame.width(), frame.height()), (5, 2));
        }
    }

    #[tokio::test]
    async fn test_missing_depth_skips_send_without_error() {
        // Every second capture has no depth.  Captures 1, 3, 5, 7 are sent,
        // 2, 4, 6, 8 are skipped, and capture 9 finds the viewer gone.
        let sensor = MockSensor::new(2, 2).without_depth_every(2);
        let stats = sensor.stats();
        let session = running_session(sensor);
        let mut sink = RecordingSink::closing_after(4);

        let report = StreamLoop::new(session, &mut sink, Duration::from_millis(1), flag(true), "t")
            .run()
            .await;

        assert_eq!(report.outcome, StreamOutcome::ClientClosed);
        assert_eq!(report.frames_sent, 4);
        assert_eq!(report.cycles_skipped, 4);
        assert_eq!(stats.captures(), 9);
    }

    #[tokio::test]
    async fn test_capture_timeouts_are_skipped_cycles() {
        // The driver always times out: the loop keeps going (skipping) until
        // shutdown is requested.
        let sensor = MockSensor::new(2, 2).with_capture_delay(Duration::from_secs(5));
        let session = Arc::new(DeviceSession::new(
            Box::new(sensor),
            DeviceConfig::default(),
            Duration::from_millis(5),
        ));
        session.start().unwrap();
        let running = flag(true);
        let mut sink = RecordingSink::closing_after(usize::MAX);

        let stopper = {
            let running = Arc::clone(&running);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                running.store(false, Ordering::Relaxed);
            })
        };
        let report = StreamLoop::new(session, &mut sink, Duration::from_millis(1), running, "t")
            .run()
            .await;
        stopper.await.unwrap();

        assert_eq!(report.outcome, StreamOutcome::Shutdown);
        assert_eq!(report.frames_sent, 0);
        assert!(report.cycles_skipped >= 1);
    }

    #[tokio::test]
    async fn test_shutdown_flag_stops_loop_before_capture() {
        let sensor = MockSensor::new(2, 2);
        let stats = sensor.stats();
        let session = running_session(sensor);
        let mut sink = RecordingSink::closing_after(10);

        let report = StreamLoop::new(session, &mut sink, Duration::from_millis(1), flag(false), "t")
            .run()
            .await;

        assert_eq!(report.outcome, StreamOutcome::Shutdown);
        assert_eq!(stats.captures(), 0);
        assert!(sink.closed, "viewer must be told the server is going away");
    }

    #[tokio::test]
    async fn test_stopped_device_ends_loop() {
        let session = running_session(MockSensor::new(2, 2));
        session.stop();
        let mut sink = RecordingSink::closing_after(10);

        let report = StreamLoop::new(session, &mut sink, Duration::from_millis(1), flag(true), "t")
            .run()
            .await;

        assert_eq!(report.outcome, StreamOutcome::DeviceStopped);
    }

    #[tokio::test]
    async fn test_transport_fault_ends_loop_with_fault() {
        let session = running_session(MockSensor::new(2, 2));
        let mut sink = RecordingSink::faulting_after(1);

        let report = StreamLoop::new(session, &mut sink, Duration::from_millis(1), flag(true), "t")
            .run()
            .await;

        assert_eq!(
            report.outcome,
            StreamOutcome::Fault("buffer exploded".to_string())
        );
        assert_eq!(report.frames_sent, 1);
    }

    #[tokio::test]
    async fn test_closed_loop_does_not_affect_sibling_loop() {
        // Two loops share one session; the first viewer leaves after one
        // frame, the second keeps receiving.
        let session = running_session(MockSensor::new(3, 3));
        let mut short = RecordingSink::closing_after(1);
        let mut long = RecordingSink::closing_after(6);

        let (a, b) = tokio::join!(
            StreamLoop::new(
                Arc::clone(&session),
                &mut short,
                Duration::from_millis(1),
                flag(true),
                "a"
            )
            .run(),
            StreamLoop::new(
                Arc::clone(&session),
                &mut long,
                Duration::from_millis(1),
                flag(true),
                "b"
            )
            .run(),
        );

        assert_eq!(a.outcome, StreamOutcome::ClientClosed);
        assert_eq!(a.frames_sent, 1);
        assert_eq!(b.outcome, StreamOutcome::ClientClosed);
        assert_eq!(b.frames_sent, 6);
        assert!(session.is_running());
    }

    #[test]
    fn test_sink_error_display() {
        assert_eq!(SinkError::Closed.to_string(), "connection closed by peer");
        assert_eq!(
            SinkError::Fault("reset".into()).to_string(),
            "transport fault: reset"
        );
    }
}
