//! WebSocket server: accept loop and per-viewer session tasks.
//!
//! This module is responsible for:
//!
//! 1. Starting the depth sensor (through the lifecycle controller) and only
//!    then binding the TCP listener.
//! 2. Accepting incoming TCP connections and upgrading them to WebSocket.
//! 3. Running one [`StreamLoop`] per viewer, concurrently with a reader that
//!    drains (and ignores) anything the viewer sends.
//! 4. Watching the shutdown future and shutting the process down in order.
//!
//! Device start and stop block on the driver, so both run on tokio's
//! blocking pool rather than on a runtime worker.
//!
//! # Listener faults
//!
//! A single failed `accept` (for example running out of file descriptors) is
//! logged and retried after a short back-off.  After
//! [`MAX_CONSECUTIVE_ACCEPT_ERRORS`] failures in a row the listener is
//! considered broken and the process shuts down with
//! [`ShutdownTrigger::ListenerFault`].
//!
//! # Isolation
//!
//! Each viewer runs in its own Tokio task.  A disconnect, a transport error,
//! or even a panic inside one session ends that task only; the accept loop
//! logs it and keeps serving everyone else.

use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        error::ProtocolError,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::{
    FrameSink, LifecycleController, LifecycleError, SinkError, StreamLoop, StreamReport,
};
use crate::domain::{ShutdownTrigger, StreamConfig};
use crate::infrastructure::device_session::DeviceSession;

/// How often the accept loop wakes up to check the running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// How long `serve` waits for viewer sessions to say goodbye on shutdown.
const SESSION_DRAIN: Duration = Duration::from_secs(2);

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Failed accepts in a row after which the listener counts as broken.
pub const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 20;

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The device could not be started; no listener was opened.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The blocking task starting the device panicked or was cancelled.
    #[error("device start task failed: {0}")]
    StartTask(#[from] tokio::task::JoinError),

    /// The listener could not be bound; the device has been released.
    #[error("failed to bind WebSocket listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

// ── Server ────────────────────────────────────────────────────────────────────

/// A running device plus a bound listener, ready to [`serve`](Self::serve).
pub struct StreamServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    controller: Arc<LifecycleController>,
    pacing: Duration,
}

impl StreamServer {
    /// Starts the device, then binds the listener.
    ///
    /// The listener is bound only after the device is running, so a missing
    /// sensor never opens a port.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Lifecycle`] if the device cannot be started.
    /// - [`ServerError::StartTask`] if the start task itself failed.
    /// - [`ServerError::Bind`] if the address is unavailable; the device is
    ///   shut down before returning.
    pub async fn launch(
        config: &StreamConfig,
        controller: Arc<LifecycleController>,
    ) -> Result<Self, ServerError> {
        let starter = Arc::clone(&controller);
        tokio::task::spawn_blocking(move || starter.start_device()).await??;

        let bound = match TcpListener::bind(config.bind_addr).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                shutdown_off_runtime(&controller, ShutdownTrigger::ListenerFault).await;
                return Err(ServerError::Bind {
                    addr: config.bind_addr,
                    source,
                });
            }
        };

        info!("depth stream listening on ws://{local_addr}");
        Ok(Self {
            listener,
            local_addr,
            controller,
            pacing: config.pacing,
        })
    }

    /// The address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts viewers until `shutdown` resolves or the controller leaves the
    /// running state, then releases the device and returns.
    ///
    /// The device stop runs exactly once even though both the shutdown path
    /// and the final fall-through request it.
    pub async fn serve<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let signal_controller = Arc::clone(&self.controller);
        let signal_task = tokio::spawn(async move {
            shutdown.await;
            info!("received interrupt; initiating graceful shutdown");
            shutdown_off_runtime(&signal_controller, ShutdownTrigger::Signal).await;
        });

        let running = self.controller.running_flag();
        let mut sessions = JoinSet::new();
        let mut accept_faults = AcceptFaults::default();

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            tokio::select! {
                accepted = timeout(ACCEPT_POLL, self.listener.accept()) => match accepted {
                    Ok(Ok((stream, peer_addr))) => {
                        accept_faults.record_success();
                        let session = self.controller.session();
                        let running = Arc::clone(&running);
                        let pacing = self.pacing;
                        sessions.spawn(handle_viewer(stream, peer_addr, session, running, pacing));
                    }
                    Ok(Err(e)) => {
                        error!("accept error: {e}");
                        if accept_faults.record_error() {
                            error!(
                                "{MAX_CONSECUTIVE_ACCEPT_ERRORS} accept errors in a row; \
                                 giving up on the listener"
                            );
                            shutdown_off_runtime(&self.controller, ShutdownTrigger::ListenerFault)
                                .await;
                            break;
                        }
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(_) => {}
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("viewer session panicked: {e}");
                        }
                    }
                }
            }
        }

        signal_task.abort();
        shutdown_off_runtime(&self.controller, ShutdownTrigger::Exit).await;

        let drained = timeout(SESSION_DRAIN, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} viewer session(s) still open after {SESSION_DRAIN:?}; aborting",
                sessions.len()
            );
        }
        info!("depth stream server stopped");
    }
}

/// Runs a (possibly blocking) lifecycle shutdown on the blocking pool.
async fn shutdown_off_runtime(controller: &Arc<LifecycleController>, trigger: ShutdownTrigger) {
    let controller = Arc::clone(controller);
    if let Err(e) = tokio::task::spawn_blocking(move || controller.shutdown(trigger)).await {
        error!("shutdown ({trigger}) task failed: {e}");
    }
}

/// Counts consecutive failed accepts.
#[derive(Debug, Default)]
struct AcceptFaults {
    consecutive: u32,
}

impl AcceptFaults {
    /// Records a failure; `true` once the listener should be given up on.
    fn record_error(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= MAX_CONSECUTIVE_ACCEPT_ERRORS
    }

    fn record_success(&mut self) {
        self.consecutive = 0;
    }
}

// ── Per-viewer session ────────────────────────────────────────────────────────

/// Task entry point for one viewer; logs the outcome.
async fn handle_viewer(
    stream: TcpStream,
    peer_addr: SocketAddr,
    session: Arc<DeviceSession>,
    running: Arc<AtomicBool>,
    pacing: Duration,
) {
    let label = format!("{} ({peer_addr})", Uuid::new_v4());
    match run_viewer(stream, &label, session, running, pacing).await {
        Ok(report) => info!(
            "viewer {label} finished: {:?}, {} frames sent, {} cycles without a frame",
            report.outcome, report.frames_sent, report.cycles_skipped
        ),
        Err(e) => warn!("viewer {label} closed with error: {e:#}"),
    }
}

/// Handshake, then run the stream loop while draining inbound messages.
async fn run_viewer(
    stream: TcpStream,
    label: &str,
    session: Arc<DeviceSession>,
    running: Arc<AtomicBool>,
    pacing: Duration,
) -> anyhow::Result<StreamReport> {
    let ws_stream = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {label}"))?;
    info!("viewer connected: {label}");

    let (ws_tx, ws_rx) = ws_stream.split();
    let stream_loop = StreamLoop::new(session, WsFrameSink::new(ws_tx), pacing, running, label);

    // The reader must keep running so that pings are answered and a close
    // frame is noticed; the next send then reports the closed transport.
    let run = stream_loop.run();
    let drain = drain_inbound(ws_rx, label);
    tokio::pin!(run, drain);

    let mut drained = false;
    let report = loop {
        tokio::select! {
            report = &mut run => break report,
            () = &mut drain, if !drained => {
                drained = true;
            }
        }
    };
    Ok(report)
}

/// Reads and discards everything the viewer sends until it closes.
async fn drain_inbound<R>(mut ws_rx: R, label: &str)
where
    R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(WsMessage::Close(_)) => {
                debug!("viewer {label}: close frame received");
                break;
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => {}
            Ok(other) => debug!(
                "viewer {label}: ignoring inbound {} byte message",
                other.len()
            ),
            Err(e) => {
                debug!("viewer {label}: read ended: {e}");
                break;
            }
        }
    }
}

// ── Transport adapter ─────────────────────────────────────────────────────────

/// [`FrameSink`] over the write half of a WebSocket.
pub struct WsFrameSink<S> {
    inner: S,
}

impl<S> WsFrameSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> FrameSink for WsFrameSink<S>
where
    S: Sink<WsMessage, Error = WsError> + Unpin + Send,
{
    async fn send_text(&mut self, payload: String) -> Result<(), SinkError> {
        self.inner
            .send(WsMessage::Text(payload))
            .await
            .map_err(classify_send_error)
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "server shutting down".into(),
        };
        if let Err(e) = self.inner.send(WsMessage::Close(Some(frame))).await {
            debug!("close frame not delivered: {e}");
        }
    }
}

/// Splits send failures into "viewer went away" and everything else.
fn classify_send_error(e: WsError) -> SinkError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => SinkError::Closed,
        WsError::Protocol(
            ProtocolError::SendAfterClosing | ProtocolError::ResetWithoutClosingHandshake,
        ) => SinkError::Closed,
        WsError::Io(ref io)
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            ) =>
        {
            SinkError::Closed
        }
        other => SinkError::Fault(other.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
