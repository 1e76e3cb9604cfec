// ── Terminal ──
//
// Owns the device link: one background task per session that connects,
// announces the device, emits telemetry, routes inbound commands, and
// reconnects after any failure. The socket never leaves that task;
// everything else reaches it through the outbound queue, which makes
// the task the single writer on the connection.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use buson_api::{DeviceSocket, InboundMessage, Outbound, RideResponsePayload, TransportConfig};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigProvider, DeviceConfig, LinkTiming};
use crate::dispatch::{Dispatch, Dispatcher, HandlerResult};
use crate::error::CoreError;
use crate::identity::DeviceIdentity;
use crate::state::DeviceState;
use crate::telemetry::{TelemetryEmitter, epoch_millis};

const EVENT_CHANNEL_SIZE: usize = 64;

// ── ConnectionState ──────────────────────────────────────────────

/// Link state, rendered by the embedder as a connection indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last attempt or session failed; a retry follows the backoff.
    Error,
}

/// Link diagnostics for a status bar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    /// Reason for the most recent failure. Cleared once connected.
    pub last_error: Option<String>,
    /// Most recent ack round-trip time.
    pub rtt_ms: Option<i64>,
}

/// Notifications for embedders that prefer pushing to polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    StateChanged(ConnectionState),
    /// An inbound message reached the dispatcher.
    Inbound(Dispatch),
}

// ── Terminal ─────────────────────────────────────────────────────

/// One device session manager.
///
/// Cheaply cloneable via `Arc<TerminalInner>`. Create it, register
/// handlers, then [`start`](Self::start). The link keeps retrying until
/// [`stop`](Self::stop) is called.
#[derive(Clone)]
pub struct Terminal {
    inner: Arc<TerminalInner>,
}

struct TerminalInner {
    provider: Arc<dyn ConfigProvider>,
    timing: LinkTiming,
    state: DeviceState,
    dispatcher: Dispatcher,
    link: watch::Sender<LinkStatus>,
    events: broadcast::Sender<TerminalEvent>,
    identity: ArcSwapOption<DeviceIdentity>,
    outbound: ArcSwapOption<mpsc::Sender<Outbound>>,
    session: Mutex<Option<Session>>,
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("link", &*self.inner.link.borrow())
            .field("timing", &self.inner.timing)
            .finish_non_exhaustive()
    }
}

impl Terminal {
    pub fn new(provider: impl ConfigProvider) -> Self {
        Self::with_timing(provider, LinkTiming::default())
    }

    pub fn with_timing(provider: impl ConfigProvider, timing: LinkTiming) -> Self {
        let (link, _) = watch::channel(LinkStatus::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Self {
            inner: Arc::new(TerminalInner {
                provider: Arc::new(provider),
                timing,
                state: DeviceState::new(),
                dispatcher: Dispatcher::new(),
                link,
                events,
                identity: ArcSwapOption::empty(),
                outbound: ArcSwapOption::empty(),
                session: Mutex::new(None),
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn state(&self) -> &DeviceState {
        &self.inner.state
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Identity of the live session, if connected.
    pub fn identity(&self) -> Option<Arc<DeviceIdentity>> {
        self.inner.identity.load_full()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.link.borrow().state
    }

    pub fn link_status(&self) -> LinkStatus {
        self.inner.link.borrow().clone()
    }

    pub fn watch_link(&self) -> watch::Receiver<LinkStatus> {
        self.inner.link.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.inner.events.subscribe()
    }

    /// Register a handler. See [`Dispatcher::on`].
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.dispatcher.on(event, handler);
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the link task. Fails if a session is already running.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut session = self.inner.session.lock().await;
        if session.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return Err(CoreError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(link_task(self.clone(), cancel.clone()));
        *session = Some(Session { cancel, handle });
        debug!("terminal started");
        Ok(())
    }

    /// Stop the link task and close the connection. Safe to call any
    /// number of times.
    pub async fn stop(&self) {
        let session = self.inner.session.lock().await.take();
        if let Some(Session { cancel, handle }) = session {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "link task ended abnormally");
            }
            debug!("terminal stopped");
        }

        self.inner.outbound.store(None);
        self.inner.identity.store(None);
        self.set_state(ConnectionState::Disconnected);
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Queue `message` for the live connection.
    ///
    /// Best effort: while not connected, or with the queue full, the
    /// message is dropped and `false` returned. Nothing is buffered
    /// across reconnects.
    pub fn send(&self, message: Outbound) -> bool {
        let kind = message.kind();
        if self.connection_state() != ConnectionState::Connected {
            debug!(kind, "not connected, message dropped");
            return false;
        }
        let guard = self.inner.outbound.load();
        let Some(tx) = guard.as_ref() else {
            debug!(kind, "no session, message dropped");
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(kind, "outbound queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(kind, "session closed, message dropped");
                false
            }
        }
    }

    /// Send a caller-defined event such as `door` with the device envelope.
    pub fn send_event(&self, event: impl Into<String>, payload: Value) -> bool {
        let Some(identity) = self.identity() else {
            debug!("not connected, event dropped");
            return false;
        };
        self.send(Outbound::Event {
            event: event.into(),
            device: identity.device_info(),
            payload,
        })
    }

    /// Report the driver's decision on a ride request.
    pub fn respond_to_ride(&self, request_id: impl Into<String>, accepted: bool) -> bool {
        let Some(identity) = self.identity() else {
            debug!("not connected, ride response dropped");
            return false;
        };
        self.send(Outbound::RideResponse {
            device: identity.device_info(),
            payload: RideResponsePayload {
                request_id: request_id.into(),
                decision: if accepted { "accepted" } else { "rejected" }.to_owned(),
            },
        })
    }

    // ── Link status updates ──────────────────────────────────────

    fn set_state(&self, next: ConnectionState) {
        let changed = self.inner.link.send_if_modified(|link| {
            if link.state == next {
                return false;
            }
            link.state = next;
            if next == ConnectionState::Connected {
                link.last_error = None;
            }
            true
        });
        self.inner.state.set_connected(next == ConnectionState::Connected);
        if changed {
            info!(state = %next, "link state changed");
            let _ = self.inner.events.send(TerminalEvent::StateChanged(next));
        }
    }

    fn fail(&self, next: ConnectionState, error: &CoreError) {
        self.inner.link.send_modify(|link| {
            link.last_error = Some(error.to_string());
        });
        self.set_state(next);
    }

    fn record_rtt(&self, rtt_ms: i64) {
        self.inner.link.send_modify(|link| link.rtt_ms = Some(rtt_ms));
    }
}

// ── Background task ──────────────────────────────────────────────

/// Connect, run, and reconnect until cancelled.
async fn link_task(terminal: Terminal, cancel: CancellationToken) {
    let timing = terminal.inner.timing.clone();
    let mut parked_reason: Option<String> = None;

    loop {
        let config = terminal.inner.provider.load();

        let result = match config.validate() {
            Ok(()) => run_session(&terminal, &config, &cancel).await,
            Err(e) => Err(e),
        };

        let pause = match result {
            Ok(()) => break,
            Err(e) if e.is_config() => {
                let reason = e.to_string();
                if parked_reason.as_deref() != Some(reason.as_str()) {
                    info!(reason = %reason, "waiting for configuration");
                    terminal.fail(ConnectionState::Disconnected, &e);
                    parked_reason = Some(reason);
                }
                timing.config_poll_interval
            }
            Err(e) => {
                parked_reason = None;
                warn!(error = %e, "device link failed");
                terminal.fail(ConnectionState::Error, &e);
                timing.reconnect_delay
            }
        };

        if sleep_or_cancel(&cancel, pause).await {
            break;
        }
    }

    terminal.inner.outbound.store(None);
    terminal.inner.identity.store(None);
    debug!("link task exiting");
}

/// One connection from handshake to failure or cancellation.
/// `Ok(())` means cancelled.
async fn run_session(
    terminal: &Terminal,
    config: &DeviceConfig,
    cancel: &CancellationToken,
) -> Result<(), CoreError> {
    let inner = &terminal.inner;
    let timing = &inner.timing;
    let url = config.url()?;

    terminal.set_state(ConnectionState::Connecting);
    let transport = TransportConfig {
        connect_timeout: timing.connect_timeout,
        ..TransportConfig::default()
    };

    let mut socket = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        socket = DeviceSocket::connect(&url, &transport) => socket?,
    };
    info!(url = %url, "connected to dispatch server");

    let identity = Arc::new(DeviceIdentity::from_config(config, buson_api::local_ip()));
    socket.send(&identity.hello()).await?;

    // Fresh queue per session so nothing from a previous one leaks in.
    let (tx, mut outbound_rx) = mpsc::channel(timing.outbound_capacity.max(1));
    inner.identity.store(Some(Arc::clone(&identity)));
    inner.outbound.store(Some(Arc::new(tx)));
    terminal.set_state(ConnectionState::Connected);

    let result = session_loop(terminal, &identity, &mut socket, &mut outbound_rx, cancel).await;

    inner.outbound.store(None);
    inner.identity.store(None);
    if result.is_ok() {
        // Cancelled: close politely, but never wait on a dead peer.
        if tokio::time::timeout(timing.connect_timeout, socket.close())
            .await
            .is_err()
        {
            debug!("close handshake timed out");
        }
    }
    result
}

enum Step {
    Stop,
    Send(Outbound),
    Frame(Option<String>),
}

async fn session_loop(
    terminal: &Terminal,
    identity: &DeviceIdentity,
    socket: &mut DeviceSocket,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    cancel: &CancellationToken,
) -> Result<(), CoreError> {
    let inner = &terminal.inner;
    let timing = &inner.timing;
    let mut emitter = TelemetryEmitter::new(timing.telemetry_interval);

    loop {
        let now = Instant::now();
        if let Some(message) = emitter.maybe_send(now, identity, &inner.state.snapshot()) {
            trace!("telemetry");
            socket.send(&message).await?;
        }

        let wait = receive_window(timing.recv_timeout, emitter.remaining(Instant::now()));
        let step = tokio::select! {
            biased;
            () = cancel.cancelled() => Step::Stop,
            // The queue only closes after cancellation.
            queued = outbound_rx.recv() => queued.map_or(Step::Stop, Step::Send),
            frame = socket.recv(wait) => Step::Frame(frame?),
        };

        match step {
            Step::Stop => return Ok(()),
            Step::Send(message) => {
                debug!(kind = message.kind(), "sending queued message");
                socket.send(&message).await?;
            }
            Step::Frame(Some(text)) => handle_frame(terminal, &text),
            Step::Frame(None) => {}
        }
    }
}

fn handle_frame(terminal: &Terminal, text: &str) {
    trace!(frame = %text, "received");
    let Some(message) = InboundMessage::parse(text) else {
        return;
    };

    let outcome = terminal.inner.dispatcher.dispatch(&message, epoch_millis());
    match &outcome {
        Dispatch::Ignored => return,
        Dispatch::RoundTrip { rtt_ms } => terminal.record_rtt(*rtt_ms),
        _ => {}
    }
    let _ = terminal.inner.events.send(TerminalEvent::Inbound(outcome));
}

/// Receive wait: the configured timeout, shortened so the next
/// telemetry message is not held back by an idle socket.
fn receive_window(recv_timeout: Duration, until_telemetry: Duration) -> Duration {
    recv_timeout
        .min(until_telemetry)
        .max(Duration::from_millis(1))
}

/// Returns `true` if cancelled before `duration` elapsed.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SharedConfig;

    fn quick() -> LinkTiming {
        LinkTiming {
            telemetry_interval: Duration::from_millis(50),
            recv_timeout: Duration::from_millis(20),
            reconnect_delay: Duration::from_millis(50),
            config_poll_interval: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(500),
            outbound_capacity: 8,
        }
    }

    #[test]
    fn receive_window_bounds() {
        let recv = Duration::from_millis(200);
        assert_eq!(receive_window(recv, Duration::from_millis(500)), recv);
        assert_eq!(
            receive_window(recv, Duration::from_millis(80)),
            Duration::from_millis(80)
        );
        assert_eq!(receive_window(recv, Duration::ZERO), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn send_while_disconnected_is_dropped() {
        let terminal = Terminal::with_timing(DeviceConfig::default(), quick());
        assert!(!terminal.send_event("door", serde_json::json!({ "state": "open" })));
        assert!(!terminal.respond_to_ride("r-1", true));
        assert_eq!(terminal.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn missing_config_parks_disconnected() {
        let shared = Arc::new(SharedConfig::new(DeviceConfig::default()));
        let terminal = Terminal::with_timing(Arc::clone(&shared), quick());
        terminal.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = terminal.link_status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.last_error.unwrap().contains("not set"));
        assert!(terminal.is_running().await);

        terminal.stop().await;
        assert!(!terminal.is_running().await);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let terminal = Terminal::with_timing(DeviceConfig::default(), quick());
        terminal.start().await.unwrap();
        assert!(matches!(terminal.start().await, Err(CoreError::AlreadyRunning)));

        terminal.stop().await;
        terminal.start().await.unwrap();
        terminal.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let terminal = Terminal::with_timing(DeviceConfig::default(), quick());
        terminal.stop().await;
        terminal.stop().await;
        assert_eq!(terminal.connection_state(), ConnectionState::Disconnected);
    }
}
