//! Connection state machine
//!
//! A `Link` owns one channel adapter and runs its lifecycle: opening
//! (with per-kind Starting/Connecting/Listening phases), the read task
//! feeding the event serializer, reconnect with configurable backoff on
//! transient loss, and teardown. The read task is the only code touching
//! the channel's receive side; callers interact through `send`, `stop`
//! and the state accessors.
//!
//! `send` never blocks on a reconnect in progress: anything but the
//! Opened state fails fast with `NotConnected`.

use crate::core::events::{Direction, EventSink, IoActivity};
use crate::core::flow::FlowGate;
use crate::core::transport::{
    build_channel, Channel, Endpoint, OpeningPhase, SocketRole, TransportError, TransportKind,
    TransportStats,
};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Created, not yet started an attempt
    Reset,
    /// Acquiring a local device/socket
    Starting,
    /// Outbound connect in progress
    Connecting,
    /// Waiting for an inbound peer
    Listening,
    /// Open for I/O
    Opened,
    /// Stop requested, teardown in progress
    Stopping,
    /// Closed; no further attempts
    Closed,
    /// Failed terminally (fatal configuration error or retries exhausted)
    Error,
}

impl LinkState {
    /// Whether the link accepts `send` calls.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Opened)
    }

    /// Whether the state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reset => "reset",
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Opened => "opened",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Reconnect policy applied on transient loss and failed open attempts.
///
/// A multiplier of 1.0 gives a fixed retry interval; larger values give
/// exponential backoff capped at `max_delay`. `max_attempts` of 0 means
/// unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Whether to retry at all
    pub enabled: bool,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the backoff curve
    pub max_delay: Duration,
    /// Per-attempt delay multiplier
    pub backoff_multiplier: f32,
    /// Maximum consecutive attempts (0 = unbounded)
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the attempt bound.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay before the given (1-based) attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = f64::from(self.backoff_multiplier.max(1.0)).powi(exponent as i32);
        let scaled = self.initial_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// One logical connection over one channel adapter.
pub struct Link {
    state: Arc<RwLock<LinkState>>,
    last_error: Arc<RwLock<Option<String>>>,
    channel: Arc<tokio::sync::Mutex<Box<dyn Channel>>>,
    flow: Arc<Mutex<FlowGate>>,
    events: EventSink,
    stop_tx: watch::Sender<bool>,
    kind: TransportKind,
}

impl Link {
    /// Build the channel and spawn its lifecycle task.
    ///
    /// Configuration errors surface here, once, without retry. The
    /// connection attempt itself runs asynchronously; progress arrives
    /// as `Opened`/`Closed`/`IoError` activities on the event sink and
    /// through [`state`](Self::state).
    pub fn start(
        endpoint: Endpoint,
        policy: ReconnectPolicy,
        flow_control: bool,
        events: EventSink,
    ) -> Result<Arc<Self>, TransportError> {
        let channel = build_channel(endpoint)?;
        let kind = channel.kind();
        let (stop_tx, stop_rx) = watch::channel(false);

        let link = Arc::new(Self {
            state: Arc::new(RwLock::new(LinkState::Reset)),
            last_error: Arc::new(RwLock::new(None)),
            channel: Arc::new(tokio::sync::Mutex::new(channel)),
            flow: Arc::new(Mutex::new(FlowGate::new(flow_control))),
            events,
            stop_tx,
            kind,
        });

        let runner = link.clone();
        tokio::spawn(async move { runner.run(policy, stop_rx).await });
        Ok(link)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    /// Last transport error observed, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Transport kind of the underlying channel.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Bytes currently held back by the flow gate.
    pub fn flow_pending(&self) -> usize {
        self.flow.lock().pending()
    }

    /// Human-readable endpoint description.
    pub async fn peer_info(&self) -> String {
        self.channel.lock().await.peer_info()
    }

    /// Channel counters since the last open.
    pub async fn stats(&self) -> TransportStats {
        self.channel.lock().await.stats()
    }

    /// Negotiated socket role, for auto-sockets.
    pub async fn role(&self) -> Option<SocketRole> {
        self.channel.lock().await.role()
    }

    /// Send bytes through the flow gate to the channel.
    ///
    /// Fails fast with `NotConnected` unless the link is Opened, so a
    /// caller never blocks on a reconnect in progress. Returns the byte
    /// count actually handed to the channel; bytes held by the flow gate
    /// count as accepted and go out on release.
    pub async fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.state().can_send() {
            return Err(TransportError::NotConnected);
        }
        let release = self.flow.lock().filter_outbound(data);
        if release.is_empty() {
            return Ok(0);
        }
        self.send_now(&release).await
    }

    /// Request teardown. Idempotent; repeated calls are no-ops. The
    /// lifecycle task delivers the final `Closed` activity exactly once.
    pub fn stop(&self) {
        if *self.stop_tx.borrow() {
            return;
        }
        let _ = self.stop_tx.send(true);
    }

    /// Poll until the link reaches `target` or the timeout elapses.
    pub async fn wait_for_state(&self, target: LinkState, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.state() == target {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.state() == target
    }

    async fn send_now(&self, data: &[u8]) -> Result<usize, TransportError> {
        let sent = {
            let mut channel = self.channel.lock().await;
            channel.send(data).await?
        };
        // Tx activity is sequenced at the moment bytes hit the wire so
        // the display mirrors actual transmit order.
        self.events
            .submit(Direction::Tx, IoActivity::Data(Bytes::copy_from_slice(data)));
        Ok(sent)
    }

    fn set_state(&self, state: LinkState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(kind = %self.kind, from = %*current, to = %state, "link state");
            *current = state;
        }
    }

    fn record_error(&self, error: &TransportError) {
        *self.last_error.write() = Some(error.to_string());
    }

    async fn run(self: Arc<Self>, policy: ReconnectPolicy, mut stop_rx: watch::Receiver<bool>) {
        let mut attempts: u32 = 0;

        'lifecycle: loop {
            // Opening phase
            loop {
                if *stop_rx.borrow() {
                    break 'lifecycle;
                }

                let phase = { self.channel.lock().await.opening_phase() };
                self.set_state(match phase {
                    OpeningPhase::Starting => LinkState::Starting,
                    OpeningPhase::Connecting => LinkState::Connecting,
                    OpeningPhase::Listening => LinkState::Listening,
                });

                let result = { self.channel.lock().await.open().await };
                match result {
                    Ok(()) => {
                        attempts = 0;
                        self.flow.lock().reset();
                        self.set_state(LinkState::Opened);
                        self.events.submit(Direction::Rx, IoActivity::Opened);
                        let peer = self.peer_info().await;
                        info!(kind = %self.kind, peer = %peer, "link opened");
                        break;
                    }
                    Err(e) if e.is_fatal() => {
                        warn!(kind = %self.kind, error = %e, "fatal open failure");
                        self.record_error(&e);
                        self.events
                            .submit(Direction::Rx, IoActivity::IoError(e.to_string()));
                        self.set_state(LinkState::Error);
                        return;
                    }
                    Err(e) => {
                        attempts += 1;
                        self.record_error(&e);
                        warn!(kind = %self.kind, attempt = attempts, error = %e, "open failed");

                        if !policy.enabled
                            || (policy.max_attempts > 0 && attempts >= policy.max_attempts)
                        {
                            self.events
                                .submit(Direction::Rx, IoActivity::IoError(e.to_string()));
                            self.set_state(LinkState::Error);
                            return;
                        }

                        let delay = policy.delay_for(attempts);
                        tokio::select! {
                            _ = stop_rx.changed() => {}
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }

            // Read phase: sole producer of this link's Rx activity
            loop {
                if *stop_rx.borrow() {
                    break 'lifecycle;
                }

                let result = { self.channel.lock().await.recv().await };
                match result {
                    Ok(Some(bytes)) => {
                        let released = self.flow.lock().observe_inbound(&bytes);
                        self.events.submit(Direction::Rx, IoActivity::Data(bytes));
                        if let Some(release) = released {
                            if let Err(e) = self.send_now(&release).await {
                                warn!(error = %e, "failed to flush flow-gated bytes");
                            }
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = stop_rx.changed() => {}
                            () = tokio::time::sleep(Duration::from_millis(10)) => {}
                        }
                    }
                    Err(e) => {
                        let fatal = e.is_fatal();
                        let orderly = matches!(e, TransportError::Disconnected);
                        self.record_error(&e);
                        if orderly {
                            info!(kind = %self.kind, "remote closed the connection");
                        } else {
                            warn!(kind = %self.kind, error = %e, "receive failed");
                            self.events
                                .submit(Direction::Rx, IoActivity::IoError(e.to_string()));
                        }
                        self.events.submit(Direction::Rx, IoActivity::Closed);

                        {
                            let mut channel = self.channel.lock().await;
                            let _ = channel.close().await;
                        }

                        if policy.enabled && !fatal {
                            self.set_state(LinkState::Reset);
                            continue 'lifecycle;
                        }
                        self.set_state(if fatal { LinkState::Error } else { LinkState::Closed });
                        return;
                    }
                }
            }
        }

        // Stop requested: tear down and deliver the final Closed once.
        self.set_state(LinkState::Stopping);
        let was_open = {
            let mut channel = self.channel.lock().await;
            let open = channel.is_open();
            let _ = channel.close().await;
            open
        };
        if was_open {
            self.events.submit(Direction::Rx, IoActivity::Closed);
        }
        self.set_state(LinkState::Closed);
        info!(kind = %self.kind, "link stopped");
    }
}
