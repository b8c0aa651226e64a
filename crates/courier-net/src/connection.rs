//! Connection manager: owns the single transport link and its reconnect loop.
//!
//! The link lives in a dedicated tokio task. [`ConnectionManager`] handles talk
//! to it over a command channel and observe it through a `watch` status and
//! the shared [`Dispatcher`]. Lifecycle events (`connected`, `disconnected`,
//! `error`, `reconnecting`, `maxReconnectAttemptsReached`) are emitted from
//! the task itself, in the order the transitions happen.
//!
//! While a link is open the task writes a `heartbeat` frame on a fixed
//! interval. A write that fails, heartbeat or not, means the link is gone: it
//! is torn down and the reconnect protocol takes over.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use courier_shared::constants::{DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_WS_URL};
use courier_shared::protocol::{ErrorPayload, Frame, RawFrame};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::dispatcher::Dispatcher;
use crate::error::ConnectionError;
use crate::events::{Event, SendFailure};
use crate::transport::{Connector, TransportEvent, TransportLink};

/// Where to connect and how hard to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Full endpoint URL, including any auth query parameters.
    pub url: String,
    pub policy: ReconnectPolicy,
    /// Keep-alive period while open. `None` sends no heartbeats.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            policy: ReconnectPolicy::default(),
            heartbeat_interval: Some(Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    /// Closed, possibly with a reconnect pending.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Retries spent since the last successful open.
    pub reconnect_attempts: u32,
    /// Set once the retry budget ran out; cleared by the next `connect`.
    pub exhausted: bool,
}

#[derive(Debug)]
enum Command {
    Connect(oneshot::Sender<Result<(), ConnectionError>>),
    Send { frame_type: String, text: String },
    Disconnect(oneshot::Sender<()>),
}

/// Handle to the connection task. Clones share the same link.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    dispatcher: Dispatcher,
}

impl ConnectionManager {
    /// Spawn the connection task. Nothing is opened until [`Self::connect`].
    pub fn spawn(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        let driver = Driver {
            config,
            connector,
            dispatcher: dispatcher.clone(),
            commands: cmd_rx,
            status: status_tx,
            link: None,
            pending_open: None,
            waiters: Vec::new(),
            reconnect_timer: None,
            heartbeat: None,
            attempts: 0,
            manual_close: false,
            exhausted: false,
        };
        tokio::spawn(driver.run());

        Self {
            commands: cmd_tx,
            status: status_rx,
            dispatcher,
        }
    }

    /// Open the link, or join the attempt already in flight.
    ///
    /// Resolves once the link is open or the attempt failed. A failed attempt
    /// still schedules automatic retries in the background.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect(tx))
            .map_err(|_| ConnectionError::Shutdown)?;
        rx.await.map_err(|_| ConnectionError::Shutdown)?
    }

    /// Close the link and stop every pending retry. No-op when already closed.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Send a typed frame. Returns `false`, and emits a `warning` event,
    /// when the link is not open.
    ///
    /// `true` only means the frame was queued for the link. If the link turns
    /// out to be dead when the frame reaches it, a `send_failed` event carries
    /// the encoded frame back.
    pub fn send(&self, frame: &Frame) -> bool {
        match frame.to_json() {
            Ok(text) => self.send_text(frame.frame_type(), text),
            Err(e) => {
                warn!(frame_type = frame.frame_type(), error = %e, "Failed to encode frame");
                false
            }
        }
    }

    /// Send an arbitrary `{type, payload}` envelope.
    pub fn send_raw(&self, frame_type: &str, payload: Value) -> bool {
        match RawFrame::new(frame_type, payload).to_json() {
            Ok(text) => self.send_text(frame_type, text),
            Err(e) => {
                warn!(frame_type, error = %e, "Failed to encode frame");
                false
            }
        }
    }

    fn send_text(&self, frame_type: &str, text: String) -> bool {
        if !self.is_connected() {
            warn!(frame_type, "Dropping frame: connection is not open");
            self.dispatcher.emit(&Event::Warning {
                message: format!("Cannot send {frame_type}: connection is not open"),
            });
            return false;
        }
        self.commands
            .send(Command::Send {
                frame_type: frame_type.to_string(),
                text,
            })
            .is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().state == ConnectionState::Open
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

type OpenFuture = BoxFuture<'static, Result<TransportLink, ConnectionError>>;

struct Driver {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    link: Option<TransportLink>,
    pending_open: Option<OpenFuture>,
    waiters: Vec<oneshot::Sender<Result<(), ConnectionError>>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    attempts: u32,
    manual_close: bool,
    exhausted: bool,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        debug!("All connection handles dropped, stopping");
                        break;
                    }
                },

                result = wait_open(&mut self.pending_open) => {
                    self.pending_open = None;
                    self.on_open_result(result);
                }

                () = wait_timer(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    info!(attempt = self.attempts, "Reconnecting");
                    self.start_open();
                }

                () = wait_heartbeat(&mut self.heartbeat) => self.send_heartbeat(),

                event = next_event(&mut self.link) => self.on_transport_event(event),
            }
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => {
                let state = self.status.borrow().state;
                match state {
                    ConnectionState::Open => {
                        let _ = reply.send(Ok(()));
                    }
                    ConnectionState::Connecting => self.waiters.push(reply),
                    _ => {
                        self.manual_close = false;
                        self.exhausted = false;
                        self.attempts = 0;
                        self.reconnect_timer = None;
                        self.waiters.push(reply);
                        self.start_open();
                    }
                }
            }
            Command::Send { frame_type, text } => {
                let had_link = self.link.is_some();
                let sent = self
                    .link
                    .as_ref()
                    .is_some_and(|link| link.send(text.clone()));
                if sent {
                    debug!(frame_type = %frame_type, "Frame sent");
                    return;
                }

                warn!(frame_type = %frame_type, "Frame not written: link closed before write");
                self.dispatcher
                    .emit(&Event::SendFailed(SendFailure { frame_type, text }));
                if had_link {
                    self.link_lost(Some("write failed".to_string()));
                }
            }
            Command::Disconnect(ack) => {
                self.close_by_request();
                let _ = ack.send(());
            }
        }
    }

    fn start_open(&mut self) {
        let connector = self.connector.clone();
        let url = self.config.url.clone();
        debug!(url = %url, "Opening transport");
        self.pending_open = Some(Box::pin(async move { connector.open(&url).await }));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_open_result(&mut self, result: Result<TransportLink, ConnectionError>) {
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.attempts = 0;
                self.heartbeat = self.config.heartbeat_interval.map(|period| {
                    let mut ticks = interval_at(Instant::now() + period, period);
                    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticks
                });
                self.set_state(ConnectionState::Open);
                info!(url = %self.config.url, "Connected");
                self.dispatcher.emit(&Event::Connected);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                warn!(url = %self.config.url, error = %e, "Connection attempt failed");
                self.set_state(ConnectionState::Closed);
                self.dispatcher.emit(&Event::Error(ErrorPayload {
                    code: Some("connection".to_string()),
                    message: e.to_string(),
                }));
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(e.clone()));
                }
                self.schedule_reconnect();
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => self.route_inbound(&text),
            TransportEvent::Closed { reason } => {
                info!(reason = ?reason, "Transport closed by remote");
                self.link_lost(reason);
            }
            TransportEvent::Failed(reason) => {
                warn!(reason = %reason, "Transport failed");
                self.link_lost(Some(reason));
            }
        }
    }

    fn route_inbound(&self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed inbound frame");
                return;
            }
        };
        match Event::from_frame(frame) {
            Some(event) => {
                debug!(event = %event.kind(), "Inbound frame");
                self.dispatcher.emit(&event);
            }
            None => debug!("Ignoring lifecycle frame from remote"),
        }
    }

    fn send_heartbeat(&mut self) {
        let Some(link) = self.link.as_ref() else {
            self.heartbeat = None;
            return;
        };
        let written = match Frame::Heartbeat.to_json() {
            Ok(text) => link.send(text),
            Err(e) => {
                warn!(error = %e, "Failed to encode heartbeat");
                return;
            }
        };
        if written {
            debug!("Heartbeat sent");
        } else {
            warn!("Heartbeat write failed, dropping link");
            self.link_lost(Some("heartbeat failed".to_string()));
        }
    }

    fn link_lost(&mut self, reason: Option<String>) {
        self.link = None;
        self.heartbeat = None;
        self.set_state(ConnectionState::Closed);
        self.dispatcher.emit(&Event::Disconnected { reason });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.manual_close || self.exhausted {
            return;
        }

        let next = self.attempts + 1;
        if !self.config.policy.allows(next) {
            self.exhausted = true;
            self.publish_status();
            warn!(attempts = self.attempts, "Max reconnect attempts reached");
            self.dispatcher.emit(&Event::MaxReconnectAttemptsReached {
                attempts: self.attempts,
            });
            return;
        }

        self.attempts = next;
        let delay = self.config.policy.delay_for(next);
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
        self.publish_status();
        info!(attempt = next, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.dispatcher.emit(&Event::Reconnecting {
            attempt: next,
            delay,
        });
    }

    fn close_by_request(&mut self) {
        self.manual_close = true;
        self.reconnect_timer = None;
        if self.pending_open.take().is_some() {
            debug!("Cancelled in-flight connection attempt");
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ConnectionError::Cancelled));
        }

        let was_open = self.link.is_some();
        if was_open {
            self.set_state(ConnectionState::Closing);
        }
        // Dropping the link stops its writer, which closes the socket.
        self.link = None;
        self.heartbeat = None;
        self.set_state(ConnectionState::Closed);

        if was_open {
            info!("Disconnected by client");
            self.dispatcher.emit(&Event::Disconnected {
                reason: Some("client disconnect".to_string()),
            });
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.status.send_modify(|s| s.state = state);
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.send_modify(|s| {
            s.reconnect_attempts = self.attempts;
            s.exhausted = self.exhausted;
        });
    }
}

async fn wait_open(pending_open: &mut Option<OpenFuture>) -> Result<TransportLink, ConnectionError> {
    match pending_open {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(t) => t.as_mut().await,
        None => pending().await,
    }
}

async fn wait_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticks) => {
            ticks.tick().await;
        }
        None => pending().await,
    }
}

async fn next_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use courier_shared::protocol::TypingPayload;
    use courier_shared::types::{ChatId, UserId};

    use crate::events::EventKind;
    use crate::memory::MemoryConnector;

    fn setup() -> (ConnectionManager, MemoryConnector) {
        setup_with_heartbeat(None)
    }

    fn setup_with_heartbeat(
        heartbeat_interval: Option<Duration>,
    ) -> (ConnectionManager, MemoryConnector) {
        let connector = MemoryConnector::new();
        let manager = ConnectionManager::spawn(
            ConnectionConfig {
                url: "mem://courier".to_string(),
                policy: ReconnectPolicy::default(),
                heartbeat_interval,
            },
            Arc::new(connector.clone()),
            Dispatcher::new(),
        );
        (manager, connector)
    }

    fn collect(manager: &ConnectionManager, kind: EventKind) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _sub = manager.dispatcher().subscribe(kind, move |event| {
            let _ = tx.send(event.clone());
            Ok(())
        });
        rx
    }

    fn typing_frame() -> Frame {
        Frame::Typing(TypingPayload {
            chat_id: ChatId::new(),
            user_id: UserId::new("bob"),
            is_typing: true,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_emits_connected_and_sends() {
        let (manager, connector) = setup();
        let mut connected = collect(&manager, EventKind::Connected);

        manager.connect().await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(connected.recv().await, Some(Event::Connected));

        let mut peer = connector.accept().await;
        assert!(manager.send(&typing_frame()));
        let text = peer.next_text().await.unwrap();
        assert!(text.contains(r#""type":"typing""#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent_while_open() {
        let (manager, connector) = setup();
        let mut connected = collect(&manager, EventKind::Connected);

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(connector.attempt_count(), 1);
        assert!(connected.recv().await.is_some());
        assert!(connected.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_share_one_attempt() {
        let (manager, connector) = setup();
        connector.set_open_delay(Duration::from_millis(500));

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(connector.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_five_linear_retries() {
        let (manager, connector) = setup();
        connector.refuse_all(true);
        let mut reconnecting = collect(&manager, EventKind::Reconnecting);
        let mut exhausted = collect(&manager, EventKind::MaxReconnectAttemptsReached);

        assert!(manager.connect().await.is_err());
        assert_eq!(
            exhausted.recv().await,
            Some(Event::MaxReconnectAttemptsReached { attempts: 5 })
        );

        // Initial attempt plus five retries.
        let times = connector.attempt_times();
        assert_eq!(times.len(), 6);
        for (n, pair) in times.windows(2).enumerate() {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(3000 * (n as u64 + 1)), "gap {n}: {gap:?}");
        }

        let mut delays = Vec::new();
        while let Ok(Event::Reconnecting { attempt, delay }) = reconnecting.try_recv() {
            delays.push((attempt, delay.as_millis() as u64));
        }
        assert_eq!(
            delays,
            vec![(1, 3000), (2, 6000), (3, 9000), (4, 12000), (5, 15000)]
        );

        // Nothing else is attempted afterwards.
        sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempt_count(), 6);
        assert!(exhausted.try_recv().is_err());
        assert!(manager.status().exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_connect_after_exhaustion_starts_fresh() {
        let (manager, connector) = setup();
        let mut exhausted = collect(&manager, EventKind::MaxReconnectAttemptsReached);
        connector.refuse_all(true);
        let _ = manager.connect().await;
        exhausted.recv().await.unwrap();

        connector.refuse_all(false);
        manager.connect().await.unwrap();
        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Open);
        assert_eq!(status.reconnect_attempts, 0);
        assert!(!status.exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_reconnects_and_resets_budget() {
        let (manager, connector) = setup();
        let mut connected = collect(&manager, EventKind::Connected);
        let mut disconnected = collect(&manager, EventKind::Disconnected);
        let mut reconnecting = collect(&manager, EventKind::Reconnecting);

        manager.connect().await.unwrap();
        connected.recv().await.unwrap();
        connector.accept().await.close(Some("server restart"));

        assert_eq!(
            disconnected.recv().await,
            Some(Event::Disconnected {
                reason: Some("server restart".into())
            })
        );
        assert_eq!(
            reconnecting.recv().await,
            Some(Event::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(3000)
            })
        );

        let peer = connector.accept().await;
        connected.recv().await.unwrap();
        assert_eq!(manager.status().reconnect_attempts, 0);

        // A second drop starts again at the first delay.
        peer.fail("reset by peer");
        assert_eq!(
            reconnecting.recv().await,
            Some(Event::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(3000)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (manager, connector) = setup();
        let mut reconnecting = collect(&manager, EventKind::Reconnecting);

        manager.connect().await.unwrap();
        connector.accept().await.fail("network down");
        reconnecting.recv().await.unwrap();

        manager.disconnect().await;
        sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(manager.status().state, ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_open_cancels_it() {
        let (manager, connector) = setup();
        connector.set_open_delay(Duration::from_secs(2));
        let mut connected = collect(&manager, EventKind::Connected);

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect().await })
        };
        sleep(Duration::from_millis(100)).await;
        manager.disconnect().await;

        assert_eq!(pending.await.unwrap(), Err(ConnectionError::Cancelled));
        sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempt_count(), 1);
        assert!(connected.try_recv().is_err());
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_when_open_emits_once() {
        let (manager, connector) = setup();
        let mut disconnected = collect(&manager, EventKind::Disconnected);

        manager.connect().await.unwrap();
        let mut peer = connector.accept().await;
        manager.disconnect().await;
        manager.disconnect().await;

        assert!(disconnected.recv().await.is_some());
        assert!(disconnected.try_recv().is_err());
        assert!(peer.next_text().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frames_are_routed_and_garbage_dropped() {
        let (manager, connector) = setup();
        let mut typing = collect(&manager, EventKind::Typing);
        let mut connected = collect(&manager, EventKind::Connected);

        manager.connect().await.unwrap();
        let peer = connector.accept().await;

        peer.push_text("not json");
        peer.push_text(r#"{"type":"poke","payload":{}}"#);
        peer.push_text(r#"{"type":"connected"}"#);
        peer.push(&typing_frame());

        assert!(matches!(typing.recv().await, Some(Event::Typing(_))));
        connected.recv().await.unwrap();
        assert!(connected.try_recv().is_err());
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_warns() {
        let (manager, _connector) = setup();
        let mut warnings = collect(&manager, EventKind::Warning);

        assert!(!manager.send(&typing_frame()));
        assert!(!manager.send_raw("typing", serde_json::json!({})));
        assert!(matches!(warnings.recv().await, Some(Event::Warning { .. })));
        assert!(matches!(warnings.recv().await, Some(Event::Warning { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_only_while_open() {
        let (manager, connector) = setup_with_heartbeat(Some(Duration::from_secs(10)));
        manager.connect().await.unwrap();
        let mut peer = connector.accept().await;

        sleep(Duration::from_secs(25)).await;
        for _ in 0..2 {
            let text = peer.next_text().await.unwrap();
            assert_eq!(Frame::parse(&text).unwrap(), Frame::Heartbeat);
        }
        assert!(peer.try_next_text().is_none());

        manager.disconnect().await;
        sleep(Duration::from_secs(60)).await;
        assert!(peer.next_text().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_writer_is_detected_by_heartbeat() {
        let (manager, connector) = setup_with_heartbeat(Some(Duration::from_secs(10)));
        let mut connected = collect(&manager, EventKind::Connected);
        let mut disconnected = collect(&manager, EventKind::Disconnected);

        manager.connect().await.unwrap();
        connected.recv().await.unwrap();
        // The remote stops reading but never reports a close.
        let mut peer = connector.accept().await;
        peer.stop_reading();

        assert_eq!(
            disconnected.recv().await,
            Some(Event::Disconnected {
                reason: Some("heartbeat failed".into())
            })
        );
        connected.recv().await.unwrap();
        assert_eq!(connector.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_on_dead_link_reports_frame_back() {
        let (manager, connector) = setup();
        let mut failed = collect(&manager, EventKind::SendFailed);
        let mut disconnected = collect(&manager, EventKind::Disconnected);

        manager.connect().await.unwrap();
        drop(connector.accept().await);
        let mut connected = collect(&manager, EventKind::Connected);

        // The driver has not seen the drop yet, so the frame is accepted.
        let frame = typing_frame();
        assert!(manager.send(&frame));

        match failed.recv().await {
            Some(Event::SendFailed(failure)) => {
                assert_eq!(failure.frame_type, "typing");
                assert_eq!(Frame::parse(&failure.text).unwrap(), frame);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(disconnected.recv().await.is_some());
        connected.recv().await.unwrap();
        assert!(manager.is_connected());
    }
}
