//! Connection manager.
//!
//! [`BridgeConnection`] owns the socket to one rosbridge server.  It is driven
//! by two threads of control:
//!
//! * a **network thread**, started by [`BridgeConnection::connect`], that opens
//!   the WebSocket, replays the [`TopicRegistry`] as `subscribe` / `advertise`
//!   frames, then decodes every inbound frame into the dispatch queue or the
//!   service response cell.  It is the only writer on the socket: outbound
//!   frames reach it over a channel.
//! * the **consumer thread** (the embedding application's main loop), which
//!   calls [`BridgeConnection::drain_one`] once per tick and runs the pending
//!   callback on its own stack.
//!
//! # Lifecycle
//!
//! ```text
//!                 connect()               socket open
//! Disconnected ─────────────> Connecting ─────────────> Connected
//!      ^                          │                         │
//!      │     open failed /        │ disconnect()            │ disconnect()
//!      │     server closed        v                         v
//!      └──────────────────── Disconnecting <────────────────┘
//! ```
//!
//! There is no automatic reconnect; call `connect` again after the
//! connection drops.  `connect` and `disconnect` take `&mut self`, so they
//! cannot race each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures_util::{Sink, SinkExt, StreamExt};
use rosbridge_types::{BridgeError, RosMessage, Topic};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

use crate::codec::{CodecError, Frame, decode_frame};
use crate::dispatch::{DispatchQueue, LatestValue, PendingTask};
use crate::registry::{Advertisement, Subscription, TopicRegistry};
use crate::service::{self, CallId, ServiceResponse, ServiceResponseCell};

/// Default rosbridge server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default rosbridge WebSocket port.
pub const DEFAULT_PORT: u16 = 9090;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const NETWORK_THREAD_NAME: &str = "rosbridge-net";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where and how to reach the rosbridge server.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Host name or address, optionally prefixed with `ws://` / `wss://`.
    pub host: String,
    pub port: u16,
    /// Upper bound on opening the socket.
    pub connect_timeout: Duration,
    /// Upper bound on `disconnect` waiting for the network thread.
    pub shutdown_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// WebSocket URL of the server, e.g. `ws://localhost:9090`.
    pub fn url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("ws://") || host.starts_with("wss://") {
            format!("{host}:{}", self.port)
        } else {
            format!("ws://{host}:{}", self.port)
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle state
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Lifecycle state shared between the consumer and one network session.
///
/// Each session gets its own cell, so a detached session that outlives its
/// `disconnect` can never clobber the state of a newer one.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The session ended on its own.  Leaves `Disconnecting` alone: the
    /// consumer's `disconnect` owns that transition.
    fn settle(&self) {
        if !self.transition(ConnectionState::Connected, ConnectionState::Disconnected) {
            self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
        }
    }
}

/// How a call to [`BridgeConnection::disconnect`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// There was no live connection; nothing was sent.
    Idle,
    /// Teardown frames were flushed and the network thread exited in time.
    Clean,
    /// The network thread did not exit within the shutdown timeout and was
    /// detached.  The connection is still logically closed.
    TimedOut,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound routing
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the network thread hands to the consumer.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    pub(crate) queue: DispatchQueue,
    pub(crate) service: ServiceResponseCell,
    pub(crate) failure: LatestValue<BridgeError>,
}

/// What happened to one inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
    Queued { replaced: bool },
    Unroutable,
    ServiceResponse,
    Ignored,
    Dropped,
}

/// Decode one inbound frame and stage its result for the consumer.
pub(crate) fn route_inbound(text: &str, registry: &TopicRegistry, inbox: &Inbox) -> Routed {
    let frame = match decode_frame(text) {
        Ok(frame) => frame,
        Err(CodecError::UnknownOp(op)) => {
            warn!(op = %op, "ignoring frame with unsupported op");
            return Routed::Ignored;
        }
        Err(e) => {
            warn!(error = %e, "dropping inbound frame");
            return Routed::Dropped;
        }
    };

    match frame {
        Frame::Publish { topic, msg } => {
            let Some(subscription) = registry.subscription(&topic) else {
                trace!(topic = %topic, "no subscriber for topic");
                return Routed::Unroutable;
            };
            match PendingTask::decode(Arc::clone(subscription), &msg) {
                Ok(task) => Routed::Queued {
                    replaced: inbox.queue.enqueue_task(task),
                },
                Err(e) => {
                    warn!(topic = %topic, error = %e, "dropping undecodable payload");
                    Routed::Dropped
                }
            }
        }
        Frame::ServiceResponse {
            service,
            values,
            id,
            result,
        } => {
            debug!(service = %service, "service response received");
            inbox
                .service
                .store(ServiceResponse::new(service, values, id, result));
            Routed::ServiceResponse
        }
        other => {
            warn!(op = other.op(), "ignoring client-side op sent by server");
            Routed::Ignored
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BridgeConnection
// ─────────────────────────────────────────────────────────────────────────────

enum Outbound {
    Frame(String),
    Shutdown,
}

/// Consumer-side handle on a running network session.
struct Worker {
    state: Arc<StateCell>,
    outbound: mpsc::UnboundedSender<Outbound>,
    finished: std_mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn join(self) {
        if self.handle.join().is_err() {
            error!("rosbridge network thread panicked");
        }
    }
}

/// A client connection to one rosbridge server.
///
/// Register subscribers and publishers first, then [`connect`].  Drive
/// inbound delivery by calling [`drain_one`] once per application tick.
///
/// ```rust,no_run
/// use rosbridge_client::{BridgeConfig, BridgeConnection};
/// use rosbridge_types::Topic;
/// use rosbridge_types::geometry_msgs::Twist;
/// use rosbridge_types::std_msgs::StringMsg;
///
/// let mut bridge = BridgeConnection::new(BridgeConfig::new("robot.local", 9090));
/// bridge
///     .add_subscriber(&Topic::<StringMsg>::new("/ultrasonic_data"), |msg| {
///         println!("ultrasound: {}", msg.data);
///     })
///     .unwrap();
/// let cmd_vel = Topic::<Twist>::new("/cmd_vel");
/// bridge.add_publisher(&cmd_vel).unwrap();
/// bridge.connect().unwrap();
///
/// loop {
///     bridge.drain_one();
///     let _ = bridge.publish_to(&cmd_vel, &Twist::drive(0.2, 0.0));
/// #   break;
/// }
/// ```
///
/// [`connect`]: BridgeConnection::connect
/// [`drain_one`]: BridgeConnection::drain_one
pub struct BridgeConnection {
    config: BridgeConfig,
    registry: Arc<TopicRegistry>,
    /// Set by the first `connect`; registration is closed from then on.
    sealed: bool,
    inbox: Arc<Inbox>,
    worker: Option<Worker>,
}

impl BridgeConnection {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            registry: Arc::new(TopicRegistry::new()),
            sealed: false,
            inbox: Arc::new(Inbox::default()),
            worker: None,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration (before connect only)
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to `topic`; `callback` runs on the thread that calls
    /// [`drain_one`][Self::drain_one].
    ///
    /// # Errors
    ///
    /// [`BridgeError::RegistrationAfterConnect`] once `connect` has been
    /// called, [`BridgeError::DuplicateTopic`] if already subscribed.
    pub fn add_subscriber<M, F>(
        &mut self,
        topic: &Topic<M>,
        callback: F,
    ) -> Result<(), BridgeError>
    where
        M: RosMessage,
        F: FnMut(M) + Send + 'static,
    {
        self.add_subscription(Subscription::new(topic, callback))
    }

    pub fn add_subscription(&mut self, subscription: Subscription) -> Result<(), BridgeError> {
        self.registry_mut()?.add_subscription(subscription)
    }

    /// Advertise `topic` so messages can be published on it.
    ///
    /// # Errors
    ///
    /// Same as [`add_subscriber`][Self::add_subscriber].
    pub fn add_publisher<M: RosMessage>(&mut self, topic: &Topic<M>) -> Result<(), BridgeError> {
        self.registry_mut()?
            .add_advertisement(Advertisement::new(topic))
    }

    fn registry_mut(&mut self) -> Result<&mut TopicRegistry, BridgeError> {
        if self.sealed {
            return Err(BridgeError::RegistrationAfterConnect);
        }
        Arc::get_mut(&mut self.registry).ok_or(BridgeError::RegistrationAfterConnect)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the network thread and begin connecting.
    ///
    /// Returns as soon as the thread is running.  Opening the socket happens
    /// in the background; a failure is logged, kept for
    /// [`take_connection_error`][Self::take_connection_error], and the state
    /// returns to [`ConnectionState::Disconnected`].  Use
    /// [`wait_until_connected`][Self::wait_until_connected] to block until the
    /// handshake has been sent.
    ///
    /// # Errors
    ///
    /// [`BridgeError::AlreadyConnected`] if a session is still live, or
    /// [`BridgeError::Spawn`] if the thread could not be started.
    pub fn connect(&mut self) -> Result<(), BridgeError> {
        self.reap_worker();
        if self.worker.is_some() {
            return Err(BridgeError::AlreadyConnected);
        }
        self.sealed = true;
        self.inbox.failure.take();

        let url = self.config.url();
        let state = Arc::new(StateCell::new(ConnectionState::Connecting));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = std_mpsc::channel();
        let session = Session {
            url: url.clone(),
            connect_timeout: self.config.connect_timeout,
            registry: Arc::clone(&self.registry),
            inbox: Arc::clone(&self.inbox),
            state: Arc::clone(&state),
            outbound: outbound_rx,
        };

        let handle = thread::Builder::new()
            .name(NETWORK_THREAD_NAME.to_string())
            .spawn(move || {
                session.run();
                let _ = finished_tx.send(());
            })
            .map_err(|e| BridgeError::Spawn(e.to_string()))?;

        info!(url = %url, "connecting to rosbridge server");
        self.worker = Some(Worker {
            state,
            outbound: outbound_tx,
            finished: finished_rx,
            handle,
        });
        Ok(())
    }

    /// Close the connection.
    ///
    /// If a session is live, the network thread sends `unsubscribe` /
    /// `unadvertise` frames for the whole registry, closes the socket, and
    /// exits; this call waits up to the configured shutdown timeout for it.
    /// Without a live session this is a no-op returning
    /// [`DisconnectOutcome::Idle`].  Either way the connection is closed when
    /// this returns.
    pub fn disconnect(&mut self) -> DisconnectOutcome {
        let Some(worker) = self.worker.take() else {
            return DisconnectOutcome::Idle;
        };

        let was_live = matches!(
            worker.state.load(),
            ConnectionState::Connecting | ConnectionState::Connected
        );
        worker.state.store(ConnectionState::Disconnecting);
        let _ = worker.outbound.send(Outbound::Shutdown);

        match worker.finished.recv_timeout(self.config.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                worker.state.store(ConnectionState::Disconnected);
                worker.join();
                if was_live {
                    info!(url = %self.config.url(), "disconnected from rosbridge server");
                    DisconnectOutcome::Clean
                } else {
                    DisconnectOutcome::Idle
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                worker.state.store(ConnectionState::Disconnected);
                warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "network thread did not stop in time; detaching it"
                );
                DisconnectOutcome::TimedOut
            }
        }
    }

    /// Join a session that already ended on its own (failed open, server
    /// closed the socket) so `connect` can start a fresh one.
    fn reap_worker(&mut self) {
        let finished = self.worker.as_ref().is_some_and(|w| {
            w.state.load() == ConnectionState::Disconnected
                || !matches!(w.finished.try_recv(), Err(TryRecvError::Empty))
        });
        if finished {
            if let Some(worker) = self.worker.take() {
                worker.join();
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.worker
            .as_ref()
            .map_or(ConnectionState::Disconnected, |w| w.state.load())
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Block until the session is connected, the attempt fails, or `timeout`
    /// elapses.  Returns whether the connection is up.
    pub fn wait_until_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                ConnectionState::Connected => return true,
                ConnectionState::Connecting if Instant::now() < deadline => {
                    thread::sleep(CONNECT_POLL_INTERVAL);
                }
                _ => return false,
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────────

    fn connected_worker(&self) -> Result<&Worker, BridgeError> {
        self.worker
            .as_ref()
            .filter(|w| w.state.load() == ConnectionState::Connected)
            .ok_or(BridgeError::NotConnected)
    }

    fn send(&self, frame: Frame) -> Result<(), BridgeError> {
        let worker = self.connected_worker()?;
        let text = frame.encode()?;
        worker
            .outbound
            .send(Outbound::Frame(text))
            .map_err(|_| BridgeError::NotConnected)
    }

    /// Publish `message` on an advertised `topic`.
    ///
    /// Fire-and-forget: success means the frame was handed to the network
    /// thread, not that the server received it.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotConnected`] unless connected (nothing is written),
    /// [`BridgeError::UnknownTopic`] if `topic` was not advertised,
    /// [`BridgeError::TypeMismatch`] if `M` is not the advertised type.
    pub fn publish<M: RosMessage>(&self, topic: &str, message: &M) -> Result<(), BridgeError> {
        self.connected_worker()?;
        let advertisement = self
            .registry
            .advertisement(topic)
            .ok_or_else(|| BridgeError::UnknownTopic(topic.to_string()))?;
        let payload = advertisement.encode(message)?;
        self.send(Frame::publish(topic, payload))
    }

    /// Typed variant of [`publish`][Self::publish].
    pub fn publish_to<M: RosMessage>(
        &self,
        topic: &Topic<M>,
        message: &M,
    ) -> Result<(), BridgeError> {
        self.publish(topic.name(), message)
    }

    /// Send a `call_service` frame.  The response, if any, arrives later in
    /// the service response cell.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotConnected`] unless connected.
    pub fn call_service(&self, service: &str, args: Value) -> Result<CallId, BridgeError> {
        let (id, frame) = service::call_frame(service, args);
        self.send(frame)?;
        debug!(service = %service, call_id = %id, "service call sent");
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Run at most one pending subscription callback on the calling thread.
    ///
    /// Returns `true` if a callback ran.
    pub fn drain_one(&self) -> bool {
        self.inbox.queue.run_one()
    }

    /// Number of topics with a message waiting for [`drain_one`][Self::drain_one].
    pub fn pending_len(&self) -> usize {
        self.inbox.queue.len()
    }

    /// Read and clear the most recent service response.
    pub fn take_service_response(&self) -> Option<ServiceResponse> {
        self.inbox.service.take()
    }

    /// Read and clear why the last connection attempt failed to open.
    ///
    /// Holds a [`BridgeError::ConnectionFailure`] after a refused or timed-out
    /// open; cleared by the next [`connect`][Self::connect].
    pub fn take_connection_error(&self) -> Option<BridgeError> {
        self.inbox.failure.take()
    }
}

impl Drop for BridgeConnection {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.disconnect();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Network session
// ─────────────────────────────────────────────────────────────────────────────

/// State owned by the network thread for one connection attempt.
struct Session {
    url: String,
    connect_timeout: Duration,
    registry: Arc<TopicRegistry>,
    inbox: Arc<Inbox>,
    state: Arc<StateCell>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl Session {
    fn run(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "failed to start network runtime");
                self.state.settle();
                return;
            }
        };
        runtime.block_on(self.serve());
    }

    async fn serve(mut self) {
        let Some(ws) = self.open().await else {
            self.state.settle();
            return;
        };
        let (mut sink, mut stream) = ws.split();

        if !self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            debug!(url = %self.url, "disconnect requested while opening; closing");
            let _ = sink.close().await;
            return;
        }
        info!(url = %self.url, "connected to rosbridge server");

        if let Err(e) = send_frames(&mut sink, &self.registry.handshake_frames()).await {
            warn!(url = %self.url, error = %e, "handshake failed");
            self.state.settle();
            return;
        }

        loop {
            tokio::select! {
                command = self.outbound.recv() => match command {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            warn!(error = %e, "socket write failed");
                            break;
                        }
                    }
                    Some(Outbound::Shutdown) | None => {
                        teardown(&mut sink, &self.registry).await;
                        break;
                    }
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Routed::Queued { replaced: true } =
                            route_inbound(text.as_str(), &self.registry, &self.inbox)
                        {
                            trace!("replaced undelivered message");
                        }
                    }
                    Some(Ok(Message::Binary(_))) => debug!("ignoring binary frame"),
                    Some(Ok(Message::Close(_))) | None => {
                        info!(url = %self.url, "rosbridge server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(url = %self.url, error = %e, "rosbridge socket error");
                        break;
                    }
                },
            }
        }
        self.state.settle();
    }

    /// Open the socket, giving up on timeout or when `disconnect` is called.
    async fn open(&mut self) -> Option<WsStream> {
        let url = self.url.clone();
        let attempt = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()));
        tokio::select! {
            result = attempt => match result {
                Ok(Ok((ws, _response))) => Some(ws),
                Ok(Err(e)) => {
                    self.open_failed(e.to_string());
                    None
                }
                Err(_) => {
                    let timeout_ms = self.connect_timeout.as_millis() as u64;
                    self.open_failed(format!("timed out after {timeout_ms} ms"));
                    None
                }
            },
            _ = self.outbound.recv() => {
                debug!(url = %url, "connect aborted by disconnect");
                None
            }
        }
    }

    fn open_failed(&self, reason: String) {
        let err = BridgeError::ConnectionFailure(format!("{}: {reason}", self.url));
        warn!(error = %err, "failed to open rosbridge socket");
        self.inbox.failure.set(err);
    }
}

async fn send_frames<S>(sink: &mut S, frames: &[Frame]) -> Result<(), tungstenite::Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for frame in frames {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(op = frame.op(), error = %e, "skipping unencodable frame");
                continue;
            }
        };
        debug!(frame = %text, "sending");
        sink.send(Message::Text(text.into())).await?;
    }
    Ok(())
}

async fn teardown<S>(sink: &mut S, registry: &TopicRegistry)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    if let Err(e) = send_frames(sink, &registry.teardown_frames()).await {
        warn!(error = %e, "teardown frames not delivered");
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "socket close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosbridge_types::geometry_msgs::Twist;
    use rosbridge_types::std_msgs::StringMsg;
    use serde_json::json;
    use std::sync::mpsc as channel;

    fn string_registry() -> TopicRegistry {
        let mut registry = TopicRegistry::new();
        registry
            .add_subscription(Subscription::new(&Topic::<StringMsg>::new("/x"), |_| {}))
            .unwrap();
        registry
    }

    fn unreachable_config() -> BridgeConfig {
        // Port 9 (discard) on loopback is closed on test hosts.
        BridgeConfig::new("127.0.0.1", 9)
            .with_connect_timeout(Duration::from_millis(500))
            .with_shutdown_timeout(Duration::from_secs(1))
    }

    // ── Configuration ───────────────────────────────────────────────────────

    #[test]
    fn default_config_targets_local_rosbridge() {
        let config = BridgeConfig::default();
        assert_eq!(config.url(), "ws://localhost:9090");
    }

    #[test]
    fn url_keeps_explicit_scheme() {
        assert_eq!(BridgeConfig::new("ws://10.0.0.2", 9090).url(), "ws://10.0.0.2:9090");
        assert_eq!(BridgeConfig::new("wss://robot/", 443).url(), "wss://robot:443");
        assert_eq!(BridgeConfig::new("robot.local", 9091).url(), "ws://robot.local:9091");
    }

    // ── Inbound routing ─────────────────────────────────────────────────────

    #[test]
    fn publish_frame_becomes_pending_task() {
        let registry = string_registry();
        let inbox = Inbox::default();

        let routed = route_inbound(
            r#"{"op":"publish","topic":"/x","msg":{"data":"hello"}}"#,
            &registry,
            &inbox,
        );
        assert_eq!(routed, Routed::Queued { replaced: false });

        let (topic, task) = inbox.queue.drain_one().unwrap();
        assert_eq!(topic, "/x");
        assert_eq!(task.message::<StringMsg>().unwrap().data, "hello");
    }

    #[test]
    fn repeated_publish_replaces_pending_task() {
        let registry = string_registry();
        let inbox = Inbox::default();
        for n in 0..5 {
            let text = format!(r#"{{"op":"publish","topic":"/x","msg":{{"data":"{n}"}}}}"#);
            route_inbound(&text, &registry, &inbox);
        }
        assert_eq!(inbox.queue.len(), 1);
        let (_, task) = inbox.queue.drain_one().unwrap();
        assert_eq!(task.message::<StringMsg>().unwrap().data, "4");
    }

    #[test]
    fn unknown_topic_leaves_queue_unchanged() {
        let registry = string_registry();
        let inbox = Inbox::default();
        let routed = route_inbound(
            r#"{"op":"publish","topic":"/nobody","msg":{"data":"x"}}"#,
            &registry,
            &inbox,
        );
        assert_eq!(routed, Routed::Unroutable);
        assert_eq!(inbox.queue.len(), 0);
    }

    #[test]
    fn malformed_and_empty_frames_are_dropped() {
        let registry = string_registry();
        let inbox = Inbox::default();
        assert_eq!(route_inbound("", &registry, &inbox), Routed::Dropped);
        assert_eq!(route_inbound("{not json", &registry, &inbox), Routed::Dropped);
        assert_eq!(
            route_inbound(r#"{"op":"publish","topic":"/x","msg":{"data":7}}"#, &registry, &inbox),
            Routed::Dropped
        );
        assert!(inbox.queue.is_empty());
    }

    #[test]
    fn unknown_and_client_side_ops_are_ignored() {
        let registry = string_registry();
        let inbox = Inbox::default();
        assert_eq!(
            route_inbound(r#"{"op":"status","level":"warning","msg":"x"}"#, &registry, &inbox),
            Routed::Ignored
        );
        assert_eq!(
            route_inbound(
                r#"{"op":"subscribe","topic":"/x","type":"std_msgs/String"}"#,
                &registry,
                &inbox
            ),
            Routed::Ignored
        );
        assert!(inbox.queue.is_empty());
        assert!(!inbox.service.is_pending());
    }

    #[test]
    fn service_response_fills_cell() {
        let registry = string_registry();
        let inbox = Inbox::default();
        let routed = route_inbound(
            r#"{"op":"service_response","service":"/reset","values":{"ok":true},"id":"c1"}"#,
            &registry,
            &inbox,
        );
        assert_eq!(routed, Routed::ServiceResponse);
        let response = inbox.service.take().unwrap();
        assert_eq!(response.service, "/reset");
        assert_eq!(response.values, json!({"ok": true}));
        assert_eq!(response.id.as_deref(), Some("c1"));
        assert!(inbox.service.take().is_none());
    }

    // ── Lifecycle without a server ──────────────────────────────────────────

    #[test]
    fn idle_disconnect_is_noop() {
        let mut bridge = BridgeConnection::new(BridgeConfig::default());
        assert_eq!(bridge.disconnect(), DisconnectOutcome::Idle);
        assert!(!bridge.is_connected());
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn publish_before_connect_is_not_connected() {
        let mut bridge = BridgeConnection::new(BridgeConfig::default());
        let cmd_vel = Topic::<Twist>::new("/cmd_vel");
        bridge.add_publisher(&cmd_vel).unwrap();
        assert_eq!(
            bridge.publish_to(&cmd_vel, &Twist::stop()),
            Err(BridgeError::NotConnected)
        );
        assert_eq!(
            bridge.call_service("/reset", json!({})),
            Err(BridgeError::NotConnected)
        );
    }

    #[test]
    fn drain_one_with_nothing_pending_returns_false() {
        let bridge = BridgeConnection::new(BridgeConfig::default());
        assert!(!bridge.drain_one());
        assert_eq!(bridge.pending_len(), 0);
        assert!(bridge.take_service_response().is_none());
    }

    #[test]
    fn drain_one_runs_staged_callback() {
        let (tx, rx) = channel::channel();
        let mut bridge = BridgeConnection::new(BridgeConfig::default());
        bridge
            .add_subscriber(&Topic::<StringMsg>::new("/x"), move |msg: StringMsg| {
                tx.send(msg.data).unwrap();
            })
            .unwrap();

        route_inbound(
            r#"{"op":"publish","topic":"/x","msg":{"data":"hello"}}"#,
            &bridge.registry,
            &bridge.inbox,
        );
        assert_eq!(bridge.pending_len(), 1);
        assert!(bridge.drain_one());
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn failed_connect_returns_to_disconnected() {
        let mut bridge = BridgeConnection::new(unreachable_config());
        bridge.connect().unwrap();
        assert!(!bridge.wait_until_connected(Duration::from_secs(3)));
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
        match bridge.take_connection_error() {
            Some(BridgeError::ConnectionFailure(reason)) => {
                assert!(reason.starts_with("ws://127.0.0.1:9: "), "{reason}");
            }
            other => panic!("expected a connection failure, got {other:?}"),
        }
        assert!(bridge.take_connection_error().is_none());
        assert_eq!(
            bridge.publish("/anything", &StringMsg::new("x")),
            Err(BridgeError::NotConnected)
        );
        // The failed session is reaped, so a retry is allowed.
        bridge.connect().unwrap();
        bridge.disconnect();
    }

    #[test]
    fn registration_after_connect_is_rejected() {
        let mut bridge = BridgeConnection::new(unreachable_config());
        bridge.connect().unwrap();
        let err = bridge
            .add_subscriber(&Topic::<StringMsg>::new("/late"), |_| {})
            .unwrap_err();
        assert_eq!(err, BridgeError::RegistrationAfterConnect);
        bridge.disconnect();
        assert_eq!(
            bridge.add_publisher(&Topic::<Twist>::new("/late")),
            Err(BridgeError::RegistrationAfterConnect)
        );
    }

    #[test]
    fn disconnect_aborts_pending_connect() {
        // The kernel completes the TCP handshake into the backlog, but nobody
        // answers the WebSocket upgrade, so the attempt stays in Connecting.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut bridge = BridgeConnection::new(
            BridgeConfig::new("127.0.0.1", port)
                .with_connect_timeout(Duration::from_secs(30))
                .with_shutdown_timeout(Duration::from_secs(2)),
        );
        bridge.connect().unwrap();
        assert_eq!(bridge.state(), ConnectionState::Connecting);
        assert_eq!(bridge.connect(), Err(BridgeError::AlreadyConnected));

        assert_eq!(bridge.disconnect(), DisconnectOutcome::Clean);
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
        drop(listener);
    }

    #[test]
    fn stuck_network_thread_times_out_and_is_detached() {
        let mut bridge = BridgeConnection::new(
            BridgeConfig::default().with_shutdown_timeout(Duration::from_millis(50)),
        );
        let state = Arc::new(StateCell::new(ConnectionState::Connected));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = std_mpsc::channel();
        // Ignores Shutdown and reports completion long after the deadline.
        let handle = thread::spawn(move || {
            let _outbound = outbound_rx;
            thread::sleep(Duration::from_millis(500));
            let _ = finished_tx.send(());
        });
        bridge.worker = Some(Worker {
            state: Arc::clone(&state),
            outbound: outbound_tx,
            finished: finished_rx,
            handle,
        });

        let started = Instant::now();
        assert_eq!(bridge.disconnect(), DisconnectOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
        assert_eq!(state.load(), ConnectionState::Disconnected);
        assert_eq!(bridge.disconnect(), DisconnectOutcome::Idle);
    }

    #[test]
    fn state_cell_settle_leaves_disconnecting_alone() {
        let cell = StateCell::new(ConnectionState::Disconnecting);
        cell.settle();
        assert_eq!(cell.load(), ConnectionState::Disconnecting);

        let cell = StateCell::new(ConnectionState::Connected);
        cell.settle();
        assert_eq!(cell.load(), ConnectionState::Disconnected);
    }
}
