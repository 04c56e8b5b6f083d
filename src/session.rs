//! Transport session: the single broker connection and its reconnect policy.
//!
//! [`TransportSession`] owns a background task that holds the transport, the
//! subscription registry and the queue of actions waiting for a connection.
//! Consumers talk to it through cloneable [`SessionHandle`]s, which forward
//! requests over an unbounded channel and return immediately.
//!
//! Connecting is lazy: the first [`connect`](SessionHandle::connect),
//! [`ready`](SessionHandle::ready) or subscribe call starts it. A failed
//! attempt is retried after a fixed interval, forever, until it succeeds or
//! [`disconnect`](SessionHandle::disconnect) is called. Losing an established
//! connection drops every subscription and schedules a reconnect; callers
//! re-subscribe once their receivers close.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SessionConfig::new("http://localhost:8080/ws");
//! let (session, mut events) = TransportSession::start(SockJsConnector::new(&config.endpoint), config);
//! let handle = session.handle();
//!
//! let mut game = handle.subscribe_game("lobby-1")?;
//! let session_id = handle.ready().await?;
//! handle.join_lobby("lobby-1")?;
//!
//! while let Some(envelope) = game.recv().await {
//!     view.apply(&envelope, Some(&session_id));
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SessionError};
use crate::event::SessionEvent;
use crate::protocol::{GameEnvelope, LobbyId, LobbySummary, OutboundEnvelope, SessionId};
use crate::registry::{ChannelKey, DispatchOutcome, Route, SubscriptionRegistry};
use crate::stomp::{Command, Frame};
use crate::transport::{Connection, Connector, Transport};

/// Default delay between connect attempts.
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default limit for the STOMP handshake after the transport opens.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`TransportSession`].
///
/// # Example
///
/// ```
/// use chess_session_client::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new("http://localhost:8080/ws")
///     .with_event_channel_capacity(64)
///     .with_shutdown_timeout(Duration::from_secs(2));
/// assert_eq!(config.retry_interval, Duration::from_secs(5));
/// assert_eq!(config.stomp_host, "localhost:8080");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// SockJS base URL of the broker, e.g. `http://localhost:8080/ws`.
    pub endpoint: String,
    /// Delay between a failed or lost connection and the next attempt.
    ///
    /// Defaults to **5 seconds**. The delay is fixed; there is no backoff and
    /// no limit on the number of attempts.
    pub retry_interval: Duration,
    /// Time allowed for the broker to answer `CONNECT` with `CONNECTED`.
    ///
    /// Defaults to **10 seconds**. Expiry counts as a failed attempt.
    pub handshake_timeout: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) so the session task never blocks on them.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time [`TransportSession::shutdown`] waits for the task before aborting.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Value of the STOMP `host` header. Defaults to the endpoint's authority.
    pub stomp_host: String,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let stomp_host = authority_of(&endpoint);
        Self {
            endpoint,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            stomp_host,
        }
    }

    /// Set the delay between connect attempts. Defaults to **5 seconds**.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the STOMP handshake timeout. Defaults to **10 seconds**.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown. Defaults to **1 second**.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Override the STOMP `host` header.
    #[must_use]
    pub fn with_stomp_host(mut self, host: impl Into<String>) -> Self {
        self.stomp_host = host.into();
        self
    }
}

fn authority_of(endpoint: &str) -> String {
    endpoint
        .split_once("://")
        .map_or(endpoint, |(_, rest)| rest)
        .split(['/', '?', '#'])
        .next()
        .filter(|host| !host.is_empty())
        .unwrap_or("localhost")
        .to_string()
}

// ── Shared state ────────────────────────────────────────────────────

/// Connection status as seen by handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => Self::Connected,
            1 => Self::Connecting,
            _ => Self::Disconnected,
        }
    }
}

/// State written by the session task and read by handles.
struct SharedState {
    status: AtomicU8,
    session_id: Mutex<Option<SessionId>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(ConnectionStatus::Disconnected as u8),
            session_id: Mutex::new(None),
        }
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// Requests from handles to the session task.
enum Request {
    Connect {
        ready: Option<oneshot::Sender<Result<SessionId>>>,
    },
    Subscribe {
        key: ChannelKey,
        route: Route,
    },
    Unsubscribe {
        key: ChannelKey,
    },
    Send {
        destination: &'static str,
        body: String,
    },
    Disconnect,
}

/// Work deferred until the next successful connect, drained in order.
enum PendingAction {
    Subscribe { key: ChannelKey, route: Route },
    Ready(oneshot::Sender<Result<SessionId>>),
}

// ── Handle ──────────────────────────────────────────────────────────

/// Cloneable handle to a running [`TransportSession`].
///
/// Every method returns [`SessionError::SessionClosed`] once the session task
/// has exited.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Request>,
    state: Arc<SharedState>,
}

impl SessionHandle {
    /// Start connecting if the session is idle. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] if the session task has exited.
    pub fn connect(&self) -> Result<()> {
        self.request(Request::Connect { ready: None })
    }

    /// Wait until the session is connected and return its session id.
    ///
    /// Resolves immediately when already connected. Otherwise it starts a
    /// connect if none is in progress and resolves after the next successful
    /// handshake, however many retries that takes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectCancelled`] if the session is
    /// disconnected or shut down first.
    pub async fn ready(&self) -> Result<SessionId> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Connect { ready: Some(tx) })?;
        rx.await.map_err(|_| SessionError::ConnectCancelled)?
    }

    /// Subscribe to game traffic for `lobby_id`.
    ///
    /// Replaces any existing game subscription for the lobby; the previous
    /// receiver closes. The receiver also closes when the connection is lost.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] if the session task has exited.
    pub fn subscribe_game(
        &self,
        lobby_id: impl Into<LobbyId>,
    ) -> Result<mpsc::UnboundedReceiver<GameEnvelope>> {
        self.subscribe_envelopes(ChannelKey::Game(lobby_id.into()))
    }

    /// Subscribe to chat for `lobby_id`. Same replacement rules as
    /// [`subscribe_game`](Self::subscribe_game).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] if the session task has exited.
    pub fn subscribe_chat(
        &self,
        lobby_id: impl Into<LobbyId>,
    ) -> Result<mpsc::UnboundedReceiver<GameEnvelope>> {
        self.subscribe_envelopes(ChannelKey::Chat(lobby_id.into()))
    }

    /// Subscribe to lobby-list snapshots. Each item is the complete list.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] if the session task has exited.
    pub fn subscribe_lobbies(&self) -> Result<mpsc::UnboundedReceiver<Vec<LobbySummary>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.request(Request::Subscribe {
            key: ChannelKey::LobbyList,
            route: Route::Lobbies(tx),
        })?;
        Ok(rx)
    }

    /// Remove the subscription for `key`. A no-op when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] if the session task has exited.
    pub fn unsubscribe(&self, key: ChannelKey) -> Result<()> {
        self.request(Request::Unsubscribe { key })
    }

    /// Publish `envelope` to its destination. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the session is connected.
    /// Nothing is queued or retried in that case.
    pub fn send(&self, envelope: &OutboundEnvelope) -> Result<()> {
        if self.status() != ConnectionStatus::Connected {
            return Err(SessionError::NotConnected);
        }
        let body = serde_json::to_string(envelope)?;
        self.request(Request::Send {
            destination: envelope.destination(),
            body,
        })
    }

    /// Announce the local player in `lobby_id`. The broker answers with a
    /// `STATE` snapshot on the game topic.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the session is connected.
    pub fn join_lobby(&self, lobby_id: impl Into<LobbyId>) -> Result<()> {
        self.send(&OutboundEnvelope::join(lobby_id))
    }

    /// Release the local player's seat in `lobby_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the session is connected.
    pub fn leave_lobby(&self, lobby_id: impl Into<LobbyId>) -> Result<()> {
        self.send(&OutboundEnvelope::leave(lobby_id))
    }

    /// Drop every subscription, close the transport and stop retrying.
    ///
    /// Pending [`ready`](Self::ready) calls fail with
    /// [`SessionError::ConnectCancelled`]. A no-op when already idle.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] if the session task has exited.
    pub fn disconnect(&self) -> Result<()> {
        self.request(Request::Disconnect)
    }

    /// Session id of the current connection, `None` while not connected.
    ///
    /// A new connection always gets a new id.
    pub async fn session_id(&self) -> Option<SessionId> {
        self.state.session_id.lock().await.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    fn subscribe_envelopes(&self, key: ChannelKey) -> Result<mpsc::UnboundedReceiver<GameEnvelope>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.request(Request::Subscribe {
            key,
            route: Route::Envelopes(tx),
        })?;
        Ok(rx)
    }

    fn request(&self, request: Request) -> Result<()> {
        self.cmd_tx
            .send(request)
            .map_err(|_| SessionError::SessionClosed)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ── Session owner ───────────────────────────────────────────────────

/// Owner of the session task.
///
/// Dropping it aborts the task; call [`shutdown`](Self::shutdown) to close
/// the connection gracefully first.
pub struct TransportSession {
    handle: SessionHandle,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl TransportSession {
    /// Spawn the session task and return its owner plus the event receiver.
    ///
    /// Nothing is connected until a handle asks for it.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Request>();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(SharedState::new());
        let task = SessionTask {
            connector,
            retry_interval: config.retry_interval,
            handshake_timeout: config.handshake_timeout,
            stomp_host: config.stomp_host,
            state: Arc::clone(&state),
            event_tx,
            link: None,
            registry: SubscriptionRegistry::new(),
            pending: VecDeque::new(),
            retry_at: None,
        };
        let join = tokio::spawn(task.run(cmd_rx, shutdown_rx));

        let session = Self {
            handle: SessionHandle { cmd_tx, state },
            task: Some(join),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (session, event_rx)
    }

    /// Start a session that connects through SockJS to `config.endpoint`.
    #[cfg(feature = "transport-websocket")]
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start_sockjs(config: SessionConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let connector = crate::transports::SockJsConnector::new(config.endpoint.clone());
        Self::start(connector, config)
    }

    /// A new handle to this session.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Close the connection and stop the session task.
    ///
    /// After this the event receiver yields `None` once drained, and every
    /// handle returns [`SessionError::SessionClosed`].
    pub async fn shutdown(&mut self) {
        debug!("TransportSession: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session task did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session task aborted: {join_err}");
                    }
                }
            }
        }

        self.handle.state.set_status(ConnectionStatus::Disconnected);
    }
}

impl std::ops::Deref for TransportSession {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("status", &self.handle.status())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        // No executor is available to drive a graceful close here.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session task ────────────────────────────────────────────────────

struct SessionTask<C> {
    connector: C,
    retry_interval: Duration,
    handshake_timeout: Duration,
    stomp_host: String,
    state: Arc<SharedState>,
    event_tx: mpsc::Sender<SessionEvent>,
    link: Option<Box<dyn Transport>>,
    registry: SubscriptionRegistry,
    pending: VecDeque<PendingAction>,
    retry_at: Option<Instant>,
}

impl<C: Connector> SessionTask<C> {
    /// Multiplex requests, shutdown, inbound frames and the retry timer.
    ///
    /// Exits on shutdown or when every handle is gone.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Request>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("session task started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    self.teardown(Some("session shut down".into())).await;
                    break;
                }

                request = cmd_rx.recv() => {
                    match request {
                        Some(request) => self.handle_request(request).await,
                        None => {
                            debug!("request channel closed, shutting down session task");
                            self.teardown(Some("session shut down".into())).await;
                            break;
                        }
                    }
                }

                incoming = recv_next(&mut self.link) => {
                    self.handle_incoming(incoming).await;
                }

                () = wait_until(self.retry_at) => {
                    self.retry_at = None;
                    self.attempt_connect().await;
                }
            }
        }

        debug!("session task exited");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { ready } => {
                if let Some(ready) = ready {
                    if self.link.is_some() {
                        if let Some(session_id) = self.state.session_id.lock().await.clone() {
                            let _ = ready.send(Ok(session_id));
                            return;
                        }
                    }
                    self.pending.push_back(PendingAction::Ready(ready));
                }
                self.ensure_connecting().await;
            }
            Request::Subscribe { key, route } => {
                if self.link.is_some() {
                    self.subscribe_now(key, route).await;
                } else {
                    debug!(?key, "not connected, deferring subscription");
                    self.pending.retain(|action| {
                        !matches!(action, PendingAction::Subscribe { key: queued, .. } if *queued == key)
                    });
                    self.pending.push_back(PendingAction::Subscribe { key, route });
                    self.ensure_connecting().await;
                }
            }
            Request::Unsubscribe { key } => {
                self.pending.retain(|action| {
                    !matches!(action, PendingAction::Subscribe { key: queued, .. } if *queued == key)
                });
                if let Some(id) = self.registry.remove(&key) {
                    debug!(id = %id, ?key, "unsubscribing");
                    self.write_frame(Frame::unsubscribe(&id)).await;
                }
            }
            Request::Send { destination, body } => {
                if self.link.is_some() {
                    self.write_frame(Frame::send(destination, body)).await;
                } else {
                    warn!(destination, "connection lost before send, dropping message");
                }
            }
            Request::Disconnect => self.disconnect().await,
        }
    }

    /// Connect now unless connected, connecting, or waiting for a retry.
    async fn ensure_connecting(&mut self) {
        if self.link.is_none() && self.retry_at.is_none() {
            self.attempt_connect().await;
        }
    }

    async fn attempt_connect(&mut self) {
        self.retry_at = None;
        self.state.set_status(ConnectionStatus::Connecting);
        debug!("connecting to broker");

        match self.open().await {
            Ok((transport, session_id)) => {
                *self.state.session_id.lock().await = Some(session_id.clone());
                self.link = Some(transport);
                self.state.set_status(ConnectionStatus::Connected);
                info!(session_id = %session_id, "connected to broker");
                self.emit_event(SessionEvent::Connected {
                    session_id: session_id.clone(),
                });
                self.drain_pending(&session_id).await;
            }
            Err(e) => {
                self.state.set_status(ConnectionStatus::Disconnected);
                warn!(
                    "connect attempt failed: {e}; retrying in {:?}",
                    self.retry_interval
                );
                self.retry_at = Some(Instant::now() + self.retry_interval);
                self.emit_event(SessionEvent::ConnectFailed {
                    reason: e.to_string(),
                    retry_in: self.retry_interval,
                });
            }
        }
    }

    /// Open a transport and complete the STOMP handshake on it.
    async fn open(&mut self) -> Result<(Box<dyn Transport>, SessionId)> {
        let Connection {
            mut transport,
            session_id,
        } = self.connector.connect().await?;

        let connect_frame = Frame::connect(&self.stomp_host).encode();
        let outcome = tokio::time::timeout(
            self.handshake_timeout,
            handshake(transport.as_mut(), connect_frame),
        )
        .await
        .unwrap_or(Err(SessionError::Timeout));

        match outcome {
            Ok(()) => Ok((transport, session_id)),
            Err(e) => {
                let _ = transport.close().await;
                Err(e)
            }
        }
    }

    /// Run deferred actions in the order they were requested.
    async fn drain_pending(&mut self, session_id: &SessionId) {
        while self.link.is_some() {
            let Some(action) = self.pending.pop_front() else {
                break;
            };
            match action {
                PendingAction::Subscribe { key, route } => self.subscribe_now(key, route).await,
                PendingAction::Ready(ready) => {
                    let _ = ready.send(Ok(session_id.clone()));
                }
            }
        }
    }

    async fn subscribe_now(&mut self, key: ChannelKey, route: Route) {
        let destination = key.destination();
        let (id, replaced) = self.registry.insert(key, route);
        if let Some(old) = replaced {
            if !self.write_frame(Frame::unsubscribe(&old)).await {
                return;
            }
        }
        debug!(id = %id, destination = %destination, "subscribing");
        self.write_frame(Frame::subscribe(&id, &destination)).await;
    }

    async fn handle_incoming(&mut self, incoming: Option<Result<String>>) {
        let text = match incoming {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                error!("transport receive error: {e}");
                self.link_lost(format!("transport receive error: {e}")).await;
                return;
            }
            None => {
                debug!("transport closed by broker");
                self.link_lost("connection closed by broker".into()).await;
                return;
            }
        };

        let frames = match Frame::decode_all(&text) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(raw = %text, "dropping undecodable STOMP frame: {e}");
                return;
            }
        };

        for frame in frames {
            match frame.command {
                Command::Message => self.route_message(&frame).await,
                Command::Error => {
                    let message = error_message(&frame);
                    error!(message = %message, "broker sent ERROR frame");
                    self.emit_event(SessionEvent::BrokerError { message });
                }
                other => debug!("ignoring {other} frame"),
            }
        }
    }

    async fn route_message(&mut self, frame: &Frame) {
        let Some(subscription) = frame.header("subscription") else {
            warn!("MESSAGE frame without subscription header, dropping");
            return;
        };
        match self.registry.dispatch(subscription, &frame.body) {
            DispatchOutcome::Closed => {
                if let Some(key) = self.registry.key_for(subscription).cloned() {
                    debug!(?key, "receiver dropped, unsubscribing");
                    if let Some(id) = self.registry.remove(&key) {
                        self.write_frame(Frame::unsubscribe(&id)).await;
                    }
                }
            }
            DispatchOutcome::Delivered
            | DispatchOutcome::Filtered
            | DispatchOutcome::Malformed
            | DispatchOutcome::Unknown => {}
        }
    }

    /// Write a frame, treating a send failure as connection loss.
    ///
    /// Returns `false` if the frame was not written.
    async fn write_frame(&mut self, frame: Frame) -> bool {
        let Some(transport) = self.link.as_mut() else {
            return false;
        };
        let result = transport.send(frame.encode()).await;
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("transport send error: {e}");
                self.link_lost(format!("transport send error: {e}")).await;
                false
            }
        }
    }

    /// The established connection is gone: drop its subscriptions and
    /// schedule a reconnect.
    async fn link_lost(&mut self, reason: String) {
        let dropped = self.registry.clear();
        debug!(count = dropped.len(), "dropped subscriptions with lost connection");
        if let Some(mut transport) = self.link.take() {
            let _ = transport.close().await;
        }
        *self.state.session_id.lock().await = None;
        self.state.set_status(ConnectionStatus::Disconnected);
        self.retry_at = Some(Instant::now() + self.retry_interval);
        info!(
            "connection lost: {reason}; reconnecting in {:?}",
            self.retry_interval
        );
        self.emit_event(SessionEvent::Disconnected {
            reason: Some(reason),
        });
    }

    async fn disconnect(&mut self) {
        if self.link.is_none() && self.retry_at.is_none() && self.pending.is_empty() {
            debug!("disconnect requested while idle");
            return;
        }
        let was_connected = self.link.is_some();
        self.close_link().await;
        info!("disconnected from broker");
        if was_connected {
            self.emit_event(SessionEvent::Disconnected { reason: None });
        }
    }

    async fn teardown(&mut self, reason: Option<String>) {
        let was_connected = self.link.is_some();
        self.close_link().await;
        if was_connected {
            self.emit_event(SessionEvent::Disconnected { reason });
        }
    }

    /// Unsubscribe everything, say goodbye, close, and forget all pending work.
    async fn close_link(&mut self) {
        let ids = self.registry.clear();
        if let Some(mut transport) = self.link.take() {
            for id in &ids {
                let _ = transport.send(Frame::unsubscribe(id).encode()).await;
            }
            let _ = transport.send(Frame::disconnect().encode()).await;
            if let Err(e) = transport.close().await {
                debug!("transport close error: {e}");
            }
        }
        self.pending.clear();
        self.retry_at = None;
        *self.state.session_id.lock().await = None;
        self.state.set_status(ConnectionStatus::Disconnected);
    }

    /// Emit an event. If the channel is full, log a warning and drop it.
    fn emit_event(&self, event: SessionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping event: {dropped:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

/// Send `CONNECT` and wait for `CONNECTED`.
async fn handshake(transport: &mut dyn Transport, connect_frame: String) -> Result<()> {
    transport.send(connect_frame).await?;
    loop {
        let text = match transport.recv().await {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(SessionError::Connect(
                    "transport closed during STOMP handshake".into(),
                ))
            }
        };
        for frame in Frame::decode_all(&text)? {
            match frame.command {
                Command::Connected => return Ok(()),
                Command::Error => return Err(SessionError::Broker(error_message(&frame))),
                other => debug!("ignoring {other} frame during handshake"),
            }
        }
    }
}

fn error_message(frame: &Frame) -> String {
    match frame.header("message") {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => frame.body.trim().to_string(),
    }
}

async fn recv_next(link: &mut Option<Box<dyn Transport>>) -> Option<Result<String>> {
    match link {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Connector whose transports answer the handshake and then stay silent.
    struct SilentConnector {
        attempts: Arc<StdMutex<u32>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    struct SilentTransport {
        replied: bool,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            if self.replied {
                std::future::pending().await
            } else {
                self.replied = true;
                Some(Ok("CONNECTED\nversion:1.2\n\n\0".into()))
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for SilentConnector {
        async fn connect(&mut self) -> Result<Connection> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            let transport = SilentTransport {
                replied: false,
                sent: Arc::clone(&self.sent),
            };
            Ok(Connection::new(transport, format!("S{attempts}")))
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&mut self) -> Result<Connection> {
            Err(SessionError::Connect("connection refused".into()))
        }
    }

    fn silent() -> (SilentConnector, Arc<StdMutex<u32>>, Arc<StdMutex<Vec<String>>>) {
        let attempts = Arc::new(StdMutex::new(0));
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let connector = SilentConnector {
            attempts: Arc::clone(&attempts),
            sent: Arc::clone(&sent),
        };
        (connector, attempts, sent)
    }

    #[test]
    fn config_defaults() {
        let config = SessionConfig::new("https://chess.example.org/ws");
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.stomp_host, "chess.example.org");
    }

    #[test]
    fn config_clamps_capacity() {
        let config = SessionConfig::new("http://h/ws").with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn authority_falls_back_to_localhost() {
        assert_eq!(authority_of("http:///ws"), "localhost");
        assert_eq!(authority_of("localhost:8080/ws"), "localhost:8080");
    }

    #[test]
    fn status_round_trips_through_u8() {
        for status in [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
        ] {
            assert_eq!(ConnectionStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn error_message_prefers_header() {
        let frame = Frame::new(Command::Error)
            .with_header("message", "bad destination")
            .with_body("details");
        assert_eq!(error_message(&frame), "bad destination");
        let frame = Frame::new(Command::Error).with_body(" only body \n");
        assert_eq!(error_message(&frame), "only body");
    }

    #[tokio::test]
    async fn start_does_not_connect() {
        let (connector, attempts, _sent) = silent();
        let (mut session, _events) = TransportSession::start(connector, SessionConfig::new("ws://h"));
        tokio::task::yield_now().await;
        assert_eq!(*attempts.lock().unwrap(), 0);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn ready_is_idempotent_once_connected() {
        let (connector, attempts, sent) = silent();
        let (mut session, _events) = TransportSession::start(connector, SessionConfig::new("ws://h"));

        assert_eq!(session.ready().await.unwrap(), "S1");
        assert_eq!(session.ready().await.unwrap(), "S1");
        session.connect().unwrap();
        assert_eq!(session.ready().await.unwrap(), "S1");

        assert_eq!(*attempts.lock().unwrap(), 1);
        assert!(sent.lock().unwrap()[0].starts_with("CONNECT\n"));
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ready_stays_pending_across_retries() {
        let (mut session, mut events) =
            TransportSession::start(RefusingConnector, SessionConfig::new("ws://h"));
        let handle = session.handle();
        let mut ready = tokio_test::task::spawn(handle.ready());

        tokio_test::assert_pending!(ready.poll());
        for _ in 0..3 {
            assert!(matches!(
                events.recv().await,
                Some(SessionEvent::ConnectFailed { .. })
            ));
            tokio_test::assert_pending!(ready.poll());
        }

        session.disconnect().unwrap();
        assert!(matches!(ready.await, Err(SessionError::ConnectCancelled)));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn handles_fail_after_shutdown() {
        let (connector, _attempts, _sent) = silent();
        let (mut session, _events) = TransportSession::start(connector, SessionConfig::new("ws://h"));
        let handle = session.handle();
        session.shutdown().await;

        assert!(matches!(handle.connect(), Err(SessionError::SessionClosed)));
        assert!(matches!(
            handle.subscribe_lobbies(),
            Err(SessionError::SessionClosed)
        ));
        assert!(matches!(
            handle.join_lobby("L1"),
            Err(SessionError::NotConnected)
        ));
    }
}
