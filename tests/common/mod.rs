#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for chess session integration tests.
//!
//! [`MockConnector`] plays back a script of connect outcomes. Every accepted
//! attempt yields a [`BrokerEnd`] on a channel, which the test drives as the
//! broker: it reads the STOMP frames the session wrote and pushes frames back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use chess_session_client::stomp::{Command, Frame};
use chess_session_client::{Connection, Connector, SessionConfig, SessionError, Transport};

pub const CONNECTED_FRAME: &str = "CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0";

// ── MockConnector ───────────────────────────────────────────────────

/// Outcome of one scripted connect attempt.
#[derive(Debug, Clone)]
pub enum Attempt {
    /// Open a link that answers the handshake with `CONNECTED`.
    Accept,
    /// Fail before a transport exists.
    Fail(&'static str),
    /// Open a link that answers the handshake with an `ERROR` frame.
    RejectHandshake(&'static str),
    /// Open a link that never answers the handshake.
    Silent,
}

/// A [`Connector`] that follows a script. Once the script runs out every
/// further attempt fails.
pub struct MockConnector {
    script: VecDeque<Attempt>,
    attempts: Arc<AtomicUsize>,
    links: mpsc::UnboundedSender<BrokerEnd>,
}

impl MockConnector {
    pub fn new(
        script: impl IntoIterator<Item = Attempt>,
    ) -> (Self, mpsc::UnboundedReceiver<BrokerEnd>, Arc<AtomicUsize>) {
        let (links, links_rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            script: script.into_iter().collect(),
            attempts: Arc::clone(&attempts),
            links,
        };
        (connector, links_rx, attempts)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&mut self) -> Result<Connection, SessionError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let attempt = self
            .script
            .pop_front()
            .unwrap_or(Attempt::Fail("script exhausted"));
        let greeting = match attempt {
            Attempt::Fail(reason) => return Err(SessionError::Connect(reason.into())),
            Attempt::Accept => Some(CONNECTED_FRAME.to_string()),
            Attempt::RejectHandshake(message) => Some(
                Frame::new(Command::Error)
                    .with_header("message", message)
                    .encode(),
            ),
            Attempt::Silent => None,
        };

        let session_id = format!("S{n}");
        let (link, broker) = MockLink::pair(session_id.clone());
        if let Some(greeting) = greeting {
            broker.push(&greeting);
        }
        let _ = self.links.send(broker);
        Ok(Connection::new(link, session_id))
    }
}

// ── MockLink / BrokerEnd ────────────────────────────────────────────

/// Client side of an in-memory link.
pub struct MockLink {
    incoming: mpsc::UnboundedReceiver<Result<String, SessionError>>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    pub fn pair(session_id: String) -> (Self, BrokerEnd) {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (sent, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let link = Self {
            incoming,
            sent,
            closed: Arc::clone(&closed),
        };
        let broker = BrokerEnd {
            session_id,
            to_client: Some(to_client),
            from_client,
            closed,
        };
        (link, broker)
    }
}

#[async_trait]
impl Transport for MockLink {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::TransportClosed);
        }
        self.sent
            .send(message)
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Broker side of an in-memory link.
pub struct BrokerEnd {
    pub session_id: String,
    to_client: Option<mpsc::UnboundedSender<Result<String, SessionError>>>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl BrokerEnd {
    /// Push raw text to the client.
    pub fn push(&self, text: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(text.to_string()));
        }
    }

    /// Deliver `body` as a `MESSAGE` on subscription `id`.
    pub fn message(&self, id: &str, destination: &str, body: &Value) {
        let frame = Frame::new(Command::Message)
            .with_header("destination", destination)
            .with_header("subscription", id)
            .with_header("message-id", format!("{id}-{}", next_message_id()))
            .with_body(body.to_string());
        self.push(&frame.encode());
    }

    /// Send a STOMP `ERROR` frame.
    pub fn error(&self, message: &str) {
        let frame = Frame::new(Command::Error).with_header("message", message);
        self.push(&frame.encode());
    }

    /// Fail the link with a receive error.
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Err(SessionError::TransportReceive(reason.into())));
        }
    }

    /// Close the link from the broker side.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Whether the client closed its end.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next frame the client wrote, or `None` once it dropped the link.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        let text = self.from_client.recv().await?;
        let mut frames = Frame::decode_all(&text).expect("client wrote a malformed frame");
        assert_eq!(frames.len(), 1, "one frame per transport message");
        frames.pop()
    }

    /// Next frame, which must have `command`.
    pub async fn expect(&mut self, command: Command) -> Frame {
        let frame = tokio::time::timeout(Duration::from_secs(60), self.next_frame())
            .await
            .expect("timed out waiting for client frame")
            .expect("client closed the link");
        assert_eq!(frame.command, command, "unexpected frame {frame:?}");
        frame
    }

    /// Read the next `SUBSCRIBE`, check its destination and return its id.
    pub async fn expect_subscribe(&mut self, destination: &str) -> String {
        let frame = self.expect(Command::Subscribe).await;
        assert_eq!(frame.header("destination"), Some(destination));
        frame.header("id").unwrap().to_string()
    }

    /// Read the next `SEND`, check its destination and return its JSON body.
    pub async fn expect_send(&mut self, destination: &str) -> Value {
        let frame = self.expect(Command::Send).await;
        assert_eq!(frame.header("destination"), Some(destination));
        assert_eq!(frame.header("content-type"), Some("application/json"));
        serde_json::from_str(&frame.body).unwrap()
    }

    /// Frames written so far without waiting.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            frames.extend(Frame::decode_all(&text).unwrap());
        }
        frames
    }
}

fn next_message_id() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

// ── Helpers ─────────────────────────────────────────────────────────

pub fn config() -> SessionConfig {
    SessionConfig::new("http://localhost:8080/ws")
}

/// Let the session task run until it is idle.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn players_json(lobby_id: &str, white: &str, black: &str) -> Value {
    json!({
        "lobbyId": lobby_id,
        "type": "PLAYERS",
        "content": {"whitePlayerId": white, "blackPlayerId": black}
    })
}

pub fn state_json(lobby_id: &str, board: &str, white: &str, black: &str, white_turn: bool) -> Value {
    json!({
        "lobbyId": lobby_id,
        "type": "STATE",
        "content": {
            "boardState": board,
            "players": {"whitePlayerId": white, "blackPlayerId": black}
        },
        "whiteTurn": white_turn,
        "gameOver": false,
        "inCheck": false
    })
}

pub fn move_json(lobby_id: &str, board: &str, white_turn: bool) -> Value {
    json!({
        "lobbyId": lobby_id,
        "type": "MOVE",
        "content": board,
        "whiteTurn": white_turn
    })
}

pub fn chat_json(lobby_id: &str, name: &str, content: &str) -> Value {
    json!({
        "lobbyId": lobby_id,
        "type": "CHAT",
        "content": {"playerName": name, "content": content}
    })
}

pub const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
