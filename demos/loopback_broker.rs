//! # Loopback Broker Example
//!
//! Plays a short game between two local players without any network.
//!
//! A tiny in-process broker speaks just enough STOMP to serve one lobby. It
//! has no rules engine: it seats players, flips the turn on every move and
//! publishes the move list as the position. Each player runs its own
//! [`TransportSession`] through a custom [`Connector`], which shows how to
//! plug a non-WebSocket transport into the session.
//!
//! ## Running
//!
//! ```sh
//! RUST_LOG=chess_session_client=debug cargo run --example loopback_broker
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use chess_session_client::stomp::{Command, Frame};
use chess_session_client::{
    Color, Connection, Connector, LobbyScope, Piece, PieceKind, ProposedAction, SessionConfig,
    SessionError, Transport, TransportSession,
};

const LOBBY: &str = "demo";

// ── Transport ───────────────────────────────────────────────────────

/// Traffic from clients to the broker, tagged with the connection id.
enum ToBroker {
    Open(usize, mpsc::UnboundedSender<String>),
    Text(usize, String),
    Closed(usize),
}

struct LoopbackTransport {
    conn: usize,
    to_broker: mpsc::UnboundedSender<ToBroker>,
    from_broker: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.to_broker
            .send(ToBroker::Text(self.conn, message))
            .map_err(|_| SessionError::TransportClosed)
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.from_broker.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let _ = self.to_broker.send(ToBroker::Closed(self.conn));
        Ok(())
    }
}

/// Registers a fresh connection with the broker on every attempt.
#[derive(Clone)]
struct LoopbackConnector {
    to_broker: mpsc::UnboundedSender<ToBroker>,
    offset: usize,
    attempts: usize,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&mut self) -> Result<Connection, SessionError> {
        self.attempts += 1;
        let conn = self.offset + self.attempts;
        let (tx, rx) = mpsc::unbounded_channel();
        self.to_broker
            .send(ToBroker::Open(conn, tx))
            .map_err(|_| SessionError::Connect("broker is not running".into()))?;
        let transport = LoopbackTransport {
            conn,
            to_broker: self.to_broker.clone(),
            from_broker: rx,
        };
        Ok(Connection::new(transport, format!("loop-{conn}")))
    }
}

// ── Broker ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Client {
    tx: Option<mpsc::UnboundedSender<String>>,
    subscriptions: Vec<(String, String)>,
}

#[derive(Default)]
struct Lobby {
    white: String,
    black: String,
    moves: Vec<String>,
}

impl Lobby {
    fn white_turn(&self) -> bool {
        self.moves.len() % 2 == 0
    }

    fn position(&self) -> String {
        self.moves.join(" ")
    }

    fn players(&self) -> Value {
        json!({"whitePlayerId": self.white, "blackPlayerId": self.black})
    }
}

#[derive(Default)]
struct Broker {
    clients: HashMap<usize, Client>,
    lobby: Lobby,
    next_message: usize,
}

impl Broker {
    fn handle(&mut self, conn: usize, text: &str) {
        let frames = match Frame::decode_all(text) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("broker: bad frame from {conn}: {e}");
                return;
            }
        };
        for frame in frames {
            match frame.command {
                Command::Connect => {
                    self.reply(conn, Frame::new(Command::Connected).with_header("version", "1.2"));
                }
                Command::Subscribe => {
                    if let (Some(id), Some(destination)) =
                        (frame.header("id"), frame.header("destination"))
                    {
                        let client = self.clients.entry(conn).or_default();
                        client.subscriptions.push((id.to_string(), destination.to_string()));
                    }
                }
                Command::Unsubscribe => {
                    if let (Some(id), Some(client)) = (frame.header("id"), self.clients.get_mut(&conn)) {
                        client.subscriptions.retain(|(sub, _)| sub != id);
                    }
                }
                Command::Send => self.route(conn, &frame),
                Command::Disconnect => {
                    self.clients.remove(&conn);
                }
                other => tracing::debug!("broker: ignoring {other}"),
            }
        }
    }

    fn route(&mut self, conn: usize, frame: &Frame) {
        let Ok(body) = serde_json::from_str::<Value>(&frame.body) else {
            return;
        };
        let player = format!("loop-{conn}");
        let white_turn = self.lobby.white_turn();

        match frame.header("destination").unwrap_or_default() {
            "/app/join" => {
                let state = json!({
                    "lobbyId": LOBBY,
                    "type": "STATE",
                    "content": {"boardState": self.lobby.position(), "players": self.lobby.players()},
                    "whiteTurn": white_turn
                });
                self.publish("/topic/game", &state);
            }
            "/app/claim" => {
                let seat = match body["content"].as_str() {
                    Some("white") => &mut self.lobby.white,
                    Some("black") => &mut self.lobby.black,
                    _ => return,
                };
                if !seat.is_empty() {
                    return;
                }
                *seat = player;
                let players = json!({
                    "lobbyId": LOBBY,
                    "type": "PLAYERS",
                    "content": self.lobby.players(),
                    "whiteTurn": white_turn
                });
                self.publish("/topic/game", &players);
            }
            "/app/move" => {
                let mover = if white_turn { &self.lobby.white } else { &self.lobby.black };
                if *mover != player {
                    return;
                }
                let from = body["content"]["from"].as_str().unwrap_or_default();
                let to = body["content"]["to"].as_str().unwrap_or_default();
                self.lobby.moves.push(format!("{from}{to}"));
                let moved = json!({
                    "lobbyId": LOBBY,
                    "type": "MOVE",
                    "content": self.lobby.position(),
                    "whiteTurn": self.lobby.white_turn(),
                    "gameOver": false,
                    "inCheck": false
                });
                self.publish("/topic/game", &moved);
            }
            "/app/chat" => {
                let chat = json!({
                    "lobbyId": LOBBY,
                    "type": "CHAT",
                    "content": body["content"],
                    "whiteTurn": white_turn
                });
                self.publish(&format!("/topic/chat/{LOBBY}"), &chat);
            }
            other => tracing::debug!("broker: no handler for {other}"),
        }
    }

    fn publish(&mut self, destination: &str, body: &Value) {
        for client in self.clients.values() {
            let Some(tx) = &client.tx else { continue };
            for (id, _) in client.subscriptions.iter().filter(|(_, d)| d == destination) {
                self.next_message += 1;
                let frame = Frame::new(Command::Message)
                    .with_header("destination", destination)
                    .with_header("subscription", id.as_str())
                    .with_header("message-id", self.next_message.to_string())
                    .with_body(body.to_string());
                let _ = tx.send(frame.encode());
            }
        }
    }

    fn reply(&self, conn: usize, frame: Frame) {
        if let Some(tx) = self.clients.get(&conn).and_then(|client| client.tx.as_ref()) {
            let _ = tx.send(frame.encode());
        }
    }
}

fn spawn_broker() -> mpsc::UnboundedSender<ToBroker> {
    let (to_broker, mut inbox) = mpsc::unbounded_channel::<ToBroker>();

    tokio::spawn(async move {
        let mut broker = Broker::default();
        while let Some(message) = inbox.recv().await {
            match message {
                ToBroker::Open(conn, tx) => {
                    broker.clients.insert(
                        conn,
                        Client {
                            tx: Some(tx),
                            ..Client::default()
                        },
                    );
                }
                ToBroker::Text(conn, text) => broker.handle(conn, &text),
                ToBroker::Closed(conn) => {
                    broker.clients.remove(&conn);
                }
            }
        }
    });

    to_broker
}

// ── Players ─────────────────────────────────────────────────────────

/// Reduce traffic into `lobby` until it has been quiet for a moment.
async fn catch_up(lobby: &mut LobbyScope) {
    while let Ok(Some(changes)) =
        tokio::time::timeout(Duration::from_millis(50), lobby.next_change()).await
    {
        tracing::debug!("{}: {changes:?}", lobby.player_name());
    }
}

fn pawn(color: Color, from: &str, to: &str) -> Result<ProposedAction, SessionError> {
    Ok(ProposedAction::Move {
        piece: Piece::new(color, PieceKind::Pawn),
        from: from.parse()?,
        to: to.parse()?,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let to_broker = spawn_broker();
    let connector = |offset| LoopbackConnector {
        to_broker: to_broker.clone(),
        offset,
        attempts: 0,
    };
    let config = SessionConfig::new("loopback://broker").with_retry_interval(Duration::from_millis(200));

    let (mut ann_session, _ann_events) = TransportSession::start(connector(0), config.clone());
    let (mut bob_session, _bob_events) = TransportSession::start(connector(100), config);

    let mut ann = LobbyScope::enter(ann_session.handle(), LOBBY, "Ann").await?;
    let mut bob = LobbyScope::enter(bob_session.handle(), LOBBY, "Bob").await?;
    catch_up(&mut ann).await;
    catch_up(&mut bob).await;

    ann.claim(Color::White)?;
    catch_up(&mut ann).await;
    bob.claim(Color::Black)?;
    catch_up(&mut ann).await;
    catch_up(&mut bob).await;
    tracing::info!(
        "Ann plays {:?}, Bob plays {:?}",
        ann.view().local_color(),
        bob.view().local_color()
    );

    // Out of turn: refused locally, nothing reaches the broker.
    if let Err(e) = bob.submit(&pawn(Color::Black, "e7", "e5")?) {
        tracing::info!("Bob: {e}");
    }

    ann.submit(&pawn(Color::White, "e2", "e4")?)?;
    catch_up(&mut ann).await;
    catch_up(&mut bob).await;
    bob.chat("nice opening")?;
    bob.submit(&pawn(Color::Black, "e7", "e5")?)?;
    catch_up(&mut ann).await;
    catch_up(&mut bob).await;

    for lobby in [&ann, &bob] {
        let game = lobby.view().game();
        tracing::info!(
            "{} sees moves [{}], {} to move",
            lobby.player_name(),
            game.position.as_str(),
            game.turn()
        );
        for line in lobby.view().chat() {
            tracing::info!("{} sees chat [{}] {}", lobby.player_name(), line.player_name, line.content);
        }
    }

    ann.leave()?;
    bob.leave()?;
    ann_session.shutdown().await;
    bob_session.shutdown().await;
    Ok(())
}
