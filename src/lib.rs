//! # Chess Session Client
//!
//! Client-side session layer for a real-time two-player chess service.
//!
//! The broker speaks STOMP over SockJS. This crate keeps one connection to it
//! alive, routes its topics to per-lobby channels, reduces the authoritative
//! messages into a local view, and gates player actions before they are
//! sent. Rules, persistence and matchmaking live on the server.
//!
//! ## Layers
//!
//! - [`session`]: [`TransportSession`] owns the connection, retries it every
//!   5 seconds, and hands out cloneable [`SessionHandle`]s.
//! - [`registry`]: maps game, chat and lobby-list channels to receivers and
//!   filters the shared game topic by lobby.
//! - [`view`]: [`LobbyView`] reduces envelopes into board, turn, players,
//!   check, result and chat.
//! - [`gate`]: [`ActionGate`] admits or rejects moves, promotions, claims and
//!   chat against the view.
//! - [`lobby`]: [`LobbyScope`] ties the above together for one lobby.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   text channel
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   `WebSocketTransport` and `SockJsConnector`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "transport-websocket")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use chess_session_client::{LobbyScope, SessionConfig, TransportSession};
//!
//! let (mut session, _events) =
//!     TransportSession::start_sockjs(SessionConfig::new("http://localhost:8080/ws"));
//!
//! let mut lobby = LobbyScope::enter(session.handle(), "lobby-1", "Ann").await?;
//! while let Some(changes) = lobby.next_change().await {
//!     if changes.local_color {
//!         println!("playing as {:?}", lobby.view().local_color());
//!     }
//! }
//!
//! drop(lobby);
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event;
pub mod gate;
pub mod lobby;
pub mod protocol;
pub mod registry;
pub mod rejection;
pub mod session;
pub mod stomp;
pub mod transport;
pub mod transports;
pub mod view;

// Re-export primary types for ergonomic imports.
pub use error::SessionError;
pub use event::SessionEvent;
pub use gate::{ActionGate, GateContext, ProposedAction, SubmitError};
pub use lobby::LobbyScope;
pub use protocol::{
    Color, GameEnvelope, LobbySummary, OutboundEnvelope, Piece, PieceKind, Position, Square,
};
pub use registry::ChannelKey;
pub use rejection::Rejection;
pub use session::{ConnectionStatus, SessionConfig, SessionHandle, TransportSession};
pub use transport::{Connection, Connector, Transport};
pub use view::{ChatLog, GameView, LobbyDirectory, LobbyPhase, LobbyView, ViewChanges};

#[cfg(feature = "transport-websocket")]
pub use transports::{SockJsConnector, WebSocketTransport};
