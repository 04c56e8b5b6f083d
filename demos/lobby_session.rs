//! # Lobby Session Example
//!
//! Joins one lobby on a running chess broker and prints what happens in it:
//!
//! 1. Connect through SockJS (retrying every 5 seconds until the broker is up)
//! 2. Join a lobby and claim a color
//! 3. Print board, turn, seat and chat changes as the broker reports them
//! 4. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start the chess broker on localhost:8080, then:
//! cargo run --example lobby_session
//!
//! # Override the endpoint, lobby or player name:
//! CHESS_SESSION_URL=http://my-host:8080/ws CHESS_LOBBY=abc CHESS_PLAYER=Ann \
//!     cargo run --example lobby_session
//! ```

use chess_session_client::{Color, LobbyScope, SessionConfig, SessionEvent, TransportSession};

/// Default endpoint when `CHESS_SESSION_URL` is not set.
const DEFAULT_URL: &str = "http://localhost:8080/ws";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` to see every STOMP frame decision.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("CHESS_SESSION_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let lobby_id = std::env::var("CHESS_LOBBY").unwrap_or_else(|_| "lobby-1".to_string());
    let player = std::env::var("CHESS_PLAYER").unwrap_or_else(|_| "RustPlayer".to_string());
    tracing::info!("Connecting to {url}");

    let (mut session, mut events) = TransportSession::start_sockjs(SessionConfig::new(url));

    // Session events are informational; log them from a side task.
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connected { session_id } => {
                    tracing::info!("Connected as {session_id}");
                }
                SessionEvent::ConnectFailed { reason, retry_in } => {
                    tracing::warn!("Connect failed ({reason}); retrying in {retry_in:?}");
                }
                SessionEvent::Disconnected { reason } => {
                    tracing::info!("Disconnected: {}", reason.as_deref().unwrap_or("by request"));
                }
                SessionEvent::BrokerError { message } => {
                    tracing::error!("Broker error: {message}");
                }
            }
        }
    });

    // ── Join ────────────────────────────────────────────────────────
    let mut lobby = LobbyScope::enter(session.handle(), lobby_id, player).await?;
    tracing::info!(
        "Joined {} as session {}",
        lobby.lobby_id(),
        lobby.session_id()
    );

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            changes = lobby.next_change() => {
                let Some(changes) = changes else {
                    tracing::info!("Connection lost, rejoining");
                    lobby.resubscribe().await?;
                    continue;
                };
                let view = lobby.view();

                if changes.players {
                    let players = &view.game().players;
                    tracing::info!(
                        "Seats: white={:?} black={:?}",
                        players.white_player_id,
                        players.black_player_id
                    );
                    // Take the first open seat once we know the seating.
                    if view.local_color().is_none() {
                        if let Some(color) = [Color::White, Color::Black]
                            .into_iter()
                            .find(|color| view.seat_open(*color))
                        {
                            lobby.claim(color)?;
                        }
                    }
                }
                if changes.local_color {
                    tracing::info!("Playing as {:?}", lobby.view().local_color());
                }
                if changes.position {
                    tracing::info!("Position: {}", lobby.view().game().position.as_str());
                }
                if changes.turn {
                    tracing::info!("{} to move", lobby.view().game().turn());
                }
                if changes.check && lobby.view().game().in_check {
                    tracing::info!("Check!");
                }
                if changes.game_over {
                    let game = lobby.view().game();
                    tracing::info!(
                        "Game over: {:?} ({})",
                        game.winning_team,
                        game.game_end_reason.as_deref().unwrap_or("no reason given")
                    );
                }
                if changes.chat {
                    if let Some(line) = lobby.view().chat().lines().last() {
                        tracing::info!("[{}] {}", line.player_name, line.content);
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving lobby");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    if let Err(e) = lobby.leave() {
        tracing::warn!("Could not release seat: {e}");
    }
    session.shutdown().await;
    let _ = event_log.await;
    tracing::info!("Goodbye");

    Ok(())
}
