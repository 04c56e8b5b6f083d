#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the transport session and its subscription registry.
//!
//! A scripted [`MockConnector`] stands in for SockJS; each test drives the
//! broker side of the link and checks the STOMP frames the session writes.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use chess_session_client::stomp::Command;
use chess_session_client::{
    ConnectionStatus, OutboundEnvelope, SessionError, SessionEvent, TransportSession,
};

use common::{
    chat_json, config, move_json, players_json, settle, Attempt, MockConnector, AFTER_E4,
};

// ════════════════════════════════════════════════════════════════════
// Connect lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ready_connects_and_reports_session_id() {
    let (connector, mut links, attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, mut events) = TransportSession::start(connector, config());

    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    let session_id = session.ready().await.unwrap();
    assert_eq!(session_id, "S1");
    assert_eq!(session.session_id().await.as_deref(), Some("S1"));
    assert!(session.is_connected());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let mut broker = links.recv().await.unwrap();
    let connect = broker.expect(Command::Connect).await;
    assert_eq!(connect.header("host"), Some("localhost:8080"));
    assert_eq!(connect.header("accept-version"), Some("1.2,1.1,1.0"));

    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Connected {
            session_id: "S1".into()
        }
    );

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_connect_is_retried_after_fixed_interval() {
    let (connector, _links, attempts) = MockConnector::new([
        Attempt::Fail("connection refused"),
        Attempt::Fail("connection refused"),
        Attempt::Accept,
    ]);
    let (mut session, mut events) = TransportSession::start(connector, config());

    let started = Instant::now();
    let session_id = session.ready().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(session_id, "S3");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(11), "elapsed {elapsed:?}");

    for _ in 0..2 {
        match events.recv().await.unwrap() {
            SessionEvent::ConnectFailed { reason, retry_in } => {
                assert!(reason.contains("connection refused"));
                assert_eq!(retry_in, Duration::from_secs(5));
            }
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Connected { .. }
    ));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retries_are_unbounded() {
    let (connector, _links, attempts) = MockConnector::new([]);
    let (mut session, _events) = TransportSession::start(connector, config());

    session.connect().unwrap();
    tokio::time::sleep(Duration::from_secs(5 * 20 + 1)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 21);
    assert_eq!(session.status(), ConnectionStatus::Disconnected);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn handshake_error_and_timeout_count_as_failures() {
    let (connector, mut links, attempts) = MockConnector::new([
        Attempt::RejectHandshake("access denied"),
        Attempt::Silent,
        Attempt::Accept,
    ]);
    let (mut session, mut events) = TransportSession::start(connector, config());

    let session_id = session.ready().await.unwrap();
    assert_eq!(session_id, "S3");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    match events.recv().await.unwrap() {
        SessionEvent::ConnectFailed { reason, .. } => assert!(reason.contains("access denied")),
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        SessionEvent::ConnectFailed { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("expected ConnectFailed, got {other:?}"),
    }

    // Both failed links were closed by the session.
    let rejected = links.recv().await.unwrap();
    let silent = links.recv().await.unwrap();
    assert!(rejected.client_closed());
    assert!(silent.client_closed());

    session.shutdown().await;
}

#[tokio::test]
async fn connect_is_idempotent() {
    let (connector, _links, attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());

    session.connect().unwrap();
    session.connect().unwrap();
    let first = session.ready().await.unwrap();
    session.connect().unwrap();
    let second = session.ready().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn send_requires_connection() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());

    assert!(matches!(
        session.join_lobby("L1"),
        Err(SessionError::NotConnected)
    ));

    session.ready().await.unwrap();
    session.join_lobby("L1").unwrap();
    session
        .send(&OutboundEnvelope::claim("L1", chess_session_client::Color::White))
        .unwrap();

    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;
    assert_eq!(
        broker.expect_send("/app/join").await,
        json!({"lobbyId": "L1", "type": "JOIN", "content": null})
    );
    assert_eq!(
        broker.expect_send("/app/claim").await,
        json!({"lobbyId": "L1", "type": "CLAIM", "content": "white"})
    );

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Subscriptions
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn deferred_subscriptions_are_drained_in_order() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());

    let _lobbies = session.subscribe_lobbies().unwrap();
    let _game = session.subscribe_game("L1").unwrap();
    let _chat = session.subscribe_chat("L1").unwrap();
    session.ready().await.unwrap();

    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;
    broker.expect_subscribe("/topic/lobbies").await;
    broker.expect_subscribe("/topic/game").await;
    broker.expect_subscribe("/topic/chat/L1").await;

    session.shutdown().await;
}

#[tokio::test]
async fn shared_game_topic_is_filtered_per_lobby() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());

    let mut lobby_one = session.subscribe_game("L1").unwrap();
    let mut lobby_two = session.subscribe_game("L2").unwrap();
    session.ready().await.unwrap();

    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;
    let first = broker.expect_subscribe("/topic/game").await;
    let second = broker.expect_subscribe("/topic/game").await;
    assert_ne!(first, second);

    // The broker fans every game message out to every subscription.
    let traffic = [
        move_json("L1", "a", false),
        move_json("L2", "b", false),
        players_json("L2", "S9", ""),
        move_json("L1", "c", true),
        chat_json("L2", "Bob", "hi"),
    ];
    for message in &traffic {
        broker.message(&first, "/topic/game", message);
        broker.message(&second, "/topic/game", message);
    }
    settle().await;

    let mut seen_one = Vec::new();
    while let Ok(envelope) = lobby_one.try_recv() {
        seen_one.push(envelope);
    }
    let mut seen_two = Vec::new();
    while let Ok(envelope) = lobby_two.try_recv() {
        seen_two.push(envelope);
    }

    assert_eq!(seen_one.len(), 2);
    assert!(seen_one.iter().all(|envelope| envelope.lobby_id == "L1"));
    assert_eq!(seen_two.len(), 3);
    assert!(seen_two.iter().all(|envelope| envelope.lobby_id == "L2"));

    session.shutdown().await;
}

#[tokio::test]
async fn resubscribe_replaces_previous_handler() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());
    session.ready().await.unwrap();

    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;

    let mut old = session.subscribe_game("L1").unwrap();
    let old_id = broker.expect_subscribe("/topic/game").await;
    let mut new = session.subscribe_game("L1").unwrap();
    let unsubscribe = broker.expect(Command::Unsubscribe).await;
    assert_eq!(unsubscribe.header("id"), Some(old_id.as_str()));
    let new_id = broker.expect_subscribe("/topic/game").await;

    broker.message(&old_id, "/topic/game", &move_json("L1", "x", true));
    broker.message(&new_id, "/topic/game", &move_json("L1", "y", true));

    assert!(old.recv().await.is_none());
    assert_eq!(new.recv().await.unwrap().lobby_id, "L1");

    session.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());
    session.ready().await.unwrap();

    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;

    let mut chat = session.subscribe_chat("L1").unwrap();
    let id = broker.expect_subscribe("/topic/chat/L1").await;

    let key = chess_session_client::ChannelKey::Chat("L1".into());
    session.unsubscribe(key.clone()).unwrap();
    session.unsubscribe(key).unwrap();
    let frame = broker.expect(Command::Unsubscribe).await;
    assert_eq!(frame.header("id"), Some(id.as_str()));
    assert!(chat.recv().await.is_none());

    session.join_lobby("L1").unwrap();
    // The second unsubscribe wrote nothing: the next frame is the SEND.
    broker.expect_send("/app/join").await;

    session.shutdown().await;
}

#[tokio::test]
async fn dropped_receiver_is_unsubscribed_on_next_message() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());
    session.ready().await.unwrap();

    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;

    let game = session.subscribe_game("L1").unwrap();
    let id = broker.expect_subscribe("/topic/game").await;
    drop(game);

    broker.message(&id, "/topic/game", &move_json("L1", "x", true));
    let frame = broker.expect(Command::Unsubscribe).await;
    assert_eq!(frame.header("id"), Some(id.as_str()));

    session.shutdown().await;
}

#[tokio::test]
async fn lobby_list_snapshots_replace_and_reject_non_arrays() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());
    let mut lobbies = session.subscribe_lobbies().unwrap();
    session.ready().await.unwrap();

    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;
    let id = broker.expect_subscribe("/topic/lobbies").await;

    broker.message(
        &id,
        "/topic/lobbies",
        &json!([{"id": "a", "name": "A", "whitePlayerId": "S1", "blackPlayerId": null}]),
    );
    broker.message(&id, "/topic/lobbies", &json!({"id": "not-a-list"}));
    broker.message(&id, "/topic/lobbies", &json!([]));

    let first = lobbies.recv().await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].white_player_id.as_deref(), Some("S1"));
    let second = lobbies.recv().await.unwrap();
    assert!(second.is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_and_payloads_are_dropped() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());
    let mut game = session.subscribe_game("L1").unwrap();
    session.ready().await.unwrap();

    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;
    let id = broker.expect_subscribe("/topic/game").await;

    broker.push("NOT A FRAME\n\n\0");
    broker.push(&format!("MESSAGE\ncontent-length:{}\n\nx\0", usize::MAX));
    broker.message(&id, "/topic/game", &json!({"type": "MOVE"}));
    broker.message(&id, "/topic/game", &json!({"lobbyId": "L1", "type": "MOVE", "content": 3}));
    broker.push("\n");
    broker.message(&id, "/topic/game", &move_json("L1", AFTER_E4, false));

    let envelope = game.recv().await.unwrap();
    assert_eq!(envelope.white_turn, Some(false));
    assert!(session.is_connected());

    session.shutdown().await;
}

#[tokio::test]
async fn broker_error_frame_is_reported() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, mut events) = TransportSession::start(connector, config());
    session.ready().await.unwrap();
    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Connected { .. }
    ));

    let broker = links.recv().await.unwrap();
    broker.error("Lobby not found: L9");

    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::BrokerError {
            message: "Lobby not found: L9".into()
        }
    );

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Connection loss and explicit disconnect
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn lost_connection_reconnects_with_empty_registry() {
    let (connector, mut links, attempts) = MockConnector::new([Attempt::Accept, Attempt::Accept]);
    let (mut session, mut events) = TransportSession::start(connector, config());

    let mut game = session.subscribe_game("L1").unwrap();
    session.ready().await.unwrap();
    let mut first = links.recv().await.unwrap();
    first.expect(Command::Connect).await;
    let old_id = first.expect_subscribe("/topic/game").await;

    first.message(&old_id, "/topic/game", &move_json("L1", "a", false));
    assert!(game.recv().await.is_some());

    let lost_at = Instant::now();
    first.hang_up();
    assert!(game.recv().await.is_none(), "old handler must be dropped");

    let mut second = links.recv().await.unwrap();
    assert!(lost_at.elapsed() >= Duration::from_secs(5));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(session.ready().await.unwrap(), "S2");
    assert_eq!(session.session_id().await.as_deref(), Some("S2"));

    // Nothing was re-subscribed: the first frame after CONNECT is ours.
    second.expect(Command::Connect).await;
    second.message(&old_id, "/topic/game", &move_json("L1", "b", true));
    session.join_lobby("L1").unwrap();
    second.expect_send("/app/join").await;

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(matches!(kinds[0], SessionEvent::Connected { .. }));
    assert!(matches!(
        kinds[1],
        SessionEvent::Disconnected { reason: Some(_) }
    ));
    assert!(matches!(kinds[2], SessionEvent::Connected { .. }));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn receive_error_is_treated_as_connection_loss() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept, Attempt::Accept]);
    let (mut session, _events) = TransportSession::start(connector, config());
    session.ready().await.unwrap();

    let first = links.recv().await.unwrap();
    first.fail("connection reset");
    settle().await;
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert!(session.session_id().await.is_none());
    assert!(first.client_closed());

    assert_eq!(session.ready().await.unwrap(), "S2");
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_tears_down_and_stops_retrying() {
    let (connector, mut links, attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, mut events) = TransportSession::start(connector, config());

    let mut game = session.subscribe_game("L1").unwrap();
    let _chat = session.subscribe_chat("L1").unwrap();
    session.ready().await.unwrap();
    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;
    broker.expect_subscribe("/topic/game").await;
    broker.expect_subscribe("/topic/chat/L1").await;

    session.disconnect().unwrap();
    broker.expect(Command::Unsubscribe).await;
    broker.expect(Command::Unsubscribe).await;
    broker.expect(Command::Disconnect).await;
    assert!(broker.next_frame().await.is_none());
    assert!(broker.client_closed());
    assert!(game.recv().await.is_none());

    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert!(session.session_id().await.is_none());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    // Disconnect while idle is a no-op.
    session.disconnect().unwrap();
    settle().await;

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert_eq!(kinds.len(), 2);
    assert_eq!(kinds[1], SessionEvent::Disconnected { reason: None });

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_ready() {
    let (connector, _links, _attempts) = MockConnector::new([Attempt::Fail("down")]);
    let (mut session, mut events) = TransportSession::start(connector, config());

    let handle = session.handle();
    let waiter = tokio::spawn(async move { handle.ready().await });
    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::ConnectFailed { .. }
    ));

    session.disconnect().unwrap();
    assert!(matches!(
        waiter.await.unwrap(),
        Err(SessionError::ConnectCancelled)
    ));

    session.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_transport_and_ends_events() {
    let (connector, mut links, _attempts) = MockConnector::new([Attempt::Accept]);
    let (mut session, mut events) = TransportSession::start(connector, config());
    session.ready().await.unwrap();
    let mut broker = links.recv().await.unwrap();

    session.shutdown().await;

    broker.expect(Command::Connect).await;
    broker.expect(Command::Disconnect).await;
    assert!(broker.client_closed());

    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Connected { .. }
    ));
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Disconnected {
            reason: Some("session shut down".into())
        }
    );
    assert!(events.recv().await.is_none());
    assert!(matches!(session.connect(), Err(SessionError::SessionClosed)));
}
