#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end lobby scenarios: join, reduce broker traffic, gate actions.

mod common;

use serde_json::json;

use chess_session_client::stomp::Command;
use chess_session_client::view::LobbyPhase;
use chess_session_client::{
    Color, LobbyScope, Piece, PieceKind, ProposedAction, Rejection, SubmitError, TransportSession,
};

use common::{
    chat_json, config, move_json, players_json, state_json, Attempt, BrokerEnd, MockConnector,
    AFTER_E4,
};

const AFTER_E5: &str = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2";

struct Joined {
    session: TransportSession,
    lobby: LobbyScope,
    broker: BrokerEnd,
    game_id: String,
    chat_id: String,
}

/// Start a session, enter lobby `L1` as "Ann" and consume the join traffic.
async fn join(script: Vec<Attempt>) -> (Joined, tokio::sync::mpsc::UnboundedReceiver<BrokerEnd>) {
    let (connector, mut links, _attempts) = MockConnector::new(script);
    let (session, _events) = TransportSession::start(connector, config());

    let lobby = LobbyScope::enter(session.handle(), "L1", "Ann").await.unwrap();
    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;
    let game_id = broker.expect_subscribe("/topic/game").await;
    let chat_id = broker.expect_subscribe("/topic/chat/L1").await;
    assert_eq!(
        broker.expect_send("/app/join").await,
        json!({"lobbyId": "L1", "type": "JOIN", "content": null})
    );

    let joined = Joined {
        session,
        lobby,
        broker,
        game_id,
        chat_id,
    };
    (joined, links)
}

fn white_pawn(from: &str, to: &str) -> ProposedAction {
    ProposedAction::Move {
        piece: Piece::new(Color::White, PieceKind::Pawn),
        from: from.parse().unwrap(),
        to: to.parse().unwrap(),
    }
}

#[tokio::test]
async fn enter_joins_under_session_id() {
    let (mut joined, _links) = join(vec![Attempt::Accept]).await;

    assert_eq!(joined.lobby.session_id(), "S1");
    assert_eq!(joined.lobby.lobby_id(), "L1");
    assert_eq!(joined.lobby.view().phase(), LobbyPhase::Unjoined);

    joined
        .broker
        .message(&joined.game_id, "/topic/game", &players_json("L1", "S1", ""));
    let changes = joined.lobby.next_change().await.unwrap();
    assert!(changes.players);
    assert!(changes.local_color);
    assert_eq!(joined.lobby.view().local_color(), Some(Color::White));
    assert_eq!(
        joined.lobby.view().phase(),
        LobbyPhase::Joined {
            color: Some(Color::White)
        }
    );
    assert!(joined.lobby.view().seat_open(Color::Black));

    joined.session.shutdown().await;
}

#[tokio::test]
async fn moves_follow_broker_turns_without_local_updates() {
    let (mut joined, _links) = join(vec![Attempt::Accept]).await;
    let game_id = joined.game_id.clone();

    joined
        .broker
        .message(&game_id, "/topic/game", &players_json("L1", "S1", "S7"));
    joined.lobby.next_change().await.unwrap();

    joined
        .broker
        .message(&game_id, "/topic/game", &move_json("L1", AFTER_E4, false));
    let changes = joined.lobby.next_change().await.unwrap();
    assert!(changes.position);
    assert!(changes.turn);
    assert_eq!(joined.lobby.view().game().position.as_str(), AFTER_E4);
    assert_eq!(joined.lobby.view().game().turn(), Color::Black);

    let err = joined.lobby.submit(&white_pawn("d2", "d4")).unwrap_err();
    assert!(matches!(err, SubmitError::Rejected(Rejection::NotYourTurn)));

    let black_pawn = ProposedAction::Move {
        piece: Piece::new(Color::Black, PieceKind::Pawn),
        from: "e7".parse().unwrap(),
        to: "e5".parse().unwrap(),
    };
    let err = joined.lobby.submit(&black_pawn).unwrap_err();
    assert!(matches!(err, SubmitError::Rejected(Rejection::NotYourPiece)));

    joined
        .broker
        .message(&game_id, "/topic/game", &move_json("L1", AFTER_E5, true));
    joined.lobby.next_change().await.unwrap();

    joined.lobby.submit(&white_pawn("d2", "d4")).unwrap();
    assert_eq!(
        joined.broker.expect_send("/app/move").await,
        json!({"lobbyId": "L1", "type": "MOVE",
               "content": {"from": "d2", "to": "d4", "promotion": null}})
    );
    // The board only changes when the broker echoes the move.
    assert_eq!(joined.lobby.view().game().position.as_str(), AFTER_E5);
    assert_eq!(joined.lobby.view().game().turn(), Color::White);

    joined.session.shutdown().await;
}

#[tokio::test]
async fn chat_round_trip_carries_color_and_ignores_flags() {
    let (mut joined, _links) = join(vec![Attempt::Accept]).await;
    let game_id = joined.game_id.clone();
    let chat_id = joined.chat_id.clone();

    joined.broker.message(
        &game_id,
        "/topic/game",
        &state_json("L1", AFTER_E4, "S7", "S1", false),
    );
    joined.lobby.next_change().await.unwrap();
    assert_eq!(joined.lobby.view().local_color(), Some(Color::Black));

    joined.lobby.chat("good luck").unwrap();
    assert_eq!(
        joined.broker.expect_send("/app/chat").await,
        json!({"lobbyId": "L1", "type": "CHAT",
               "content": {"playerName": "Ann (black)", "content": "good luck"}})
    );

    let mut echo = chat_json("L1", "Ann (black)", "good luck");
    echo["whiteTurn"] = json!(true);
    echo["gameOver"] = json!(true);
    joined.broker.message(&chat_id, "/topic/chat/L1", &echo);

    let changes = joined.lobby.next_change().await.unwrap();
    assert!(changes.chat);
    assert!(!changes.turn);
    assert!(!changes.game_over);
    let view = joined.lobby.view();
    assert_eq!(view.chat().len(), 1);
    assert_eq!(view.chat().lines()[0].player_name, "Ann (black)");
    assert_eq!(view.game().turn(), Color::Black);
    assert!(!view.game().game_over);

    let err = joined.lobby.chat("   ").unwrap_err();
    assert!(matches!(err, SubmitError::Rejected(Rejection::EmptyMessage)));

    joined.session.shutdown().await;
}

#[tokio::test]
async fn spectator_can_claim_but_not_chat() {
    let (mut joined, _links) = join(vec![Attempt::Accept]).await;
    let game_id = joined.game_id.clone();

    joined
        .broker
        .message(&game_id, "/topic/game", &players_json("L1", "S7", ""));
    joined.lobby.next_change().await.unwrap();
    assert_eq!(
        joined.lobby.view().phase(),
        LobbyPhase::Joined { color: None }
    );

    let err = joined.lobby.chat("hello").unwrap_err();
    assert!(matches!(err, SubmitError::Rejected(Rejection::Spectator)));

    joined.lobby.claim(Color::Black).unwrap();
    assert_eq!(
        joined.broker.expect_send("/app/claim").await,
        json!({"lobbyId": "L1", "type": "CLAIM", "content": "black"})
    );

    joined
        .broker
        .message(&game_id, "/topic/game", &players_json("L1", "S7", "S1"));
    let changes = joined.lobby.next_change().await.unwrap();
    assert!(changes.local_color);
    assert_eq!(joined.lobby.view().local_color(), Some(Color::Black));

    joined.session.shutdown().await;
}

#[tokio::test]
async fn game_over_is_sticky_and_blocks_moves() {
    let (mut joined, _links) = join(vec![Attempt::Accept]).await;
    let game_id = joined.game_id.clone();

    joined
        .broker
        .message(&game_id, "/topic/game", &players_json("L1", "S1", "S7"));
    joined.lobby.next_change().await.unwrap();

    let mut mate = move_json("L1", AFTER_E4, true);
    mate["gameOver"] = json!(true);
    mate["winningTeam"] = json!("Black");
    mate["gameEndReason"] = json!("Checkmate");
    joined.broker.message(&game_id, "/topic/game", &mate);
    let changes = joined.lobby.next_change().await.unwrap();
    assert!(changes.game_over);
    assert_eq!(joined.lobby.view().phase(), LobbyPhase::GameOver);
    assert_eq!(
        joined.lobby.view().game().game_end_reason.as_deref(),
        Some("Checkmate")
    );

    let mut late = move_json("L1", AFTER_E4, true);
    late["gameOver"] = json!(false);
    joined.broker.message(&game_id, "/topic/game", &late);
    joined.lobby.next_change().await.unwrap();
    assert!(joined.lobby.view().game().game_over);

    let err = joined.lobby.submit(&white_pawn("d2", "d4")).unwrap_err();
    assert!(matches!(err, SubmitError::Rejected(Rejection::GameOver)));

    joined.session.shutdown().await;
}

#[tokio::test]
async fn dropping_scope_unsubscribes_both_channels() {
    let (joined, _links) = join(vec![Attempt::Accept]).await;
    let Joined {
        mut session,
        lobby,
        mut broker,
        game_id,
        chat_id,
    } = joined;

    drop(lobby);
    let first = broker.expect(Command::Unsubscribe).await;
    let second = broker.expect(Command::Unsubscribe).await;
    let mut ids = vec![
        first.header("id").unwrap().to_string(),
        second.header("id").unwrap().to_string(),
    ];
    ids.sort();
    let mut expected = vec![game_id, chat_id];
    expected.sort();
    assert_eq!(ids, expected);
    assert!(session.is_connected());

    session.shutdown().await;
}

#[tokio::test]
async fn leave_releases_seat_then_unsubscribes() {
    let (joined, _links) = join(vec![Attempt::Accept]).await;
    let Joined {
        mut session,
        lobby,
        mut broker,
        ..
    } = joined;

    lobby.leave().unwrap();
    assert_eq!(
        broker.expect_send("/app/disconnect").await,
        json!({"lobbyId": "L1", "type": "DISCONNECT", "content": null})
    );
    broker.expect(Command::Unsubscribe).await;
    broker.expect(Command::Unsubscribe).await;

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_rejoins_under_new_session_id() {
    let (mut joined, mut links) = join(vec![Attempt::Accept, Attempt::Accept]).await;
    let game_id = joined.game_id.clone();

    joined
        .broker
        .message(&game_id, "/topic/game", &players_json("L1", "S1", ""));
    joined.lobby.next_change().await.unwrap();
    assert_eq!(joined.lobby.view().local_color(), Some(Color::White));

    joined.broker.hang_up();
    assert!(joined.lobby.next_change().await.is_none());
    assert!(matches!(
        joined.lobby.submit(&white_pawn("e2", "e4")),
        Err(SubmitError::Session(_))
    ));

    joined.lobby.resubscribe().await.unwrap();
    assert_eq!(joined.lobby.session_id(), "S2");
    // The stale seat belongs to the old session id.
    assert_eq!(joined.lobby.view().local_color(), None);

    let mut broker = links.recv().await.unwrap();
    broker.expect(Command::Connect).await;
    let game_id = broker.expect_subscribe("/topic/game").await;
    broker.expect_subscribe("/topic/chat/L1").await;
    broker.expect_send("/app/join").await;

    broker.message(
        &game_id,
        "/topic/game",
        &state_json("L1", AFTER_E4, "S2", "", false),
    );
    let changes = joined.lobby.next_change().await.unwrap();
    assert!(changes.local_color);
    assert_eq!(joined.lobby.view().local_color(), Some(Color::White));
    assert_eq!(joined.lobby.view().game().position.as_str(), AFTER_E4);

    joined.session.shutdown().await;
}
