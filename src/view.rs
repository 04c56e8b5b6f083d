//! Local views reduced from authoritative broker messages.
//!
//! [`LobbyView::apply`] is the only writer of a lobby's [`GameView`] and
//! [`ChatLog`]. Local actions never touch them: a move shows up on the board
//! when the broker echoes it back, not when it is sent.

use tracing::debug;

use crate::protocol::{
    ChatLine, Color, GameEnvelope, LobbyId, LobbySummary, Payload, Players, Position, WinningTeam,
};

/// Board state of one lobby as last reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameView {
    pub position: Position,
    pub white_turn: bool,
    pub players: Players,
    pub in_check: bool,
    pub game_over: bool,
    /// `None` while the game is running (or ended without a reported result).
    pub winning_team: Option<WinningTeam>,
    pub game_end_reason: Option<String>,
}

impl Default for GameView {
    fn default() -> Self {
        Self {
            position: Position::start(),
            white_turn: true,
            players: Players::default(),
            in_check: false,
            game_over: false,
            winning_team: None,
            game_end_reason: None,
        }
    }
}

impl GameView {
    /// Color whose turn it is.
    pub fn turn(&self) -> Color {
        Color::from_white_turn(self.white_turn)
    }
}

/// Chat lines of one lobby in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatLog {
    lines: Vec<ChatLine>,
}

impl ChatLog {
    pub fn push(&mut self, line: ChatLine) {
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[ChatLine] {
        &self.lines
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl<'a> IntoIterator for &'a ChatLog {
    type Item = &'a ChatLine;
    type IntoIter = std::slice::Iter<'a, ChatLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

/// Where the local player stands in a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LobbyPhase {
    /// No snapshot has arrived since the view was created.
    Unjoined,
    /// Seated as `color`, or spectating when `None`.
    Joined { color: Option<Color> },
    GameOver,
}

/// Which parts of a [`LobbyView`] one envelope changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewChanges {
    pub position: bool,
    pub turn: bool,
    pub players: bool,
    pub local_color: bool,
    pub check: bool,
    pub game_over: bool,
    pub chat: bool,
}

impl ViewChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything the client knows about one lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyView {
    lobby_id: LobbyId,
    game: GameView,
    chat: ChatLog,
    local_color: Option<Color>,
    joined: bool,
}

impl LobbyView {
    /// Fresh view: start position, white to move, no players, no chat.
    pub fn new(lobby_id: impl Into<LobbyId>) -> Self {
        Self {
            lobby_id: lobby_id.into(),
            game: GameView::default(),
            chat: ChatLog::default(),
            local_color: None,
            joined: false,
        }
    }

    pub fn lobby_id(&self) -> &str {
        &self.lobby_id
    }

    pub fn game(&self) -> &GameView {
        &self.game
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// Color the local player holds, `None` for a spectator.
    pub fn local_color(&self) -> Option<Color> {
        self.local_color
    }

    pub fn phase(&self) -> LobbyPhase {
        if self.game.game_over {
            LobbyPhase::GameOver
        } else if self.joined {
            LobbyPhase::Joined {
                color: self.local_color,
            }
        } else {
            LobbyPhase::Unjoined
        }
    }

    /// Whether nobody holds `color`. Advisory only: the broker decides claims.
    pub fn seat_open(&self, color: Color) -> bool {
        self.game.players.seat(color).is_empty()
    }

    /// Reduce one inbound envelope into the view.
    ///
    /// `session_id` is the local player's current session id; the local
    /// color is re-derived from it on every `STATE` and `PLAYERS`.
    /// Envelopes for other lobbies are ignored.
    pub fn apply(&mut self, envelope: &GameEnvelope, session_id: Option<&str>) -> ViewChanges {
        let mut changes = ViewChanges::default();
        if envelope.lobby_id != self.lobby_id {
            debug!(
                lobby_id = %self.lobby_id,
                other = %envelope.lobby_id,
                "ignoring envelope for another lobby"
            );
            return changes;
        }

        // Chat lines carry the sender's view of the flags; they never move
        // the board.
        if let Payload::Chat(line) = &envelope.payload {
            self.chat.push(line.clone());
            changes.chat = true;
            return changes;
        }

        if let Some(white_turn) = envelope.white_turn {
            changes.turn = self.game.white_turn != white_turn;
            self.game.white_turn = white_turn;
        }

        if let Some(game_over) = envelope.game_over {
            if !self.game.game_over {
                self.game.game_over = game_over;
                self.game.winning_team = envelope.winning_team;
                self.game.game_end_reason = envelope.game_end_reason.clone();
                changes.game_over = game_over;
            }
        }

        if let Some(in_check) = envelope.in_check {
            changes.check = self.game.in_check != in_check;
            self.game.in_check = in_check;
        }

        match &envelope.payload {
            Payload::State(state) => {
                changes.position = self.game.position != state.position;
                self.game.position = state.position.clone();
                self.replace_players(&state.players, session_id, &mut changes);
                self.joined = true;
            }
            Payload::Players(players) => {
                self.replace_players(players, session_id, &mut changes);
                self.joined = true;
            }
            Payload::Move(position) => {
                changes.position = self.game.position != *position;
                self.game.position = position.clone();
            }
            Payload::Chat(_) | Payload::Other { .. } => {}
        }

        changes
    }

    /// Re-derive the local color from the last players snapshot, e.g. after
    /// the session id changed on reconnect. Returns whether it changed.
    pub fn refresh_identity(&mut self, session_id: Option<&str>) -> bool {
        let color = session_id.and_then(|id| self.game.players.color_of(id));
        let changed = color != self.local_color;
        self.local_color = color;
        changed
    }

    fn replace_players(
        &mut self,
        players: &Players,
        session_id: Option<&str>,
        changes: &mut ViewChanges,
    ) {
        changes.players = self.game.players != *players;
        self.game.players = players.clone();
        changes.local_color = self.refresh_identity(session_id);
    }
}

/// Lobbies open on the broker, replaced wholesale by every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyDirectory {
    lobbies: Vec<LobbySummary>,
}

impl LobbyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with a snapshot from the lobby topic.
    pub fn replace(&mut self, snapshot: Vec<LobbySummary>) {
        self.lobbies = snapshot;
    }

    /// Seed the list from the HTTP lobby listing before the first snapshot.
    pub fn seed(&mut self, listing: Vec<LobbySummary>) {
        self.replace(listing);
    }

    pub fn lobbies(&self) -> &[LobbySummary] {
        &self.lobbies
    }

    pub fn find(&self, lobby_id: &str) -> Option<&LobbySummary> {
        self.lobbies.iter().find(|lobby| lobby.id == lobby_id)
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: serde_json::Value) -> GameEnvelope {
        GameEnvelope::decode(&value.to_string()).unwrap()
    }

    fn players(white: &str, black: &str) -> GameEnvelope {
        envelope(json!({"lobbyId": "L1", "type": "PLAYERS",
            "content": {"whitePlayerId": white, "blackPlayerId": black}}))
    }

    #[test]
    fn new_view_starts_at_opening() {
        let view = LobbyView::new("L1");
        assert_eq!(view.game().position, Position::start());
        assert!(view.game().white_turn);
        assert_eq!(view.phase(), LobbyPhase::Unjoined);
        assert!(view.seat_open(Color::White));
        assert!(view.seat_open(Color::Black));
    }

    #[test]
    fn players_snapshot_assigns_color() {
        let mut view = LobbyView::new("L1");
        let changes = view.apply(&players("S1", ""), Some("S1"));
        assert!(changes.players);
        assert!(changes.local_color);
        assert_eq!(view.local_color(), Some(Color::White));
        assert_eq!(
            view.phase(),
            LobbyPhase::Joined {
                color: Some(Color::White)
            }
        );
        assert!(!view.seat_open(Color::White));
        assert!(view.seat_open(Color::Black));
    }

    #[test]
    fn replayed_snapshot_follows_new_session_id() {
        let mut view = LobbyView::new("L1");
        let snapshot = players("S1", "S2");
        view.apply(&snapshot, Some("S1"));
        assert_eq!(view.local_color(), Some(Color::White));

        view.apply(&snapshot, Some("S9"));
        assert_eq!(view.local_color(), None);

        view.apply(&snapshot, Some("S2"));
        assert_eq!(view.local_color(), Some(Color::Black));

        assert!(view.refresh_identity(None));
        assert_eq!(view.local_color(), None);
    }

    #[test]
    fn state_replaces_position_and_players() {
        let mut view = LobbyView::new("L1");
        let state = envelope(json!({"lobbyId": "L1", "type": "STATE", "whiteTurn": false,
            "content": {"boardState": "8/8/8/8/8/8/8/8 b - - 0 1",
                        "players": {"whitePlayerId": "S1", "blackPlayerId": "S2"}}}));
        let changes = view.apply(&state, Some("S2"));
        assert!(changes.position && changes.players && changes.turn);
        assert_eq!(view.game().position.as_str(), "8/8/8/8/8/8/8/8 b - - 0 1");
        assert_eq!(view.game().turn(), Color::Black);
        assert_eq!(view.local_color(), Some(Color::Black));
    }

    #[test]
    fn empty_move_resets_to_start() {
        let mut view = LobbyView::new("L1");
        view.apply(
            &envelope(json!({"lobbyId": "L1", "type": "MOVE", "content": "8/8/8/8/8/8/8/8 w - - 0 1"})),
            None,
        );
        assert_ne!(view.game().position, Position::start());
        view.apply(
            &envelope(json!({"lobbyId": "L1", "type": "MOVE", "content": ""})),
            None,
        );
        assert_eq!(view.game().position, Position::start());
    }

    #[test]
    fn chat_leaves_board_untouched() {
        let mut view = LobbyView::new("L1");
        let before = view.game().clone();
        let changes = view.apply(
            &envelope(json!({"lobbyId": "L1", "type": "CHAT", "whiteTurn": false,
                "gameOver": true, "inCheck": true,
                "content": {"playerName": "Ann (white)", "content": "hi"}})),
            Some("S1"),
        );
        assert_eq!(
            changes,
            ViewChanges {
                chat: true,
                ..ViewChanges::default()
            }
        );
        assert_eq!(view.game(), &before);
        assert_eq!(view.chat().lines(), &[ChatLine::new("Ann (white)", "hi")]);
    }

    #[test]
    fn chat_keeps_arrival_order_and_duplicates() {
        let mut view = LobbyView::new("L1");
        for text in ["a", "b", "a"] {
            view.apply(
                &envelope(json!({"lobbyId": "L1", "type": "CHAT",
                    "content": {"playerName": "P", "content": text}})),
                None,
            );
        }
        let contents: Vec<_> = view.chat().iter().map(|line| line.content.as_str()).collect();
        assert_eq!(contents, ["a", "b", "a"]);
    }

    #[test]
    fn game_over_is_sticky() {
        let mut view = LobbyView::new("L1");
        let over = envelope(json!({"lobbyId": "L1", "type": "MOVE", "content": "x",
            "gameOver": true, "winningTeam": "Black", "gameEndReason": "checkmate"}));
        let changes = view.apply(&over, None);
        assert!(changes.game_over);
        assert_eq!(view.phase(), LobbyPhase::GameOver);

        let not_over = envelope(json!({"lobbyId": "L1", "type": "STATE", "gameOver": false,
            "winningTeam": null,
            "content": {"boardState": "", "players": {"whitePlayerId": "", "blackPlayerId": ""}}}));
        view.apply(&not_over, None);
        assert!(view.game().game_over);
        assert_eq!(view.game().winning_team, Some(WinningTeam::Black));
        assert_eq!(view.game().game_end_reason.as_deref(), Some("checkmate"));
    }

    #[test]
    fn absent_flags_change_nothing() {
        let mut view = LobbyView::new("L1");
        view.apply(
            &envelope(json!({"lobbyId": "L1", "type": "MOVE", "content": "p",
                "whiteTurn": false, "inCheck": true})),
            None,
        );
        view.apply(
            &envelope(json!({"lobbyId": "L1", "type": "MOVE", "content": "q"})),
            None,
        );
        assert!(!view.game().white_turn);
        assert!(view.game().in_check);
    }

    #[test]
    fn other_lobby_is_ignored() {
        let mut view = LobbyView::new("L1");
        let foreign = envelope(json!({"lobbyId": "L2", "type": "MOVE", "content": "x",
            "whiteTurn": false}));
        assert!(view.apply(&foreign, None).is_empty());
        assert!(view.game().white_turn);
    }

    #[test]
    fn directory_replaces_wholesale() {
        let mut directory = LobbyDirectory::new();
        let summary = |id: &str| LobbySummary {
            id: id.into(),
            name: id.to_uppercase(),
            white_player_id: None,
            black_player_id: None,
        };
        directory.seed(vec![summary("a"), summary("b")]);
        assert_eq!(directory.len(), 2);
        directory.replace(vec![summary("c")]);
        assert_eq!(directory.len(), 1);
        assert!(directory.find("a").is_none());
        assert_eq!(directory.find("c").unwrap().name, "C");
        directory.replace(Vec::new());
        assert!(directory.is_empty());
    }
}
