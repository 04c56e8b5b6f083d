//! Wire types for the chess broker protocol.
//!
//! Every payload here matches the JSON the broker publishes on its topics and
//! accepts on its application destinations. Field names are camelCase on the
//! wire. Inbound envelopes are decoded in two steps: the loosely typed
//! envelope first, then the `content` according to `type`, so that a bad
//! payload is rejected as a whole before it reaches a view.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, SessionError};

// ── Type aliases ────────────────────────────────────────────────────

/// Identifier of a lobby (game room).
pub type LobbyId = String;

/// Opaque identifier issued by the transport for one connection.
///
/// The broker uses the same value as the player id, so it is the only way to
/// recognise the local player in `whitePlayerId`/`blackPlayerId`.
pub type SessionId = String;

// ── Destinations ────────────────────────────────────────────────────

/// Shared topic carrying MOVE/STATE/PLAYERS traffic for every lobby.
pub const GAME_TOPIC: &str = "/topic/game";

/// Topic carrying full lobby-list snapshots.
pub const LOBBIES_TOPIC: &str = "/topic/lobbies";

/// Per-lobby chat topic.
pub fn chat_topic(lobby_id: &str) -> String {
    format!("/topic/chat/{lobby_id}")
}

/// Board position in Forsyth–Edwards Notation for the standard opening.
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

// ── Enums ───────────────────────────────────────────────────────────

/// A side of the board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// The color whose turn it is, given the broker's `whiteTurn` flag.
    pub fn from_white_turn(white_turn: bool) -> Self {
        if white_turn {
            Self::White
        } else {
            Self::Black
        }
    }

    /// The other side.
    pub fn opponent(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    fn code(self) -> char {
        match self {
            Self::White => 'w',
            Self::Black => 'b',
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => f.write_str("white"),
            Self::Black => f.write_str("black"),
        }
    }
}

/// Result of a finished game as reported by the broker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WinningTeam {
    White,
    Black,
    Draw,
}

/// Kind of a chess piece. Serializes as its upper-case letter (`"Q"`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PieceKind {
    #[serde(rename = "P")]
    Pawn,
    #[serde(rename = "N")]
    Knight,
    #[serde(rename = "B")]
    Bishop,
    #[serde(rename = "R")]
    Rook,
    #[serde(rename = "Q")]
    Queen,
    #[serde(rename = "K")]
    King,
}

impl PieceKind {
    /// Upper-case letter used on the wire and in piece codes.
    pub fn letter(self) -> char {
        match self {
            Self::Pawn => 'P',
            Self::Knight => 'N',
            Self::Bishop => 'B',
            Self::Rook => 'R',
            Self::Queen => 'Q',
            Self::King => 'K',
        }
    }

    fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'P' => Some(Self::Pawn),
            'N' => Some(Self::Knight),
            'B' => Some(Self::Bishop),
            'R' => Some(Self::Rook),
            'Q' => Some(Self::Queen),
            'K' => Some(Self::King),
            _ => None,
        }
    }
}

/// Envelope `type` values seen on inbound topics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Move,
    State,
    Players,
    Chat,
    Join,
    Claim,
    Disconnect,
    /// Any type this client does not understand.
    #[serde(other)]
    Unknown,
}

/// Envelope `type` values this client publishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundKind {
    Move,
    Join,
    Claim,
    Chat,
    /// Release the local player's seat in a lobby.
    Disconnect,
}

impl OutboundKind {
    /// Application destination the broker routes this kind from.
    pub fn destination(self) -> &'static str {
        match self {
            Self::Move => "/app/move",
            Self::Join => "/app/join",
            Self::Claim => "/app/claim",
            Self::Chat => "/app/chat",
            Self::Disconnect => "/app/disconnect",
        }
    }
}

// ── Board primitives ────────────────────────────────────────────────

/// A square in algebraic notation, `a1` through `h8`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Square(String);

impl Square {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Square {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(file @ 'a'..='h'), Some(rank @ '1'..='8'), None) => {
                Ok(Self(format!("{file}{rank}")))
            }
            _ => Err(SessionError::InvalidSquare(s.to_string())),
        }
    }
}

impl TryFrom<String> for Square {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Square> for String {
    fn from(square: Square) -> Self {
        square.0
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A colored piece, written as a two-letter code such as `wP` or `bK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub color: Color,
    pub kind: PieceKind,
}

impl Piece {
    pub fn new(color: Color, kind: PieceKind) -> Self {
        Self { color, kind }
    }
}

impl FromStr for Piece {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let color = match chars.next() {
            Some('w') => Color::White,
            Some('b') => Color::Black,
            _ => return Err(SessionError::InvalidPiece(s.to_string())),
        };
        match (chars.next().and_then(PieceKind::from_letter), chars.next()) {
            (Some(kind), None) => Ok(Self { color, kind }),
            _ => Err(SessionError::InvalidPiece(s.to_string())),
        }
    }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.color.code(), self.kind.letter())
    }
}

/// An opaque board-position encoding (FEN as published by the broker).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    pub fn new(encoding: impl Into<String>) -> Self {
        Self(encoding.into())
    }

    /// The standard starting position.
    pub fn start() -> Self {
        Self(START_FEN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Position from a content value; empty or falsy content means the start.
    fn from_content(value: &Value) -> Result<Self> {
        match value {
            Value::Null | Value::Bool(false) => Ok(Self::start()),
            Value::String(s) if s.is_empty() => Ok(Self::start()),
            Value::String(s) => Ok(Self(s.clone())),
            other => Err(SessionError::Decode(format!(
                "board position must be a string, got {other}"
            ))),
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::start()
    }
}

// ── Payloads ────────────────────────────────────────────────────────

/// Seat assignments of a lobby. An empty string means the seat is open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Players {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub white_player_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub black_player_id: String,
}

impl Players {
    pub fn new(white_player_id: impl Into<String>, black_player_id: impl Into<String>) -> Self {
        Self {
            white_player_id: white_player_id.into(),
            black_player_id: black_player_id.into(),
        }
    }

    /// Player id holding `color`, or `""` if the seat is open.
    pub fn seat(&self, color: Color) -> &str {
        match color {
            Color::White => &self.white_player_id,
            Color::Black => &self.black_player_id,
        }
    }

    /// Color held by `session_id`, if any.
    ///
    /// White is checked first, so a snapshot naming the same id in both
    /// seats still yields a single color. An empty id never matches.
    pub fn color_of(&self, session_id: &str) -> Option<Color> {
        if session_id.is_empty() {
            None
        } else if self.white_player_id == session_id {
            Some(Color::White)
        } else if self.black_player_id == session_id {
            Some(Color::Black)
        } else {
            None
        }
    }
}

/// One chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLine {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub player_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

impl ChatLine {
    pub fn new(player_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            content: content.into(),
        }
    }
}

/// Full lobby snapshot carried by `STATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub position: Position,
    pub players: Players,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStateContent {
    #[serde(default)]
    board_state: Value,
    #[serde(default)]
    players: Players,
}

/// A lobby as listed on the lobby topic and by the REST collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySummary {
    pub id: LobbyId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default)]
    pub white_player_id: Option<String>,
    #[serde(default)]
    pub black_player_id: Option<String>,
}

impl LobbySummary {
    /// Whether the seat for `color` has no player.
    pub fn seat_open(&self, color: Color) -> bool {
        let seat = match color {
            Color::White => &self.white_player_id,
            Color::Black => &self.black_player_id,
        };
        seat.as_deref().is_none_or(str::is_empty)
    }
}

/// Body of an outbound MOVE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub from: Square,
    pub to: Square,
    /// Piece a pawn promotes to; serialized as `null` when absent.
    pub promotion: Option<PieceKind>,
}

// ── Envelopes ───────────────────────────────────────────────────────

/// Typed content of an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Move(Position),
    State(StateSnapshot),
    Players(Players),
    Chat(ChatLine),
    /// JOIN, CLAIM and unknown types carry nothing the view reduces.
    Other { kind: MessageKind, content: Value },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    lobby_id: LobbyId,
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    white_turn: Option<bool>,
    #[serde(default)]
    game_over: Option<bool>,
    #[serde(default)]
    winning_team: Option<WinningTeam>,
    #[serde(default)]
    game_end_reason: Option<String>,
    #[serde(default)]
    in_check: Option<bool>,
}

/// A decoded inbound message for one lobby.
///
/// Every optional field is applied independently by the view: absent means
/// "no information", not "false".
#[derive(Debug, Clone, PartialEq)]
pub struct GameEnvelope {
    pub lobby_id: LobbyId,
    pub payload: Payload,
    pub white_turn: Option<bool>,
    pub game_over: Option<bool>,
    pub winning_team: Option<WinningTeam>,
    pub game_end_reason: Option<String>,
    pub in_check: Option<bool>,
}

impl GameEnvelope {
    /// Decode an envelope published on a game or chat topic.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialization`] if the text is not an envelope
    /// and [`SessionError::Decode`] if its content does not fit its type.
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let payload = match raw.kind {
            MessageKind::Move => Payload::Move(Position::from_content(&raw.content)?),
            MessageKind::State => {
                let state: RawStateContent = serde_json::from_value(raw.content)?;
                Payload::State(StateSnapshot {
                    position: Position::from_content(&state.board_state)?,
                    players: state.players,
                })
            }
            MessageKind::Players => Payload::Players(serde_json::from_value(raw.content)?),
            MessageKind::Chat => Payload::Chat(serde_json::from_value(raw.content)?),
            kind => Payload::Other {
                kind,
                content: raw.content,
            },
        };
        Ok(Self {
            lobby_id: raw.lobby_id,
            payload,
            white_turn: raw.white_turn,
            game_over: raw.game_over,
            winning_team: raw.winning_team,
            game_end_reason: raw.game_end_reason,
            in_check: raw.in_check,
        })
    }
}

/// Decode a lobby-list snapshot. Anything but a JSON array is rejected.
///
/// # Errors
///
/// Returns [`SessionError::Decode`] for a non-array body and
/// [`SessionError::Serialization`] for malformed entries.
pub fn decode_lobby_list(text: &str) -> Result<Vec<LobbySummary>> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_array() {
        return Err(SessionError::Decode(format!(
            "lobby snapshot is not an array: {value}"
        )));
    }
    Ok(serde_json::from_value(value)?)
}

/// A message this client publishes to an application destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub lobby_id: LobbyId,
    #[serde(rename = "type")]
    pub kind: OutboundKind,
    pub content: Value,
}

impl OutboundEnvelope {
    pub fn join(lobby_id: impl Into<LobbyId>) -> Self {
        Self {
            lobby_id: lobby_id.into(),
            kind: OutboundKind::Join,
            content: Value::Null,
        }
    }

    pub fn leave(lobby_id: impl Into<LobbyId>) -> Self {
        Self {
            lobby_id: lobby_id.into(),
            kind: OutboundKind::Disconnect,
            content: Value::Null,
        }
    }

    pub fn claim(lobby_id: impl Into<LobbyId>, color: Color) -> Self {
        Self {
            lobby_id: lobby_id.into(),
            kind: OutboundKind::Claim,
            content: Value::String(color.to_string()),
        }
    }

    /// # Errors
    ///
    /// Fails only if the move cannot be represented as JSON.
    pub fn movement(lobby_id: impl Into<LobbyId>, request: &MoveRequest) -> Result<Self> {
        Ok(Self {
            lobby_id: lobby_id.into(),
            kind: OutboundKind::Move,
            content: serde_json::to_value(request)?,
        })
    }

    /// # Errors
    ///
    /// Fails only if the line cannot be represented as JSON.
    pub fn chat(lobby_id: impl Into<LobbyId>, line: &ChatLine) -> Result<Self> {
        Ok(Self {
            lobby_id: lobby_id.into(),
            kind: OutboundKind::Chat,
            content: serde_json::to_value(line)?,
        })
    }

    /// Destination this envelope is published to.
    pub fn destination(&self) -> &'static str {
        self.kind.destination()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
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

    #[test]
    fn square_accepts_board_squares_only() {
        assert_eq!("e4".parse::<Square>().unwrap().as_str(), "e4");
        for bad in ["", "e", "i1", "a9", "a0", "e44", "E4"] {
            assert!(
                matches!(bad.parse::<Square>(), Err(SessionError::InvalidSquare(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn piece_codes_parse_and_display() {
        let piece: Piece = "bN".parse().unwrap();
        assert_eq!(piece, Piece::new(Color::Black, PieceKind::Knight));
        assert_eq!(piece.to_string(), "bN");
        assert!("xQ".parse::<Piece>().is_err());
        assert!("wZ".parse::<Piece>().is_err());
        assert!("wQQ".parse::<Piece>().is_err());
    }

    #[test]
    fn move_with_empty_content_is_start_position() {
        for content in [json!(""), json!(null), json!(false)] {
            let text = json!({"lobbyId": "L1", "type": "MOVE", "content": content}).to_string();
            let env = GameEnvelope::decode(&text).unwrap();
            assert_eq!(env.payload, Payload::Move(Position::start()));
        }
    }

    #[test]
    fn move_with_non_string_content_is_rejected() {
        let text = json!({"lobbyId": "L1", "type": "MOVE", "content": 7}).to_string();
        assert!(matches!(
            GameEnvelope::decode(&text),
            Err(SessionError::Decode(_))
        ));
    }

    #[test]
    fn state_envelope_decodes_snapshot_and_flags() {
        let text = json!({
            "lobbyId": "L1",
            "type": "STATE",
            "content": {
                "boardState": "8/8/8/8/8/8/8/8 w - - 0 1",
                "players": {"whitePlayerId": "S1", "blackPlayerId": null}
            },
            "whiteTurn": true,
            "gameOver": false,
            "winningTeam": null,
            "inCheck": false
        })
        .to_string();
        let env = GameEnvelope::decode(&text).unwrap();
        assert_eq!(env.white_turn, Some(true));
        assert_eq!(env.game_over, Some(false));
        assert_eq!(env.winning_team, None);
        match env.payload {
            Payload::State(state) => {
                assert_eq!(state.position.as_str(), "8/8/8/8/8/8/8/8 w - - 0 1");
                assert_eq!(state.players, Players::new("S1", ""));
            }
            other => panic!("expected State, got {other:?}"),
        }
    }

    #[test]
    fn absent_flags_stay_absent() {
        let text = json!({"lobbyId": "L1", "type": "CHAT",
            "content": {"playerName": "Ann", "content": "hi"}})
        .to_string();
        let env = GameEnvelope::decode(&text).unwrap();
        assert!(env.white_turn.is_none());
        assert!(env.game_over.is_none());
        assert!(env.in_check.is_none());
        assert_eq!(env.payload, Payload::Chat(ChatLine::new("Ann", "hi")));
    }

    #[test]
    fn unknown_type_is_kept_as_other() {
        let text = json!({"lobbyId": "L1", "type": "MOVE_COMMAND", "content": 1}).to_string();
        let env = GameEnvelope::decode(&text).unwrap();
        assert!(matches!(
            env.payload,
            Payload::Other {
                kind: MessageKind::Unknown,
                ..
            }
        ));
    }

    #[test]
    fn envelope_without_lobby_id_is_rejected() {
        let text = json!({"type": "MOVE", "content": ""}).to_string();
        assert!(GameEnvelope::decode(&text).is_err());
    }

    #[test]
    fn lobby_list_must_be_an_array() {
        let list = decode_lobby_list(
            r#"[{"id":"a","name":"first","whitePlayerId":"S1","blackPlayerId":null}]"#,
        )
        .unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list[0].seat_open(Color::White));
        assert!(list[0].seat_open(Color::Black));

        assert!(matches!(
            decode_lobby_list(r#"{"id":"a"}"#),
            Err(SessionError::Decode(_))
        ));
    }

    #[test]
    fn outbound_move_serializes_null_promotion() {
        let request = MoveRequest {
            from: "e2".parse().unwrap(),
            to: "e4".parse().unwrap(),
            promotion: None,
        };
        let env = OutboundEnvelope::movement("L1", &request).unwrap();
        assert_eq!(env.destination(), "/app/move");
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"lobbyId": "L1", "type": "MOVE",
                   "content": {"from": "e2", "to": "e4", "promotion": null}})
        );
    }

    #[test]
    fn outbound_claim_uses_lowercase_color() {
        let env = OutboundEnvelope::claim("L1", Color::Black);
        assert_eq!(env.destination(), "/app/claim");
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"lobbyId": "L1", "type": "CLAIM", "content": "black"})
        );
    }

    #[test]
    fn players_color_of_ignores_empty_session() {
        let players = Players::new("", "");
        assert_eq!(players.color_of(""), None);
        let players = Players::new("S1", "S2");
        assert_eq!(players.color_of("S1"), Some(Color::White));
        assert_eq!(players.color_of("S2"), Some(Color::Black));
        assert_eq!(players.color_of("S3"), None);
    }
}
