//! Local admission control for player actions.
//!
//! The gate answers one question: given what the view currently shows, can
//! this action possibly succeed? If not, the player gets a [`Rejection`]
//! instead of a round trip. Admitted actions are encoded and published; the
//! broker stays authoritative and may still refuse them.
//!
//! Moves and promotions go through the same check.

use thiserror::Error;

use crate::error::SessionError;
use crate::protocol::{
    ChatLine, Color, LobbyId, MoveRequest, OutboundEnvelope, Piece, PieceKind, Square,
};
use crate::rejection::Rejection;
use crate::session::SessionHandle;
use crate::view::LobbyView;

/// An action the local player wants to take in a lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposedAction {
    Move {
        piece: Piece,
        from: Square,
        to: Square,
    },
    Promotion {
        piece: Piece,
        from: Square,
        to: Square,
        promote_to: PieceKind,
    },
    ColorClaim(Color),
    Chat {
        player_name: String,
        content: String,
    },
}

impl ProposedAction {
    /// Piece being moved, for moves and promotions.
    pub fn moved_piece(&self) -> Option<Piece> {
        match self {
            Self::Move { piece, .. } | Self::Promotion { piece, .. } => Some(*piece),
            Self::ColorClaim(_) | Self::Chat { .. } => None,
        }
    }
}

/// The parts of a lobby view the gate decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateContext {
    pub local_color: Option<Color>,
    pub turn: Color,
    pub game_over: bool,
}

impl GateContext {
    pub fn from_view(view: &LobbyView) -> Self {
        Self {
            local_color: view.local_color(),
            turn: view.game().turn(),
            game_over: view.game().game_over,
        }
    }
}

/// Decide whether `action` may be sent.
///
/// # Errors
///
/// Returns the [`Rejection`] to show the player.
pub fn admit(action: &ProposedAction, context: &GateContext) -> Result<(), Rejection> {
    match action {
        ProposedAction::Move { piece, .. } | ProposedAction::Promotion { piece, .. } => {
            admit_move(*piece, context)
        }
        ProposedAction::ColorClaim(_) => Ok(()),
        ProposedAction::Chat { content, .. } => admit_chat(content, context),
    }
}

fn admit_move(piece: Piece, context: &GateContext) -> Result<(), Rejection> {
    if context.game_over {
        return Err(Rejection::GameOver);
    }
    if context.local_color != Some(piece.color) {
        return Err(Rejection::NotYourPiece);
    }
    if piece.color != context.turn {
        return Err(Rejection::NotYourTurn);
    }
    Ok(())
}

fn admit_chat(content: &str, context: &GateContext) -> Result<(), Rejection> {
    if content.trim().is_empty() {
        return Err(Rejection::EmptyMessage);
    }
    match context.local_color {
        None => Err(Rejection::Spectator),
        Some(color) if color != context.turn => Err(Rejection::NotYourTurn),
        Some(_) => Ok(()),
    }
}

/// Admit `action` and encode it for `lobby_id`.
///
/// Chat names are decorated with the sender's color, as in `"Ann (white)"`.
///
/// # Errors
///
/// Returns [`SubmitError::Rejected`] if the gate refuses the action.
pub fn evaluate(
    lobby_id: &str,
    action: &ProposedAction,
    context: &GateContext,
) -> Result<OutboundEnvelope, SubmitError> {
    admit(action, context)?;
    let envelope = match action {
        ProposedAction::Move { from, to, .. } => OutboundEnvelope::movement(
            lobby_id,
            &MoveRequest {
                from: from.clone(),
                to: to.clone(),
                promotion: None,
            },
        )?,
        ProposedAction::Promotion {
            from,
            to,
            promote_to,
            ..
        } => OutboundEnvelope::movement(
            lobby_id,
            &MoveRequest {
                from: from.clone(),
                to: to.clone(),
                promotion: Some(*promote_to),
            },
        )?,
        ProposedAction::ColorClaim(color) => OutboundEnvelope::claim(lobby_id, *color),
        ProposedAction::Chat {
            player_name,
            content,
        } => {
            let name = match context.local_color {
                Some(color) => format!("{player_name} ({color})"),
                None => player_name.clone(),
            };
            OutboundEnvelope::chat(lobby_id, &ChatLine::new(name, content.clone()))?
        }
    };
    Ok(envelope)
}

/// Why [`ActionGate::submit`] did not publish an action.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Refused locally; show the reason to the player.
    #[error("{0}")]
    Rejected(#[from] Rejection),
    /// Admitted but could not be sent.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Gates actions for one lobby and publishes the admitted ones.
#[derive(Debug, Clone)]
pub struct ActionGate {
    session: SessionHandle,
    lobby_id: LobbyId,
}

impl ActionGate {
    pub fn new(session: SessionHandle, lobby_id: impl Into<LobbyId>) -> Self {
        Self {
            session,
            lobby_id: lobby_id.into(),
        }
    }

    pub fn lobby_id(&self) -> &str {
        &self.lobby_id
    }

    /// Check `action` against `view` and send it if admitted.
    ///
    /// The view is not touched; it changes when the broker echoes the result.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Rejected`] for a local refusal and
    /// [`SubmitError::Session`] if the session is not connected.
    pub fn submit(&self, view: &LobbyView, action: &ProposedAction) -> Result<(), SubmitError> {
        let envelope = evaluate(&self.lobby_id, action, &GateContext::from_view(view))?;
        self.session.send(&envelope)?;
        Ok(())
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
    use crate::protocol::OutboundKind;
    use serde_json::json;

    fn context(local: Option<Color>, turn: Color, game_over: bool) -> GateContext {
        GateContext {
            local_color: local,
            turn,
            game_over,
        }
    }

    fn pawn_move(color: Color) -> ProposedAction {
        ProposedAction::Move {
            piece: Piece::new(color, PieceKind::Pawn),
            from: "e2".parse().unwrap(),
            to: "e4".parse().unwrap(),
        }
    }

    fn promotion(color: Color) -> ProposedAction {
        ProposedAction::Promotion {
            piece: Piece::new(color, PieceKind::Pawn),
            from: "e7".parse().unwrap(),
            to: "e8".parse().unwrap(),
            promote_to: PieceKind::Queen,
        }
    }

    fn chat(content: &str) -> ProposedAction {
        ProposedAction::Chat {
            player_name: "Ann".into(),
            content: content.into(),
        }
    }

    #[test]
    fn move_and_promotion_share_decisions() {
        let cases = [
            (context(Some(Color::White), Color::White, false), Ok(())),
            (
                context(Some(Color::Black), Color::White, false),
                Err(Rejection::NotYourPiece),
            ),
            (
                context(None, Color::White, false),
                Err(Rejection::NotYourPiece),
            ),
            (
                context(Some(Color::White), Color::Black, false),
                Err(Rejection::NotYourTurn),
            ),
            (
                context(Some(Color::White), Color::White, true),
                Err(Rejection::GameOver),
            ),
        ];
        for (ctx, expected) in cases {
            assert_eq!(admit(&pawn_move(Color::White), &ctx), expected);
            assert_eq!(admit(&promotion(Color::White), &ctx), expected);
        }
    }

    #[test]
    fn game_over_rejects_regardless_of_turn() {
        for turn in [Color::White, Color::Black] {
            for local in [Some(Color::White), Some(Color::Black), None] {
                assert_eq!(
                    admit(&pawn_move(Color::White), &context(local, turn, true)),
                    Err(Rejection::GameOver)
                );
            }
        }
    }

    #[test]
    fn color_claim_is_always_admitted() {
        for game_over in [false, true] {
            let ctx = context(Some(Color::White), Color::Black, game_over);
            assert_eq!(admit(&ProposedAction::ColorClaim(Color::Black), &ctx), Ok(()));
        }
        let envelope = evaluate(
            "L1",
            &ProposedAction::ColorClaim(Color::White),
            &context(None, Color::White, false),
        )
        .unwrap();
        assert_eq!(envelope.kind, OutboundKind::Claim);
        assert_eq!(envelope.content, json!("white"));
    }

    #[test]
    fn chat_is_turn_gated() {
        assert_eq!(
            admit(&chat("hi"), &context(Some(Color::Black), Color::White, false)),
            Err(Rejection::NotYourTurn)
        );
        assert_eq!(
            admit(&chat("hi"), &context(None, Color::White, false)),
            Err(Rejection::Spectator)
        );
        assert_eq!(
            admit(&chat("   "), &context(Some(Color::White), Color::White, false)),
            Err(Rejection::EmptyMessage)
        );
        assert_eq!(
            admit(&chat("hi"), &context(Some(Color::White), Color::White, false)),
            Ok(())
        );
    }

    #[test]
    fn chat_name_carries_color() {
        let envelope = evaluate(
            "L1",
            &chat("good luck"),
            &context(Some(Color::Black), Color::Black, false),
        )
        .unwrap();
        assert_eq!(envelope.destination(), "/app/chat");
        assert_eq!(
            envelope.content,
            json!({"playerName": "Ann (black)", "content": "good luck"})
        );
    }

    #[test]
    fn promotion_encodes_piece_kind() {
        let envelope = evaluate(
            "L1",
            &promotion(Color::White),
            &context(Some(Color::White), Color::White, false),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"lobbyId": "L1", "type": "MOVE",
                   "content": {"from": "e7", "to": "e8", "promotion": "Q"}})
        );
    }

    #[test]
    fn rejected_evaluation_reports_reason() {
        let err = evaluate(
            "L1",
            &pawn_move(Color::White),
            &context(Some(Color::Black), Color::White, false),
        )
        .unwrap_err();
        assert!(matches!(err, SubmitError::Rejected(Rejection::NotYourPiece)));
        assert_eq!(err.to_string(), "That is not your piece.");
    }
}
