//! Reasons the local action gate refuses to forward an action.
//!
//! A rejection is not a failure: it is the designed answer to a proposed
//! action that the current view says cannot succeed. The authoritative server
//! may still refuse actions the gate admits.

use std::fmt;

/// Why a proposed action was refused locally.
///
/// Use [`description()`](Rejection::description) (or `Display`) for the text
/// shown to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// The game in this lobby has ended.
    GameOver,
    /// The moved piece belongs to the other color (or the player has no color).
    NotYourPiece,
    /// The moved piece, or the chatting player, does not hold the turn.
    NotYourTurn,
    /// The player has not claimed a color and cannot chat.
    Spectator,
    /// The chat message is empty after trimming whitespace.
    EmptyMessage,
}

impl Rejection {
    /// Returns a human-readable explanation of this rejection.
    pub fn description(&self) -> &'static str {
        match self {
            Self::GameOver => "The game is over.",
            Self::NotYourPiece => "That is not your piece.",
            Self::NotYourTurn => "It's not your turn!",
            Self::Spectator => "Join a color to chat and make moves.",
            Self::EmptyMessage => "Type a message before sending.",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for Rejection {}
