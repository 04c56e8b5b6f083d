//! One joined lobby: its subscriptions, its view and its action gate.
//!
//! [`LobbyScope::enter`] subscribes to the lobby's game and chat channels,
//! waits for the session, and announces the player. Dropping the scope
//! closes both receivers and then unsubscribes both channels, so no message
//! for the lobby is delivered after it is gone. The session itself stays up.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::Result;
use crate::gate::{ActionGate, ProposedAction, SubmitError};
use crate::protocol::{Color, GameEnvelope, LobbyId, SessionId};
use crate::registry::ChannelKey;
use crate::session::SessionHandle;
use crate::view::{LobbyView, ViewChanges};

type Envelopes = mpsc::UnboundedReceiver<GameEnvelope>;

/// A lobby the local player has joined.
#[derive(Debug)]
pub struct LobbyScope {
    session: SessionHandle,
    gate: ActionGate,
    player_name: String,
    session_id: SessionId,
    view: LobbyView,
    game_rx: Option<Envelopes>,
    chat_rx: Option<Envelopes>,
}

impl LobbyScope {
    /// Subscribe to `lobby_id`, wait for the connection and send `JOIN`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectCancelled`](crate::SessionError::ConnectCancelled)
    /// if the session is disconnected while waiting, or
    /// [`SessionError::NotConnected`](crate::SessionError::NotConnected) if the
    /// connection drops before `JOIN` is sent.
    pub async fn enter(
        session: SessionHandle,
        lobby_id: impl Into<LobbyId>,
        player_name: impl Into<String>,
    ) -> Result<Self> {
        let lobby_id = lobby_id.into();
        let mut scope = Self {
            gate: ActionGate::new(session.clone(), lobby_id.clone()),
            session,
            player_name: player_name.into(),
            session_id: SessionId::new(),
            view: LobbyView::new(lobby_id),
            game_rx: None,
            chat_rx: None,
        };
        scope.resubscribe().await?;
        Ok(scope)
    }

    /// Subscribe again after the connection was lost and join under the new
    /// session id. The view is kept; the broker's `STATE` reply refreshes it.
    ///
    /// # Errors
    ///
    /// Same as [`enter`](Self::enter).
    pub async fn resubscribe(&mut self) -> Result<()> {
        let lobby_id = self.view.lobby_id().to_string();
        self.game_rx = Some(self.session.subscribe_game(lobby_id.clone())?);
        self.chat_rx = Some(self.session.subscribe_chat(lobby_id.clone())?);
        self.session_id = self.session.ready().await?;
        self.view.refresh_identity(Some(&self.session_id));
        self.session.join_lobby(lobby_id.clone())?;
        info!(lobby_id = %lobby_id, session_id = %self.session_id, "joined lobby");
        Ok(())
    }

    pub fn lobby_id(&self) -> &str {
        self.view.lobby_id()
    }

    pub fn view(&self) -> &LobbyView {
        &self.view
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    /// Session id the lobby was joined under.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the next message on either channel and reduce it.
    ///
    /// Returns `None` once both channels have closed, which happens when the
    /// connection is lost; call [`resubscribe`](Self::resubscribe) to continue.
    pub async fn next_change(&mut self) -> Option<ViewChanges> {
        let envelope = self.next_envelope().await?;
        Some(self.view.apply(&envelope, Some(&self.session_id)))
    }

    /// Gate `action` against the current view and send it if admitted.
    ///
    /// # Errors
    ///
    /// See [`ActionGate::submit`].
    pub fn submit(&self, action: &ProposedAction) -> std::result::Result<(), SubmitError> {
        self.gate.submit(&self.view, action)
    }

    /// Ask the broker for a seat.
    ///
    /// # Errors
    ///
    /// See [`ActionGate::submit`].
    pub fn claim(&self, color: Color) -> std::result::Result<(), SubmitError> {
        self.submit(&ProposedAction::ColorClaim(color))
    }

    /// Send a chat line under this scope's player name.
    ///
    /// # Errors
    ///
    /// See [`ActionGate::submit`].
    pub fn chat(&self, content: impl Into<String>) -> std::result::Result<(), SubmitError> {
        self.submit(&ProposedAction::Chat {
            player_name: self.player_name.clone(),
            content: content.into(),
        })
    }

    /// Release the seat and leave the lobby.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`](crate::SessionError::NotConnected)
    /// if the seat could not be released; the channels are unsubscribed
    /// regardless.
    pub fn leave(self) -> Result<()> {
        self.session.leave_lobby(self.view.lobby_id())
    }

    async fn next_envelope(&mut self) -> Option<GameEnvelope> {
        loop {
            if self.game_rx.is_none() && self.chat_rx.is_none() {
                return None;
            }
            tokio::select! {
                envelope = recv_from(&mut self.game_rx) => match envelope {
                    Some(envelope) => return Some(envelope),
                    None => {
                        debug!(lobby_id = %self.view.lobby_id(), "game channel closed");
                        self.game_rx = None;
                    }
                },
                envelope = recv_from(&mut self.chat_rx) => match envelope {
                    Some(envelope) => return Some(envelope),
                    None => {
                        debug!(lobby_id = %self.view.lobby_id(), "chat channel closed");
                        self.chat_rx = None;
                    }
                },
            }
        }
    }
}

impl Drop for LobbyScope {
    fn drop(&mut self) {
        self.game_rx.take();
        self.chat_rx.take();
        let lobby_id = self.view.lobby_id().to_string();
        let _ = self.session.unsubscribe(ChannelKey::Game(lobby_id.clone()));
        let _ = self.session.unsubscribe(ChannelKey::Chat(lobby_id));
    }
}

async fn recv_from(rx: &mut Option<Envelopes>) -> Option<GameEnvelope> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
