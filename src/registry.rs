//! Topic subscription registry.
//!
//! Maps logical channels to delivery channels and STOMP subscription ids.
//! The registry is owned by the session task, which is its only writer; it
//! never touches the transport itself. Callers get the subscription id back
//! from [`insert`](SubscriptionRegistry::insert) and
//! [`remove`](SubscriptionRegistry::remove) and issue the frames.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::protocol::{
    chat_topic, decode_lobby_list, ChatLine, GameEnvelope, LobbyId, LobbySummary, Payload,
    GAME_TOPIC, LOBBIES_TOPIC,
};

/// A logical channel. At most one subscription exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// Game traffic for one lobby, carved out of the shared game topic.
    Game(LobbyId),
    /// Chat for one lobby.
    Chat(LobbyId),
    /// Lobby-list snapshots.
    LobbyList,
}

impl ChannelKey {
    /// Broker topic this channel is read from.
    pub fn destination(&self) -> String {
        match self {
            Self::Game(_) => GAME_TOPIC.to_string(),
            Self::Chat(lobby_id) => chat_topic(lobby_id),
            Self::LobbyList => LOBBIES_TOPIC.to_string(),
        }
    }

    /// Lobby this channel is filtered to, if any.
    pub fn lobby_id(&self) -> Option<&str> {
        match self {
            Self::Game(lobby_id) | Self::Chat(lobby_id) => Some(lobby_id),
            Self::LobbyList => None,
        }
    }
}

/// Where decoded messages for one subscription go.
#[derive(Debug)]
pub enum Route {
    Envelopes(mpsc::UnboundedSender<GameEnvelope>),
    Lobbies(mpsc::UnboundedSender<Vec<LobbySummary>>),
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// The envelope belongs to another lobby on a shared topic.
    Filtered,
    /// The body could not be decoded; it was logged and dropped.
    Malformed,
    /// The receiving side is gone. The entry should be unsubscribed.
    Closed,
    /// No entry has this subscription id (late delivery after removal).
    Unknown,
}

#[derive(Debug)]
struct Entry {
    id: String,
    route: Route,
}

/// Channel → route table plus the subscription-id index used to route
/// `MESSAGE` frames.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<ChannelKey, Entry>,
    by_id: HashMap<String, ChannelKey>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `route` for `key`, replacing any existing entry.
    ///
    /// Returns the new subscription id and, on replacement, the id of the
    /// entry that was displaced.
    pub fn insert(&mut self, key: ChannelKey, route: Route) -> (String, Option<String>) {
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        let replaced = self.remove(&key);
        debug!(id = %id, ?key, "registering subscription");
        self.by_id.insert(id.clone(), key.clone());
        self.entries.insert(
            key,
            Entry {
                id: id.clone(),
                route,
            },
        );
        (id, replaced)
    }

    /// Remove the entry for `key`. Returns its subscription id if it existed.
    pub fn remove(&mut self, key: &ChannelKey) -> Option<String> {
        let entry = self.entries.remove(key)?;
        self.by_id.remove(&entry.id);
        Some(entry.id)
    }

    /// Drop every entry, closing all delivery channels. Returns the ids.
    pub fn clear(&mut self) -> Vec<String> {
        self.by_id.clear();
        self.entries.drain().map(|(_, entry)| entry.id).collect()
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key registered under a subscription id.
    pub fn key_for(&self, subscription_id: &str) -> Option<&ChannelKey> {
        self.by_id.get(subscription_id)
    }

    /// Decode `body` for the subscription `subscription_id` and deliver it.
    pub fn dispatch(&self, subscription_id: &str, body: &str) -> DispatchOutcome {
        let Some(key) = self.by_id.get(subscription_id) else {
            debug!(subscription_id, "message for unknown subscription, dropping");
            return DispatchOutcome::Unknown;
        };
        let Some(entry) = self.entries.get(key) else {
            return DispatchOutcome::Unknown;
        };

        match (&entry.route, key) {
            (Route::Lobbies(tx), _) => match decode_lobby_list(body) {
                Ok(lobbies) => deliver(tx, lobbies),
                Err(e) => malformed(key, body, &e),
            },
            (Route::Envelopes(tx), ChannelKey::Chat(lobby_id)) => {
                match decode_chat(body, lobby_id) {
                    Ok(envelope) => filter_and_deliver(tx, lobby_id, envelope),
                    Err(e) => malformed(key, body, &e),
                }
            }
            (Route::Envelopes(tx), _) => match GameEnvelope::decode(body) {
                Ok(envelope) => match key.lobby_id() {
                    Some(lobby_id) => filter_and_deliver(tx, lobby_id, envelope),
                    None => deliver(tx, envelope),
                },
                Err(e) => malformed(key, body, &e),
            },
        }
    }
}

fn filter_and_deliver(
    tx: &mpsc::UnboundedSender<GameEnvelope>,
    lobby_id: &str,
    envelope: GameEnvelope,
) -> DispatchOutcome {
    if envelope.lobby_id != lobby_id {
        return DispatchOutcome::Filtered;
    }
    deliver(tx, envelope)
}

fn deliver<T>(tx: &mpsc::UnboundedSender<T>, message: T) -> DispatchOutcome {
    match tx.send(message) {
        Ok(()) => DispatchOutcome::Delivered,
        Err(_) => DispatchOutcome::Closed,
    }
}

fn malformed(key: &ChannelKey, body: &str, error: &SessionError) -> DispatchOutcome {
    warn!(?key, raw = %body, "dropping undecodable message: {error}");
    DispatchOutcome::Malformed
}

/// Decode a message from a lobby chat topic.
///
/// The topic carries either full envelopes or bare `{playerName, content}`
/// lines typed `CHAT` or `MOVE_COMMAND`. A bare line has no lobby id of its
/// own and is attributed to the lobby the topic belongs to.
fn decode_chat(body: &str, lobby_id: &str) -> Result<GameEnvelope> {
    let value: Value = serde_json::from_str(body)?;
    if value.get("lobbyId").is_some() {
        return GameEnvelope::decode(body);
    }
    if let Some(kind) = value.get("type").and_then(Value::as_str) {
        if !matches!(kind, "CHAT" | "MOVE_COMMAND") {
            return Err(SessionError::Decode(format!(
                "unexpected {kind} message on chat topic"
            )));
        }
    }
    let line: ChatLine = serde_json::from_value(value)?;
    Ok(GameEnvelope {
        lobby_id: lobby_id.to_string(),
        payload: Payload::Chat(line),
        white_turn: None,
        game_over: None,
        winning_team: None,
        game_end_reason: None,
        in_check: None,
    })
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

    fn game_route() -> (Route, mpsc::UnboundedReceiver<GameEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Route::Envelopes(tx), rx)
    }

    fn move_json(lobby_id: &str) -> String {
        json!({"lobbyId": lobby_id, "type": "MOVE", "content": ""}).to_string()
    }

    #[test]
    fn destinations_match_topics() {
        assert_eq!(ChannelKey::Game("L1".into()).destination(), "/topic/game");
        assert_eq!(ChannelKey::Chat("L1".into()).destination(), "/topic/chat/L1");
        assert_eq!(ChannelKey::LobbyList.destination(), "/topic/lobbies");
    }

    #[test]
    fn insert_replaces_existing_key() {
        let mut registry = SubscriptionRegistry::new();
        let (first, mut first_rx) = game_route();
        let (second, mut second_rx) = game_route();
        let key = ChannelKey::Game("L1".into());

        let (id1, replaced) = registry.insert(key.clone(), first);
        assert!(replaced.is_none());
        let (id2, replaced) = registry.insert(key.clone(), second);
        assert_eq!(replaced.as_deref(), Some(id1.as_str()));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.dispatch(&id1, &move_json("L1")), DispatchOutcome::Unknown);
        assert_eq!(registry.dispatch(&id2, &move_json("L1")), DispatchOutcome::Delivered);
        assert!(second_rx.try_recv().is_ok());
        // The displaced sender was dropped with its entry.
        assert!(matches!(
            first_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn game_channel_filters_other_lobbies() {
        let mut registry = SubscriptionRegistry::new();
        let (route, mut rx) = game_route();
        let (id, _) = registry.insert(ChannelKey::Game("L1".into()), route);

        assert_eq!(registry.dispatch(&id, &move_json("L2")), DispatchOutcome::Filtered);
        assert_eq!(registry.dispatch(&id, &move_json("L1")), DispatchOutcome::Delivered);
        assert_eq!(rx.try_recv().unwrap().lobby_id, "L1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_bodies_are_dropped() {
        let mut registry = SubscriptionRegistry::new();
        let (route, mut rx) = game_route();
        let (id, _) = registry.insert(ChannelKey::Game("L1".into()), route);

        assert_eq!(registry.dispatch(&id, "not json"), DispatchOutcome::Malformed);
        let bad_move = json!({"lobbyId": "L1", "type": "MOVE", "content": [1]}).to_string();
        assert_eq!(registry.dispatch(&id, &bad_move), DispatchOutcome::Malformed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn chat_channel_accepts_bare_lines() {
        let mut registry = SubscriptionRegistry::new();
        let (route, mut rx) = game_route();
        let (id, _) = registry.insert(ChannelKey::Chat("L1".into()), route);

        let bare = json!({"playerName": "Ann (white)", "content": "gg", "type": "CHAT"});
        assert_eq!(
            registry.dispatch(&id, &bare.to_string()),
            DispatchOutcome::Delivered
        );
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.lobby_id, "L1");
        assert_eq!(
            envelope.payload,
            Payload::Chat(ChatLine::new("Ann (white)", "gg"))
        );

        let other = json!({"lobbyId": "L2", "type": "CHAT",
            "content": {"playerName": "Bob", "content": "hi"}});
        assert_eq!(
            registry.dispatch(&id, &other.to_string()),
            DispatchOutcome::Filtered
        );

        let wrong_kind = json!({"type": "MOVE", "playerName": "x", "content": "y"});
        assert_eq!(
            registry.dispatch(&id, &wrong_kind.to_string()),
            DispatchOutcome::Malformed
        );
    }

    #[test]
    fn chat_channel_keeps_move_commands() {
        let mut registry = SubscriptionRegistry::new();
        let (route, mut rx) = game_route();
        let (id, _) = registry.insert(ChannelKey::Chat("L1".into()), route);

        let line = json!({"playerName": "System", "content": "Moved e4", "type": "MOVE_COMMAND"});
        assert_eq!(
            registry.dispatch(&id, &line.to_string()),
            DispatchOutcome::Delivered
        );
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.lobby_id, "L1");
        assert_eq!(
            envelope.payload,
            Payload::Chat(ChatLine::new("System", "Moved e4"))
        );
    }

    #[test]
    fn lobby_list_snapshots_are_delivered_whole() {
        let mut registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = registry.insert(ChannelKey::LobbyList, Route::Lobbies(tx));

        let body = json!([{"id": "a", "name": "A"}, {"id": "b", "name": "B"}]).to_string();
        assert_eq!(registry.dispatch(&id, &body), DispatchOutcome::Delivered);
        assert_eq!(rx.try_recv().unwrap().len(), 2);
        assert_eq!(registry.dispatch(&id, "{}"), DispatchOutcome::Malformed);
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let mut registry = SubscriptionRegistry::new();
        let (route, rx) = game_route();
        let key = ChannelKey::Game("L1".into());
        let (id, _) = registry.insert(key.clone(), route);
        drop(rx);

        assert_eq!(registry.key_for(&id), Some(&key));
        assert_eq!(registry.dispatch(&id, &move_json("L1")), DispatchOutcome::Closed);
    }

    #[test]
    fn clear_empties_both_indexes() {
        let mut registry = SubscriptionRegistry::new();
        let (a, _a_rx) = game_route();
        let (b, _b_rx) = game_route();
        let (id, _) = registry.insert(ChannelKey::Game("L1".into()), a);
        registry.insert(ChannelKey::Chat("L1".into()), b);

        let mut ids = registry.clear();
        ids.sort();
        assert_eq!(ids.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.key_for(&id).is_none());
        assert_eq!(registry.dispatch(&id, &move_json("L1")), DispatchOutcome::Unknown);
    }

    #[test]
    fn subscription_ids_are_unique() {
        let mut registry = SubscriptionRegistry::new();
        let (a, _a_rx) = game_route();
        let (b, _b_rx) = game_route();
        let key = ChannelKey::Game("L1".into());
        let (id1, _) = registry.insert(key.clone(), a);
        registry.remove(&key);
        let (id2, _) = registry.insert(key, b);
        assert_ne!(id1, id2);
    }
}
