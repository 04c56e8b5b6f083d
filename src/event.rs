//! Lifecycle events emitted by the transport session.
//!
//! Game, chat and lobby-list traffic is delivered on per-subscription
//! channels, not here. This channel only reports what happens to the
//! connection itself.

use std::time::Duration;

use crate::protocol::SessionId;

/// An event from the transport session's background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The STOMP handshake completed. `session_id` is the identity the broker
    /// knows this connection by.
    Connected { session_id: SessionId },
    /// A connect attempt failed; the next one starts after `retry_in`.
    ConnectFailed { reason: String, retry_in: Duration },
    /// An established connection ended. Every subscription was dropped with
    /// it; `reason` is `None` for an explicit disconnect.
    Disconnected { reason: Option<String> },
    /// The broker sent a STOMP `ERROR` frame.
    BrokerError { message: String },
}
