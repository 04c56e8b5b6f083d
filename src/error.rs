//! Error types for the chess session client.

use thiserror::Error;

/// Errors that can occur when using the chess session client.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Opening the transport or completing the STOMP handshake failed.
    ///
    /// The session recovers from this on its own by retrying after the
    /// configured interval; callers only see it in `ConnectFailed` events.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Attempted a send while the session is not connected.
    #[error("not connected to broker")]
    NotConnected,

    /// The background session task has exited (shut down or dropped).
    #[error("session has shut down")]
    SessionClosed,

    /// A pending connect was abandoned by an explicit disconnect or shutdown.
    #[error("connect was cancelled")]
    ConnectCancelled,

    /// Failed to serialize or deserialize a JSON payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound frame or payload was malformed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The broker sent a STOMP `ERROR` frame.
    #[error("broker error: {0}")]
    Broker(String),

    /// The configured endpoint URL could not be used.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A square was not in algebraic notation (`a1`..`h8`).
    #[error("invalid square: {0:?}")]
    InvalidSquare(String),

    /// A piece code was not of the form `wP`, `bK`, ...
    #[error("invalid piece code: {0:?}")]
    InvalidPiece(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for chess session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
