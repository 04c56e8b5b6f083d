//! Transport seams for the chess session.
//!
//! A [`Transport`] is a bidirectional text channel to the broker. It knows
//! nothing about STOMP: the session writes encoded frames into it and reads
//! raw text back. A [`Connector`] opens a fresh transport on every connect
//! attempt and reports the session id the broker will know this connection
//! by, so reconnecting always yields a new identity.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use chess_session_client::error::SessionError;
//! use chess_session_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SessionError> {
//!         // Write one text message
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SessionError>> {
//!         // Read the next text message; None when closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;
use crate::protocol::SessionId;

/// A bidirectional text message transport to the broker.
///
/// Each call to [`send`](Transport::send) transmits one complete message and
/// each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because the
/// session polls it inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text message to the broker.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), SessionError>;

    /// Receive the next text message from the broker.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// An open transport together with the identity it was negotiated under.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub session_id: SessionId,
}

impl Connection {
    pub fn new(transport: impl Transport, session_id: impl Into<SessionId>) -> Self {
        Self {
            transport: Box::new(transport),
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Opens transports to the broker.
///
/// Called once per connect attempt, including every retry.
#[async_trait]
pub trait Connector: Send + 'static {
    /// Open a new transport.
    ///
    /// # Errors
    ///
    /// Any error is treated as a failed attempt and retried after the
    /// configured interval.
    async fn connect(&mut self) -> Result<Connection, SessionError>;
}
