//! Transport implementations for the chess session.
//!
//! SockJS framing is always available; the WebSocket-backed transport and
//! connector sit behind a feature gate:
//!
//! | Feature                | Provides                                      |
//! |------------------------|-----------------------------------------------|
//! | (always)               | [`SockJsTransport`], SockJS endpoint helpers  |
//! | `transport-websocket`  | [`WebSocketTransport`], [`SockJsConnector`]   |

pub mod sockjs;

#[cfg(feature = "transport-websocket")]
pub mod websocket;

pub use sockjs::SockJsTransport;

#[cfg(feature = "transport-websocket")]
pub use websocket::{SockJsConnector, WebSocketTransport};
