//! SockJS framing over a raw text transport.
//!
//! The broker exposes its STOMP endpoint through SockJS. On the raw
//! WebSocket leg of SockJS every server message is a one-letter frame type
//! followed by an optional JSON payload:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `o` | session open |
//! | `h` | heartbeat |
//! | `a["m1","m2"]` | one or more messages |
//! | `m"m1"` | one message |
//! | `c[3000,"Go away!"]` | session closed |
//!
//! Client messages are sent as a JSON array of strings.
//!
//! The negotiated endpoint has the shape `{base}/{server}/{session}/websocket`,
//! and the `{session}` segment is the identity the broker assigns to this
//! connection.

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::transport::Transport;

/// A decoded server-side SockJS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

/// Decode one SockJS server frame.
///
/// # Errors
///
/// Returns [`SessionError::Decode`] for an unknown frame type or a payload
/// that does not match it.
pub fn decode_frame(text: &str) -> Result<ServerFrame> {
    let mut chars = text.chars();
    let kind = chars.next();
    let payload = chars.as_str();
    match kind {
        Some('o') => Ok(ServerFrame::Open),
        Some('h') => Ok(ServerFrame::Heartbeat),
        Some('a') => Ok(ServerFrame::Messages(serde_json::from_str(payload)?)),
        Some('m') => Ok(ServerFrame::Messages(vec![serde_json::from_str(payload)?])),
        Some('c') => {
            let (code, reason): (u16, String) = serde_json::from_str(payload)?;
            Ok(ServerFrame::Close { code, reason })
        }
        _ => Err(SessionError::Decode(format!(
            "unknown SockJS frame {text:?}"
        ))),
    }
}

/// Encode client messages as a SockJS send frame.
///
/// # Errors
///
/// Fails only if serialization fails.
pub fn encode_messages(messages: &[String]) -> Result<String> {
    Ok(serde_json::to_string(messages)?)
}

/// Build the raw WebSocket endpoint for a SockJS base URL.
///
/// `http` and `https` bases are mapped to `ws` and `wss`.
///
/// # Errors
///
/// Returns [`SessionError::InvalidEndpoint`] for any other scheme.
pub fn sockjs_endpoint(base: &str, server_id: &str, session_id: &str) -> Result<String> {
    let base = base.trim_end_matches('/');
    let (scheme, rest) = base
        .split_once("://")
        .ok_or_else(|| SessionError::InvalidEndpoint(base.to_string()))?;
    let scheme = match scheme {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(SessionError::InvalidEndpoint(base.to_string())),
    };
    if rest.is_empty() {
        return Err(SessionError::InvalidEndpoint(base.to_string()));
    }
    Ok(format!("{scheme}://{rest}/{server_id}/{session_id}/websocket"))
}

/// Extract the session id (second-to-last path segment) from an endpoint.
pub fn session_id_from_endpoint(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let mut segments = path.rsplit('/');
    let _transport = segments.next()?;
    segments.next().filter(|segment| !segment.is_empty())
}

/// Random three-digit server id, as SockJS clients pick them.
pub fn random_server_id() -> String {
    format!("{:03}", uuid::Uuid::new_v4().as_u128() % 1000)
}

/// Random session id for a new SockJS endpoint.
pub fn random_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Wraps a raw text transport and applies SockJS framing in both directions.
///
/// # Cancel Safety
///
/// `recv` is cancel-safe provided the inner transport's `recv` is: messages
/// from a multi-message frame are buffered before any of them is returned.
#[derive(Debug)]
pub struct SockJsTransport<T> {
    inner: T,
    buffered: VecDeque<String>,
    closed: bool,
}

impl<T: Transport> SockJsTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buffered: VecDeque::new(),
            closed: false,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for SockJsTransport<T> {
    async fn send(&mut self, message: String) -> Result<()> {
        if self.closed {
            return Err(SessionError::TransportClosed);
        }
        let framed = encode_messages(std::slice::from_ref(&message))?;
        self.inner.send(framed).await
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(message) = self.buffered.pop_front() {
                return Some(Ok(message));
            }
            if self.closed {
                return None;
            }
            let text = match self.inner.recv().await? {
                Ok(text) => text,
                Err(e) => return Some(Err(e)),
            };
            match decode_frame(&text) {
                Ok(ServerFrame::Open) => debug!("SockJS session open"),
                Ok(ServerFrame::Heartbeat) => {}
                Ok(ServerFrame::Messages(messages)) => self.buffered.extend(messages),
                Ok(ServerFrame::Close { code, reason }) => {
                    debug!(code, reason = %reason, "SockJS session closed by server");
                    self.closed = true;
                }
                Err(e) => warn!(raw = %text, "dropping malformed SockJS frame: {e}"),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.buffered.clear();
        self.inner.close().await
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
    use std::sync::{Arc, Mutex as StdMutex};

    struct ScriptedTransport {
        incoming: VecDeque<String>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.incoming.pop_front().map(Ok)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn scripted(frames: &[&str]) -> (SockJsTransport<ScriptedTransport>, Arc<StdMutex<Vec<String>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let inner = ScriptedTransport {
            incoming: frames.iter().map(|f| f.to_string()).collect(),
            sent: Arc::clone(&sent),
        };
        (SockJsTransport::new(inner), sent)
    }

    #[test]
    fn decodes_every_frame_type() {
        assert_eq!(decode_frame("o").unwrap(), ServerFrame::Open);
        assert_eq!(decode_frame("h").unwrap(), ServerFrame::Heartbeat);
        assert_eq!(
            decode_frame(r#"a["x","y"]"#).unwrap(),
            ServerFrame::Messages(vec!["x".into(), "y".into()])
        );
        assert_eq!(
            decode_frame(r#"m"x""#).unwrap(),
            ServerFrame::Messages(vec!["x".into()])
        );
        assert_eq!(
            decode_frame(r#"c[3000,"Go away!"]"#).unwrap(),
            ServerFrame::Close {
                code: 3000,
                reason: "Go away!".into()
            }
        );
        assert!(decode_frame("z").is_err());
        assert!(decode_frame("a{").is_err());
        assert!(decode_frame("").is_err());
    }

    #[test]
    fn endpoint_maps_http_schemes() {
        assert_eq!(
            sockjs_endpoint("http://localhost:8080/ws", "123", "abc").unwrap(),
            "ws://localhost:8080/ws/123/abc/websocket"
        );
        assert_eq!(
            sockjs_endpoint("https://example.org/ws/", "001", "s").unwrap(),
            "wss://example.org/ws/001/s/websocket"
        );
        assert!(sockjs_endpoint("ftp://example.org/ws", "1", "s").is_err());
        assert!(sockjs_endpoint("localhost/ws", "1", "s").is_err());
    }

    #[test]
    fn session_id_is_second_to_last_segment() {
        assert_eq!(
            session_id_from_endpoint("ws://localhost:8080/ws/123/abcdef/websocket"),
            Some("abcdef")
        );
        assert_eq!(
            session_id_from_endpoint("ws://h/ws/1/s42/websocket?x=1"),
            Some("s42")
        );
        assert_eq!(session_id_from_endpoint("websocket"), None);
    }

    #[test]
    fn random_ids_fit_endpoint_shape() {
        let server = random_server_id();
        assert_eq!(server.len(), 3);
        assert!(server.chars().all(|c| c.is_ascii_digit()));
        let session = random_session_id();
        assert!(!session.contains('/'));
        assert_ne!(session, random_session_id());
    }

    #[tokio::test]
    async fn recv_unpacks_arrays_and_skips_control_frames() {
        let (mut transport, _sent) = scripted(&["o", "h", r#"a["one","two"]"#, "bogus", r#"m"three""#]);
        assert_eq!(transport.recv().await.unwrap().unwrap(), "one");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "two");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "three");
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_frame_ends_stream_and_blocks_send() {
        let (mut transport, _sent) = scripted(&["o", r#"c[3000,"bye"]"#, r#"a["late"]"#]);
        assert!(transport.recv().await.is_none());
        assert!(matches!(
            transport.send("x".into()).await,
            Err(SessionError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn send_wraps_message_in_array() {
        let (mut transport, sent) = scripted(&[]);
        transport.send("CONNECT\n\n\0".into()).await.unwrap();
        assert_eq!(sent.lock().unwrap()[0], r#"["CONNECT\n\n\u0000"]"#);
    }
}
