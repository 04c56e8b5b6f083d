//! WebSocket transport and SockJS connector using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries raw text frames. [`SockJsConnector`] opens
//! one per connect attempt against a freshly negotiated SockJS endpoint and
//! wraps it in [`SockJsTransport`], so every reconnect gets a new session id.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is
//! enabled (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), chess_session_client::SessionError> {
//! use chess_session_client::transport::Connector;
//! use chess_session_client::SockJsConnector;
//!
//! let mut connector = SockJsConnector::new("http://localhost:8080/ws");
//! let connection = connector.connect().await?;
//! println!("session id: {}", connection.session_id);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::SessionError;
use crate::transport::{Connection, Connector, Transport};
use crate::transports::sockjs::{
    random_server_id, random_session_id, session_id_from_endpoint, sockjs_endpoint,
    SockJsTransport,
};

/// Default timeout for opening the WebSocket.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Text-frame WebSocket carrying SockJS traffic. Binary frames are skipped.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open `url` (`ws://` or `wss://`), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Timeout`] when the handshake is not done in time,
    /// otherwise [`SessionError::Io`] with the underlying error kind.
    pub async fn open(url: &str, timeout: Duration) -> Result<Self, SessionError> {
        tracing::debug!(url = %url, "opening SockJS WebSocket");
        let (stream, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| SessionError::Timeout)?
            .map_err(io_error)?;
        Ok(Self {
            stream,
            closed: false,
        })
    }
}

fn io_error(e: tokio_tungstenite::tungstenite::Error) -> SessionError {
    let kind = match &e {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    SessionError::Io(std::io::Error::new(kind, e))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "SockJS socket closed by server");
                    return None;
                }
                Ok(Message::Binary(bytes)) => {
                    tracing::warn!(len = bytes.len(), "skipping binary frame on SockJS socket");
                }
                // Pings are answered by tungstenite.
                Ok(_) => {}
                Err(e) => return Some(Err(SessionError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.stream
            .close(None)
            .await
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }
}

/// Opens SockJS WebSocket sessions against a base URL such as
/// `http://localhost:8080/ws`.
///
/// Each call to [`connect`](Connector::connect) picks a new random server and
/// session id, connects to `{base}/{server}/{session}/websocket`, and reports
/// the session segment of that endpoint as the connection's session id.
#[derive(Debug, Clone)]
pub struct SockJsConnector {
    base_url: String,
    connect_timeout: Duration,
}

impl SockJsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the timeout for opening the WebSocket. Defaults to **10 seconds**.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Connector for SockJsConnector {
    async fn connect(&mut self) -> Result<Connection, SessionError> {
        let endpoint = sockjs_endpoint(&self.base_url, &random_server_id(), &random_session_id())?;
        let session_id = session_id_from_endpoint(&endpoint)
            .map(str::to_owned)
            .ok_or_else(|| SessionError::InvalidEndpoint(endpoint.clone()))?;

        let ws = WebSocketTransport::open(&endpoint, self.connect_timeout).await?;
        tracing::debug!(session_id = %session_id, "SockJS session negotiated");

        Ok(Connection::new(SockJsTransport::new(ws), session_id))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn open_fails_with_invalid_url() {
        let result = WebSocketTransport::open("not-a-valid-url", Duration::from_secs(1)).await;
        assert!(matches!(result.unwrap_err(), SessionError::Io(_)));
    }

    #[tokio::test]
    async fn open_times_out() {
        let result = WebSocketTransport::open("ws://192.0.2.1:1", Duration::from_millis(50)).await;
        assert!(matches!(result.unwrap_err(), SessionError::Timeout));
    }

    /// Accept one WebSocket connection, record its request path, and run
    /// `handler` on it.
    async fn start_mock_server<F, Fut>(handler: F) -> (String, Arc<StdMutex<Option<String>>>)
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let path = Arc::new(StdMutex::new(None));
        let seen = Arc::clone(&path);

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_hdr_async(
                tcp,
                |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *seen.lock().unwrap() = Some(req.uri().path().to_string());
                    Ok(resp)
                },
            )
            .await
            .unwrap();
            handler(ws).await;
        });

        (format!("http://{addr}/ws"), path)
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let (base, _path) = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let url = base.replacen("http", "ws", 1);
        let mut transport = WebSocketTransport::open(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "after_binary");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let (base, _path) =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let url = base.replacen("http", "ws", 1);
        let mut transport = WebSocketTransport::open(&url, Duration::from_secs(5)).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, SessionError::TransportClosed));
    }

    #[tokio::test]
    async fn sockjs_connector_reports_endpoint_session_id() {
        let (base, path) = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("o".into())).await.unwrap();
            ws.send(Message::Text(r#"a["CONNECTED\nversion:1.2\n\n\u0000"]"#.into()))
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut connector = SockJsConnector::new(base);
        let mut connection = connector.connect().await.unwrap();

        let frame = connection.transport.recv().await.unwrap().unwrap();
        assert!(frame.starts_with("CONNECTED\n"));

        let path = path.lock().unwrap().clone().unwrap();
        assert!(path.starts_with("/ws/"));
        assert!(path.ends_with("/websocket"));
        assert_eq!(session_id_from_endpoint(&path), Some(connection.session_id.as_str()));
    }

    #[tokio::test]
    async fn sockjs_connector_rejects_bad_scheme() {
        let mut connector = SockJsConnector::new("ftp://localhost/ws");
        assert!(matches!(
            connector.connect().await,
            Err(SessionError::InvalidEndpoint(_))
        ));
    }
}
