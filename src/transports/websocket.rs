//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] speaks the coordinator's text protocol over a
//! WebSocket. Both `ws://` and `wss://` URLs are accepted; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! The coordinator addresses a room by the last path segment of the socket
//! URL, so [`WebSocketTransport::connect_to_room`] appends the room
//! identifier to a base URL.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), room_session_client::RoomError> {
//! use room_session_client::{RoomIdx, Transport, WebSocketTransport};
//!
//! let room = RoomIdx::new("42");
//! let mut transport = WebSocketTransport::connect_to_room("ws://localhost:8080/room", &room).await?;
//! transport.send(r#"{"type":"chat","message":"hi"}"#.to_string()).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::RoomError;
use crate::protocol::RoomIdx;
use crate::transport::Transport;

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Build the socket URL for a room: `base` with the room identifier as the
/// final path segment.
///
/// ```
/// use room_session_client::RoomIdx;
/// use room_session_client::transports::websocket::room_socket_url;
///
/// let url = room_socket_url("ws://host/room/", &RoomIdx::new("42"));
/// assert_eq!(url, "ws://host/room/42");
/// ```
pub fn room_socket_url(base: &str, room_idx: &RoomIdx) -> String {
    format!("{}/{}", base.trim_end_matches('/'), room_idx.as_str())
}

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes does not consume a message.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Io`] if the URL is invalid or the connection
    /// cannot be established. I/O error kinds are preserved; everything else
    /// maps to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, RoomError> {
        tracing::debug!(url = %url, "connecting to room coordinator");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            RoomError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "room socket established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Connect to the socket of a specific room.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_to_room(base_url: &str, room_idx: &RoomIdx) -> Result<Self, RoomError> {
        Self::connect(&room_socket_url(base_url, room_idx)).await
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Like [`connect`](Self::connect) but fails with [`RoomError::Timeout`]
    /// if the handshake does not finish within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Timeout`] if the deadline elapses, or any error
    /// [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, RoomError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| RoomError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), RoomError> {
        if self.closed {
            return Err(RoomError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| RoomError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RoomError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(RoomError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "coordinator sent close frame");
                    return None;
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("skipping binary frame on room socket");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), RoomError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| RoomError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
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
    use tokio::net::TcpListener;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[test]
    fn room_socket_url_appends_room_segment() {
        let room = RoomIdx::new("42");
        assert_eq!(room_socket_url("ws://h/room", &room), "ws://h/room/42");
        assert_eq!(room_socket_url("ws://h/room//", &room), "ws://h/room/42");
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::Io(_)));
    }

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and return the URL to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_receives_text_and_skips_binary() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"gameAlert","status":"ready"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, r#"{"type":"gameAlert","status":"ready"}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_to_room_uses_room_path() {
        use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (path_tx, path_rx) = tokio::sync::oneshot::channel::<String>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let _ = path_tx.send(req.uri().path().to_string());
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let base = format!("ws://{addr}/room");
        let mut transport = WebSocketTransport::connect_to_room(&base, &RoomIdx::new("42"))
            .await
            .unwrap();
        assert_eq!(path_rx.await.unwrap(), "/room/42");
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        // Second close is a no-op.
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, RoomError::TransportClosed));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        let result = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result.unwrap_err(), RoomError::Timeout));
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let mut transport = WebSocketTransport::from_stream(stream);
        transport.send("echo".to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "echo");
    }
}
