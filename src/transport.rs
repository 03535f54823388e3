//! Transport abstraction for the room coordinator connection.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and the coordinator. Every message on the wire is a
//! JSON object, so implementations only need to deliver complete text
//! messages and handle their own framing.
//!
//! Connection setup is not part of this trait. Construct a connected
//! transport externally (for example with
//! `WebSocketTransport::connect`), then hand it to
//! [`EventChannel::open`](crate::channel::EventChannel::open).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use room_session_client::error::RoomError;
//! use room_session_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), RoomError> {
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RoomError>> {
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RoomError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::RoomError;

/// A bidirectional text message transport to the room coordinator.
///
/// Each call to [`send`](Transport::send) transmits one complete message and
/// each call to [`recv`](Transport::recv) yields one complete message.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the channel
/// loop polls it inside `tokio::select!`. Cancelling a pending `recv` must
/// not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a text message to the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::TransportSend`] if the message could not be sent,
    /// or [`RoomError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), RoomError>;

    /// Receive the next text message from the coordinator.
    ///
    /// Returns:
    /// - `Some(Ok(text))` when a complete message was received
    /// - `Some(Err(e))` when the transport failed
    /// - `None` when the coordinator closed the connection cleanly
    async fn recv(&mut self) -> Option<Result<String, RoomError>>;

    /// Close the connection gracefully.
    ///
    /// Implementations must release the underlying resource even if the
    /// close handshake fails, and a second call must be a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails.
    async fn close(&mut self) -> Result<(), RoomError>;
}
