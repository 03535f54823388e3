//! Error types for the room session client.

use thiserror::Error;

/// Errors that can occur inside the room session client.
///
/// Most of these never cross the page boundary: the entry gate downgrades
/// verification failures to a `notLogin` result, and the phase controller
/// drops malformed events after logging them.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a JSON message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound message was valid JSON but did not have the expected shape.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Attempted an operation that requires an open connection.
    #[error("not connected to server")]
    NotConnected,

    /// The HTTP API answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http {
        /// Status code returned by the server.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// The HTTP request could not be completed (connect failure, bad body).
    #[error("request to {url} failed: {detail}")]
    Request {
        /// Request URL.
        url: String,
        /// Underlying error description.
        detail: String,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for room session operations.
pub type Result<T> = std::result::Result<T, RoomError>;
