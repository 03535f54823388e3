//! # Room Session Client
//!
//! Client-side controller for a single multiplayer game room.
//!
//! The crate covers the room page's lifecycle, not its rendering:
//!
//! - **Entry gate**: [`EntryGate`] checks the visitor's credentials once,
//!   before the page is produced, and yields [`PageProps`].
//! - **Phase controller**: [`RoomController`] mounts (or redirects), stores
//!   the room identifier in the [`RoomSession`], subscribes to `gameAlert`
//!   messages on the room connection, and tears the connection down on
//!   unmount.
//! - **View selection**: [`select_view`] maps the current [`RoomPhase`] to
//!   the [`RoomView`] to show.
//! - **Transport**: [`EventChannel`] gives subscribe/unsubscribe semantics
//!   over any [`Transport`]; `WebSocketTransport` is built in.
//!
//! ## Features
//!
//! - `transport-websocket` (default): `WebSocketTransport` via `tokio-tungstenite`
//! - `http-api` (default): `HttpRoomApi` via `reqwest`

pub mod channel;
pub mod controller;
pub mod error;
pub mod gate;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod transports;
pub mod view;

#[cfg(feature = "http-api")]
pub mod api;

pub use channel::{ChannelConfig, ConnectionId, EventChannel, SubscriptionId};
pub use controller::{Mount, RoomController, RoomExitNotifier};
pub use error::RoomError;
pub use gate::{AuthResult, Credentials, EntryGate, EntryMessage, IdentityVerifier, PageProps};
pub use protocol::{GameCategory, InboundMessage, InvalidPhase, RoomIdx, RoomPhase, RoomStatus};
pub use session::{RoomSession, UserProfile};
pub use transport::Transport;
pub use view::{select_view, RoomView};

#[cfg(feature = "http-api")]
pub use api::{ApiConfig, HttpRoomApi};

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
