//! Room phase controller.
//!
//! [`RoomController`] is the room page's lifecycle owner. It:
//!
//! 1. refuses to mount when the entry gate did not admit the visitor,
//! 2. stores the room identifier in the [`RoomSession`] once, on mount,
//! 3. subscribes a `gameAlert` handler to the connection handed over by the
//!    ready view after its socket handshake,
//! 4. tears that connection down (unsubscribe, close, room exit call) when
//!    it is replaced or the page unmounts.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = Arc::new(RoomSession::new());
//! let props = gate.admit(credentials, Some("42"), &session).await;
//!
//! let mut room = match RoomController::mount(&props, Arc::clone(&session), notifier) {
//!     Mount::Redirect(route) => return navigate(route),
//!     Mount::Room(room) => room,
//! };
//!
//! let transport = WebSocketTransport::connect_to_room(ws_base, room.room_idx()).await?;
//! room.attach(EventChannel::open(transport, ChannelConfig::default())).await;
//!
//! let mut status = session.watch_status();
//! while status.changed().await.is_ok() {
//!     draw(room.render());
//! }
//!
//! room.unmount().await;
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::RuntimeFlavor;
use tracing::{debug, info, warn};

use crate::channel::{ChannelConfig, ConnectionId, EventChannel, SubscriptionId};
use crate::error::{Result, RoomError};
use crate::gate::PageProps;
use crate::protocol::{InboundMessage, RoomIdx};
use crate::session::RoomSession;
use crate::transport::Transport;
use crate::view::{select_view, RoomView};

/// Tells the backend the occupant left the room.
///
/// Implemented over HTTP by [`HttpRoomApi`](crate::api::HttpRoomApi).
#[async_trait]
pub trait RoomExitNotifier: Send + Sync {
    /// # Errors
    ///
    /// Failures are logged by the controller and otherwise ignored.
    async fn notify_exit(&self, room_idx: &RoomIdx) -> Result<()>;
}

/// Result of mounting the room page.
#[derive(Debug)]
#[must_use = "a redirect must be followed and a mounted room must be unmounted"]
pub enum Mount {
    /// The visitor was not admitted; navigate to this route instead.
    Redirect(&'static str),
    /// The page is mounted.
    Room(RoomController),
}

/// A connection together with the handler subscribed to it.
struct ActiveConnection {
    channel: EventChannel,
    subscription: SubscriptionId,
}

/// Owns the room's connection and drives the phase from `gameAlert`
/// messages. See the [module docs](self).
///
/// End the page with [`unmount`](Self::unmount). Dropping the controller
/// instead blocks on the cleanup on a multi-threaded runtime; on a
/// current-thread runtime the cleanup is spawned and is lost if the runtime
/// shuts down before it runs.
#[must_use = "call `unmount().await` so the connection is closed and the exit call is sent"]
pub struct RoomController {
    session: Arc<RoomSession>,
    room_idx: RoomIdx,
    notifier: Arc<dyn RoomExitNotifier>,
    connection: Option<ActiveConnection>,
    room_assigned: bool,
}

impl RoomController {
    /// Mount the room page for `props`.
    ///
    /// A `notLogin` result yields [`Mount::Redirect`] and no controller, so
    /// no connection can ever be attached for that visitor.
    pub fn mount(
        props: &PageProps,
        session: Arc<RoomSession>,
        notifier: Arc<dyn RoomExitNotifier>,
    ) -> Mount {
        if let Some(route) = props.redirect_target() {
            info!(route, "room page: visitor not logged in, redirecting");
            return Mount::Redirect(route);
        }

        let mut controller = Self {
            session,
            room_idx: RoomIdx::new(props.room_idx.clone()),
            notifier,
            connection: None,
            room_assigned: false,
        };
        controller.render();
        debug!(room = %controller.room_idx, "room page mounted");
        Mount::Room(controller)
    }

    /// Run one render pass and return the view to show.
    ///
    /// The room identifier is stored in the session on the first pass that
    /// happens before a connection exists, and never again.
    pub fn render(&mut self) -> RoomView {
        if self.connection.is_none() && !self.room_assigned {
            self.session.assign_room(self.room_idx.clone());
            self.room_assigned = true;
        }
        select_view(&self.session.phase())
    }

    /// Take over a connection and subscribe the phase handler to it.
    ///
    /// A previously attached connection is torn down first, including its
    /// room exit call.
    ///
    /// The channel does not read from its transport until the handler is
    /// subscribed, so alerts sent during the hand-over are not lost.
    pub async fn attach(&mut self, channel: EventChannel) {
        self.release_connection().await;
        self.subscribe(channel);
    }

    /// Tear down any attached connection, then open an [`EventChannel`] over
    /// `transport` and subscribe to it.
    pub async fn attach_transport(&mut self, transport: impl Transport, config: ChannelConfig) {
        self.release_connection().await;
        self.subscribe(EventChannel::open(transport, config));
    }

    async fn release_connection(&mut self) {
        if let Some(previous) = self.connection.take() {
            debug!(old = %previous.channel.id(), "room connection replaced");
            teardown(previous, &self.room_idx, self.notifier.as_ref()).await;
        }
    }

    fn subscribe(&mut self, channel: EventChannel) {
        let subscription = channel.subscribe(game_alert_handler(Arc::clone(&self.session)));
        info!(room = %self.room_idx, connection = %channel.id(), "room connection attached");
        self.connection = Some(ActiveConnection {
            channel,
            subscription,
        });
    }

    /// Send a text message over the attached connection.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] without a live connection.
    pub fn send(&self, message: String) -> Result<()> {
        match &self.connection {
            Some(active) => active.channel.send(message),
            None => Err(RoomError::NotConnected),
        }
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|active| active.channel.id())
    }

    /// Returns `true` while an attached connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|active| active.channel.is_open())
    }

    pub fn room_idx(&self) -> &RoomIdx {
        &self.room_idx
    }

    /// Unmount the page: unsubscribe, close the connection and notify the
    /// backend. Without an attached connection there is nothing to do.
    pub async fn unmount(mut self) {
        if let Some(active) = self.connection.take() {
            teardown(active, &self.room_idx, self.notifier.as_ref()).await;
        }
        debug!(room = %self.room_idx, "room page unmounted");
    }
}

impl fmt::Debug for RoomController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomController")
            .field("room_idx", &self.room_idx)
            .field("connection", &self.connection_id())
            .field("phase", &self.session.phase())
            .finish()
    }
}

impl Drop for RoomController {
    fn drop(&mut self) {
        let Some(active) = self.connection.take() else {
            return;
        };
        // Dropped without `unmount().await`.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                debug!(room = %self.room_idx, "room controller dropped; cleaning up in place");
                let notifier = Arc::clone(&self.notifier);
                tokio::task::block_in_place(|| {
                    handle.block_on(teardown(active, &self.room_idx, notifier.as_ref()));
                });
            }
            Ok(handle) => {
                warn!(
                    room = %self.room_idx,
                    "room controller dropped without unmount; cleanup spawned and lost if the runtime stops first"
                );
                let room_idx = self.room_idx.clone();
                let notifier = Arc::clone(&self.notifier);
                handle.spawn(async move {
                    teardown(active, &room_idx, notifier.as_ref()).await;
                });
            }
            Err(_) => {
                warn!(
                    room = %self.room_idx,
                    "room controller dropped outside a runtime; aborting connection without exit call"
                );
                active.channel.unsubscribe(active.subscription);
            }
        }
    }
}

/// The single cleanup path for an attached connection.
async fn teardown(active: ActiveConnection, room_idx: &RoomIdx, notifier: &dyn RoomExitNotifier) {
    let ActiveConnection {
        mut channel,
        subscription,
    } = active;

    // Blocks while a dispatch is in flight; handlers only touch the session.
    channel.unsubscribe(subscription);
    channel.close().await;
    if let Err(e) = notifier.notify_exit(room_idx).await {
        warn!(room = %room_idx, "room exit call failed: {e}");
    }
    info!(room = %room_idx, connection = %channel.id(), "left room");
}

/// Handler applying `gameAlert` statuses to the session. Other message
/// types are ignored; malformed ones are logged and dropped.
fn game_alert_handler(session: Arc<RoomSession>) -> impl Fn(&str) + Send + Sync + 'static {
    move |text| match InboundMessage::parse(text) {
        Ok(InboundMessage::GameAlert { status }) => session.apply_status(status),
        Ok(InboundMessage::Other { .. }) => {}
        Err(e) => warn!("dropping malformed room message: {e}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::{GameCategory, RoomStatus};

    #[test]
    fn handler_applies_game_alerts_only() {
        let session = Arc::new(RoomSession::new());
        let handler = game_alert_handler(Arc::clone(&session));

        handler(r#"{"type":"gameAlert","status":"gameStart"}"#);
        assert_eq!(session.status(), RoomStatus::GameStart);

        handler(r#"{"type":"chat","status":"ready"}"#);
        handler("{not json");
        handler(r#"{"type":"gameAlert"}"#);
        assert_eq!(session.status(), RoomStatus::GameStart);

        handler(r#"{"type":"gameAlert","status":"gameEnd"}"#);
        assert_eq!(session.status(), RoomStatus::GameEnd);
    }

    #[test]
    fn handler_accepts_backward_transitions() {
        let session = Arc::new(RoomSession::with_status(RoomStatus::GameEnd));
        let handler = game_alert_handler(Arc::clone(&session));
        handler(r#"{"type":"gameAlert","status":"ready"}"#);
        assert_eq!(session.status(), RoomStatus::Ready);
    }

    struct NoopNotifier;

    #[async_trait]
    impl RoomExitNotifier for NoopNotifier {
        async fn notify_exit(&self, _room_idx: &RoomIdx) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn mount_keeps_the_session_phase() {
        let session = Arc::new(RoomSession::with_status(RoomStatus::GameStart));
        session.select_game_category(GameCategory::new("AiPainting"));
        let props = PageProps::login(&RoomIdx::new("42"));

        let Mount::Room(mut room) = RoomController::mount(&props, session, Arc::new(NoopNotifier))
        else {
            panic!("expected the room to mount");
        };
        assert_eq!(
            room.render(),
            RoomView::InGame {
                category: GameCategory::new("AiPainting")
            }
        );
        assert!(!room.is_connected());
        assert!(matches!(
            room.send("x".into()),
            Err(RoomError::NotConnected)
        ));
    }
}
