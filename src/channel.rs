//! Subscribe/unsubscribe event channel over a [`Transport`].
//!
//! [`EventChannel`] owns a connected transport in a background task and
//! fans every inbound text message out to the handlers registered with
//! [`EventChannel::subscribe`]. Outgoing messages are queued to the same task
//! over an unbounded channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect_to_room(base, &room).await?;
//! let mut channel = EventChannel::open(transport, ChannelConfig::default());
//!
//! let id = channel.subscribe(|text| println!("got {text}"));
//! channel.send(r#"{"type":"chat","message":"hi"}"#.into())?;
//!
//! channel.unsubscribe(id);
//! channel.close().await;
//! ```
//!
//! # Dispatch
//!
//! The channel does not read from the transport until the first handler is
//! subscribed; frames the coordinator sends before then wait in the
//! transport. Once armed, reading continues for the life of the channel.
//!
//! Handlers run synchronously on the channel task, in delivery order. The
//! registry lock is held while a message is dispatched, so once
//! [`unsubscribe`](EventChannel::unsubscribe) returns the handler will not
//! be called again. A handler must not subscribe or unsubscribe on its own
//! channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, RoomError};
use crate::transport::Transport;

/// Default timeout for closing the channel.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for an [`EventChannel`].
///
/// ```
/// use room_session_client::channel::ChannelConfig;
/// use std::time::Duration;
///
/// let config = ChannelConfig::default().with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long [`EventChannel::close`] waits for the transport to close
    /// before aborting the background task.
    ///
    /// Defaults to **1 second**. Zero aborts immediately.
    pub shutdown_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Identifiers ─────────────────────────────────────────────────────

/// Identity of one opened connection. Two channels never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Handle returned by [`EventChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ── Handler registry ────────────────────────────────────────────────

type Handler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Handler)>>,
}

impl HandlerRegistry {
    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Handler)>> {
        // A panicking handler must not wedge every later dispatch.
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, handler));
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn dispatch(&self, text: &str) {
        let handlers = self.lock();
        for (_, handler) in handlers.iter() {
            handler(text);
        }
    }
}

// ── Channel handle ──────────────────────────────────────────────────

/// A live connection to the coordinator with subscribe/unsubscribe
/// semantics.
///
/// Dropping the handle without calling [`close`](Self::close) aborts the
/// background task, which drops the transport without a close handshake.
pub struct EventChannel {
    id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<String>,
    registry: Arc<HandlerRegistry>,
    open: Arc<AtomicBool>,
    armed: watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl EventChannel {
    /// Take ownership of a connected transport and start its background
    /// task. Inbound frames are read once the first handler subscribes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(transport: impl Transport, config: ChannelConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (armed, armed_rx) = watch::channel(false);
        let registry = Arc::new(HandlerRegistry::default());
        let open = Arc::new(AtomicBool::new(true));
        let id = ConnectionId::new();

        let task = tokio::spawn(channel_loop(
            id,
            transport,
            cmd_rx,
            Arc::clone(&registry),
            Arc::clone(&open),
            armed_rx,
            shutdown_rx,
        ));

        Self {
            id,
            cmd_tx,
            registry,
            open,
            armed,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` until the transport closes or [`close`](Self::close)
    /// is called.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Register a handler for every inbound text message.
    ///
    /// The first subscription starts reading from the transport, so the
    /// first handler sees every frame the coordinator has sent.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.registry.insert(Arc::new(handler));
        // Registered before arming: the loop cannot dispatch to an empty registry.
        self.armed.send_if_modified(|armed| !std::mem::replace(armed, true));
        debug!(connection = %self.id, subscription = id.0, "handler subscribed");
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    ///
    /// Waits for an in-progress dispatch to finish, so the handler is never
    /// invoked after this returns.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry.remove(id);
        debug!(connection = %self.id, subscription = id.0, removed, "handler unsubscribed");
        removed
    }

    /// Number of currently registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Queue a text message for the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotConnected`] once the channel has closed.
    pub fn send(&self, message: String) -> Result<()> {
        if !self.is_open() {
            return Err(RoomError::NotConnected);
        }
        self.cmd_tx
            .send(message)
            .map_err(|_| RoomError::NotConnected)
    }

    /// Close the transport and stop the background task.
    ///
    /// Idempotent. Handlers stay registered but are never invoked again.
    pub async fn close(&mut self) {
        debug!(connection = %self.id, "channel close requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("channel loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("channel loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("channel loop aborted: {join_err}");
                    }
                }
            }
        }

        self.open.store(false, Ordering::Release);
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        // No executor to drive an async close from here.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Channel loop ────────────────────────────────────────────────────

/// Owns the transport. Exits on shutdown, on a closed command channel, or
/// when the transport ends or fails.
async fn channel_loop(
    id: ConnectionId,
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    registry: Arc<HandlerRegistry>,
    open: Arc<AtomicBool>,
    mut armed_rx: watch::Receiver<bool>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(connection = %id, "channel loop started");
    let mut armed = *armed_rx.borrow_and_update();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(text) => {
                        if let Err(e) = transport.send(text).await {
                            error!(connection = %id, "transport send error: {e}");
                            break;
                        }
                    }
                    None => {
                        debug!(connection = %id, "command channel closed");
                        close_transport(&mut transport).await;
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                close_transport(&mut transport).await;
                info!(connection = %id, "room socket closed");
                break;
            }

            changed = armed_rx.changed(), if !armed => {
                if changed.is_err() {
                    debug!(connection = %id, "channel handle dropped before subscription");
                    break;
                }
                armed = *armed_rx.borrow_and_update();
                if armed {
                    debug!(connection = %id, "first handler subscribed; reading from transport");
                }
            }

            incoming = transport.recv(), if armed => {
                match incoming {
                    Some(Ok(text)) => registry.dispatch(&text),
                    Some(Err(e)) => {
                        error!(connection = %id, "transport receive error: {e}");
                        break;
                    }
                    None => {
                        info!(connection = %id, "room socket closed by coordinator");
                        break;
                    }
                }
            }
        }
    }

    open.store(false, Ordering::Release);
    debug!(connection = %id, "channel loop exited");
}

async fn close_transport(transport: &mut impl Transport) {
    if let Err(e) = transport.close().await {
        warn!("transport close failed: {e}");
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
    use async_trait::async_trait;

    /// Transport fed from a test-side mpsc sender.
    struct FedTransport {
        rx: mpsc::UnboundedReceiver<String>,
        sent: Arc<Mutex<Vec<String>>>,
        closes: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Transport for FedTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), RoomError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, RoomError>> {
            self.rx.recv().await.map(Ok)
        }

        async fn close(&mut self) -> std::result::Result<(), RoomError> {
            self.closes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[allow(clippy::type_complexity)]
    fn fed() -> (
        FedTransport,
        mpsc::UnboundedSender<String>,
        Arc<Mutex<Vec<String>>>,
        Arc<AtomicU64>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicU64::new(0));
        let transport = FedTransport {
            rx,
            sent: Arc::clone(&sent),
            closes: Arc::clone(&closes),
        };
        (transport, tx, sent, closes)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn subscribed_handler_sees_messages_in_order() {
        let (transport, feed, _sent, _closes) = fed();
        let mut channel = EventChannel::open(transport, ChannelConfig::default());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        channel.subscribe(move |text| sink.lock().unwrap().push(text.to_string()));

        for n in 0..5 {
            feed.send(format!("m{n}")).unwrap();
        }
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["m0", "m1", "m2", "m3", "m4"]);
        channel.close().await;
    }

    #[tokio::test]
    async fn unsubscribed_handler_is_not_invoked() {
        let (transport, feed, _sent, _closes) = fed();
        let mut channel = EventChannel::open(transport, ChannelConfig::default());

        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let id = channel.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        feed.send("one".into()).unwrap();
        settle().await;
        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        assert_eq!(channel.subscriber_count(), 0);

        feed.send("two".into()).unwrap();
        settle().await;
        assert_eq!(count.load(Ordering::Relaxed), 1);

        channel.close().await;
    }

    #[tokio::test]
    async fn send_reaches_transport() {
        let (transport, _feed, sent, _closes) = fed();
        let mut channel = EventChannel::open(transport, ChannelConfig::default());

        channel.send("hello".into()).unwrap();
        settle().await;
        assert_eq!(*sent.lock().unwrap(), vec!["hello"]);

        channel.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_closes_transport_once() {
        let (transport, _feed, _sent, closes) = fed();
        let mut channel = EventChannel::open(transport, ChannelConfig::default());

        channel.close().await;
        channel.close().await;

        assert!(!channel.is_open());
        assert_eq!(closes.load(Ordering::Relaxed), 1);
        assert!(matches!(
            channel.send("late".into()),
            Err(RoomError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn coordinator_close_marks_channel_closed() {
        let (transport, feed, _sent, _closes) = fed();
        let channel = EventChannel::open(transport, ChannelConfig::default());
        channel.subscribe(|_| {});

        drop(feed);
        settle().await;
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn frames_sent_before_subscribe_reach_the_first_handler() {
        let (transport, feed, _sent, _closes) = fed();
        let mut channel = EventChannel::open(transport, ChannelConfig::default());

        feed.send("early".into()).unwrap();
        settle().await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        channel.subscribe(move |text| sink.lock().unwrap().push(text.to_string()));
        feed.send("late".into()).unwrap();
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["early", "late"]);
        channel.close().await;
    }

    /// Transport whose `close()` never completes.
    struct HangingCloseTransport;

    #[async_trait]
    impl Transport for HangingCloseTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), RoomError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, RoomError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), RoomError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stuck_transport_close_is_aborted_after_timeout() {
        let config = ChannelConfig::default().with_shutdown_timeout(Duration::from_millis(100));
        let mut channel = EventChannel::open(HangingCloseTransport, config);
        channel.subscribe(|_| {});

        let started = tokio::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(2), channel.close())
            .await
            .expect("close must not hang on a stuck transport");
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(100), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "returned after {elapsed:?}");
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn every_channel_gets_a_fresh_id() {
        let (a, _fa, _, _) = fed();
        let (b, _fb, _, _) = fed();
        let mut first = EventChannel::open(a, ChannelConfig::default());
        let mut second = EventChannel::open(b, ChannelConfig::default());
        assert_ne!(first.id(), second.id());
        first.close().await;
        second.close().await;
    }
}
