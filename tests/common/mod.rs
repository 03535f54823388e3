#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the room session integration tests.
//!
//! Provides a channel-fed [`MockTransport`], a [`RecordingNotifier`] for
//! room exit calls, a [`StubVerifier`] for the entry gate, and JSON helpers
//! for coordinator messages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use room_session_client::error::Result;
use room_session_client::protocol::game_alert_json;
use room_session_client::{
    Credentials, IdentityVerifier, RoomError, RoomExitNotifier, RoomIdx, RoomSession, RoomStatus,
    Transport, UserProfile,
};
use tokio::sync::mpsc;

// ── MockTransport ───────────────────────────────────────────────────

/// A transport whose inbound side is fed by the test through a
/// [`MockHandle`]. Dropping the handle's feeder closes the transport from
/// the coordinator's side.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<std::result::Result<String, RoomError>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

/// Test-side handle of a [`MockTransport`].
pub struct MockHandle {
    pub feed: mpsc::UnboundedSender<std::result::Result<String, RoomError>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closes: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let (feed, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));
        let transport = Self {
            incoming,
            sent: Arc::clone(&sent),
            closes: Arc::clone(&closes),
        };
        (transport, MockHandle { feed, sent, closes })
    }
}

impl MockHandle {
    /// Deliver a raw text frame to the client. Ignored once the transport
    /// is gone.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.feed.send(Ok(text.into()));
    }

    /// Deliver a `gameAlert` with the given status string.
    pub fn push_alert(&self, status: &str) {
        self.push(game_alert_json(&RoomStatus::from(status)));
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> std::result::Result<(), RoomError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<std::result::Result<String, RoomError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> std::result::Result<(), RoomError> {
        self.closes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

// ── RecordingNotifier ───────────────────────────────────────────────

/// Records every room exit call.
#[derive(Default)]
pub struct RecordingNotifier {
    pub exits: StdMutex<Vec<RoomIdx>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn exit_count(&self) -> usize {
        self.exits.lock().unwrap().len()
    }
}

#[async_trait]
impl RoomExitNotifier for RecordingNotifier {
    async fn notify_exit(&self, room_idx: &RoomIdx) -> Result<()> {
        self.exits.lock().unwrap().push(room_idx.clone());
        if self.fail {
            return Err(RoomError::Http {
                status: 500,
                url: "/room/out".into(),
            });
        }
        Ok(())
    }
}

// ── StubVerifier ────────────────────────────────────────────────────

/// Accepts one access token; counts calls.
pub struct StubVerifier {
    pub valid_token: &'static str,
    pub calls: AtomicUsize,
}

impl StubVerifier {
    pub fn accepting(valid_token: &'static str) -> Self {
        Self {
            valid_token,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IdentityVerifier for StubVerifier {
    async fn fetch_profile(&self, credentials: &Credentials) -> Result<UserProfile> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        if credentials.access_token() == Some(self.valid_token) {
            Ok(UserProfile::new(
                serde_json::json!({"userIdx": 1, "userNickname": "tester"}),
            ))
        } else {
            Err(RoomError::Http {
                status: 401,
                url: "/member/myinfo".into(),
            })
        }
    }
}

pub fn credentials(access: &str) -> Credentials {
    Credentials::new(Some(access.to_string()), Some("refresh".to_string()))
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every
/// test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ── Waiting helpers ─────────────────────────────────────────────────

/// Wait until the session's status equals `expected`.
pub async fn wait_for_status(session: &RoomSession, expected: RoomStatus) {
    let mut rx = session.watch_status();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == expected))
        .await
        .unwrap_or_else(|_| {
            panic!(
                "timed out waiting for {expected:?}, status is {:?}",
                session.status()
            )
        })
        .expect("status sender dropped");
}

/// Give spawned tasks a moment to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
