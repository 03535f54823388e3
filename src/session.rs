//! Per-page room session context.
//!
//! [`RoomSession`] holds everything the room page shares between the entry
//! gate, the phase controller, and the views: the room identifier, the
//! login flag and profile, the selected game category, and the last room
//! status. It is created once per page mount and passed around as
//! `Arc<RoomSession>`.
//!
//! Only the phase controller changes the room status. Views observe it
//! through [`RoomSession::watch_status`] or read the derived
//! [`RoomPhase`] through [`RoomSession::phase`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::protocol::{GameCategory, RoomIdx, RoomPhase, RoomStatus};

/// The profile returned by the member info endpoint.
///
/// The body is kept as raw JSON; the views decide which fields they need.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile(Value);

impl UserProfile {
    pub fn new(body: Value) -> Self {
        Self(body)
    }

    /// Look up a top-level field of the profile.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state of one mounted room page.
#[derive(Debug)]
pub struct RoomSession {
    room_idx: OnceLock<RoomIdx>,
    status: watch::Sender<RoomStatus>,
    game_category: Mutex<Option<GameCategory>>,
    logged_in: AtomicBool,
    user: Mutex<Option<UserProfile>>,
}

impl Default for RoomSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomSession {
    /// A fresh session in the [`RoomStatus::Ready`] state.
    pub fn new() -> Self {
        Self::with_status(RoomStatus::Ready)
    }

    /// A session that starts from a status carried over from elsewhere.
    pub fn with_status(status: RoomStatus) -> Self {
        let (status, _) = watch::channel(status);
        Self {
            room_idx: OnceLock::new(),
            status,
            game_category: Mutex::new(None),
            logged_in: AtomicBool::new(false),
            user: Mutex::new(None),
        }
    }

    // ── Room identity ───────────────────────────────────────────────

    /// Store the room identifier. Returns `false` if one was already set;
    /// the first value is kept.
    pub fn assign_room(&self, room_idx: RoomIdx) -> bool {
        match self.room_idx.set(room_idx) {
            Ok(()) => {
                debug!(room = ?self.room_idx.get(), "session: room assigned");
                true
            }
            Err(rejected) => {
                debug!(room = %rejected, "session: room already assigned, ignoring");
                false
            }
        }
    }

    pub fn room_idx(&self) -> Option<&RoomIdx> {
        self.room_idx.get()
    }

    // ── Status / phase ──────────────────────────────────────────────

    pub fn status(&self) -> RoomStatus {
        self.status.borrow().clone()
    }

    /// A receiver that wakes whenever the status is written, including
    /// writes of an equal value.
    pub fn watch_status(&self) -> watch::Receiver<RoomStatus> {
        self.status.subscribe()
    }

    /// The current phase: the last status combined with the selected game
    /// category.
    pub fn phase(&self) -> RoomPhase {
        let status = self.status.borrow();
        RoomPhase::derive(&status, lock(&self.game_category).as_ref())
    }

    pub(crate) fn apply_status(&self, status: RoomStatus) {
        let left_ended = self.phase().is_terminal();
        let previous = self.status.send_replace(status.clone());
        if left_ended && status != RoomStatus::GameEnd {
            info!(from = %previous, to = %status, "session: coordinator reopened an ended room");
        } else {
            debug!(from = %previous, to = %status, "session: status changed");
        }
    }

    // ── Game category ───────────────────────────────────────────────

    /// Record the game type chosen in the ready view.
    pub fn select_game_category(&self, category: GameCategory) {
        debug!(category = %category, "session: game category selected");
        *lock(&self.game_category) = Some(category);
    }

    pub fn game_category(&self) -> Option<GameCategory> {
        lock(&self.game_category).clone()
    }

    // ── Login ───────────────────────────────────────────────────────

    pub(crate) fn record_login(&self, profile: UserProfile) {
        *lock(&self.user) = Some(profile);
        self.logged_in.store(true, Ordering::Release);
    }

    pub(crate) fn clear_login(&self) {
        self.logged_in.store(false, Ordering::Release);
        *lock(&self.user) = None;
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    pub fn user(&self) -> Option<UserProfile> {
        lock(&self.user).clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::InvalidPhase;

    #[test]
    fn room_is_assigned_once() {
        let session = RoomSession::new();
        assert!(session.room_idx().is_none());
        assert!(session.assign_room(RoomIdx::new("42")));
        assert!(!session.assign_room(RoomIdx::new("43")));
        assert_eq!(session.room_idx().unwrap().as_str(), "42");
    }

    #[test]
    fn phase_combines_status_and_category() {
        let session = RoomSession::with_status(RoomStatus::GameStart);
        assert_eq!(
            session.phase(),
            RoomPhase::Invalid(InvalidPhase::MissingGameCategory)
        );

        session.select_game_category(GameCategory::new("AiPainting"));
        assert_eq!(
            session.phase(),
            RoomPhase::InGame(GameCategory::new("AiPainting"))
        );
    }

    #[test]
    fn apply_status_without_watchers_is_kept() {
        let session = RoomSession::new();
        session.apply_status(RoomStatus::GameEnd);
        assert_eq!(session.status(), RoomStatus::GameEnd);
        assert_eq!(session.phase(), RoomPhase::Ended);
    }

    #[tokio::test]
    async fn watchers_see_status_changes() {
        let session = RoomSession::new();
        let mut rx = session.watch_status();
        session.apply_status(RoomStatus::GameStart);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), RoomStatus::GameStart);
    }

    #[test]
    fn login_round_trip() {
        let session = RoomSession::new();
        session.record_login(UserProfile::new(serde_json::json!({"userNickname": "kim"})));
        assert!(session.is_logged_in());
        assert_eq!(
            session.user().unwrap().field("userNickname").unwrap(),
            "kim"
        );

        session.clear_login();
        assert!(!session.is_logged_in());
        assert!(session.user().is_none());
    }
}
