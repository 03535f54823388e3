//! Entry gate: the authentication check that runs before the room page is
//! produced.
//!
//! The gate forwards the visitor's credential cookies to an
//! [`IdentityVerifier`] once per navigation. Every failure (rejected
//! credentials, network error, timeout, unreadable body) is folded into a
//! `notLogin` [`PageProps`]; nothing is propagated to the caller.
//!
//! ```rust,ignore
//! let gate = EntryGate::new(HttpRoomApi::new(ApiConfig::new("http://api")));
//! let credentials = Credentials::from_cookie_header(cookie_header);
//! let props = gate.admit(credentials, route.get("roomIdx"), &session).await;
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::RoomIdx;
use crate::session::{RoomSession, UserProfile};

/// Route the client is sent to when the gate rejects it.
pub const LANDING_ROUTE: &str = "/";

/// Cookie carrying the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "accesstoken";

/// Cookie carrying the refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "refreshtoken";

// ── Credentials ─────────────────────────────────────────────────────

/// Request-scoped credentials read from the visitor's cookies.
///
/// `Debug` never prints the token values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token,
        }
    }

    /// Extract `accesstoken` and `refreshtoken` from a raw `Cookie` header.
    ///
    /// ```
    /// use room_session_client::gate::Credentials;
    ///
    /// let creds = Credentials::from_cookie_header("theme=dark; accesstoken=abc; refreshtoken=xyz");
    /// assert_eq!(creds.access_token(), Some("abc"));
    /// assert_eq!(creds.refresh_token(), Some("xyz"));
    /// ```
    pub fn from_cookie_header(header: &str) -> Self {
        let mut credentials = Self::default();
        for pair in header.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.trim() {
                ACCESS_TOKEN_COOKIE => credentials.access_token = Some(value.to_string()),
                REFRESH_TOKEN_COOKIE => credentials.refresh_token = Some(value.to_string()),
                _ => {}
            }
        }
        credentials
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// Outcome of the identity check.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthResult {
    Authenticated(UserProfile),
    Unauthenticated,
}

/// The `message` field of [`PageProps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryMessage {
    #[serde(rename = "Login")]
    Login,
    #[serde(rename = "notLogin")]
    NotLogin,
}

/// Initial props handed from the gate to the room page.
///
/// Serializes as `{"message": "Login" | "notLogin", "roomIdx": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageProps {
    pub message: EntryMessage,
    pub room_idx: String,
}

impl PageProps {
    pub fn login(room_idx: &RoomIdx) -> Self {
        Self {
            message: EntryMessage::Login,
            room_idx: room_idx.as_str().to_string(),
        }
    }

    pub fn not_login() -> Self {
        Self {
            message: EntryMessage::NotLogin,
            room_idx: String::new(),
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.message == EntryMessage::Login
    }

    /// Where the client must go instead of mounting the room, if anywhere.
    /// Asking again gives the same answer.
    pub fn redirect_target(&self) -> Option<&'static str> {
        match self.message {
            EntryMessage::Login => None,
            EntryMessage::NotLogin => Some(LANDING_ROUTE),
        }
    }
}

// ── Verifier ────────────────────────────────────────────────────────

/// Resolves credentials into a user profile.
///
/// Implemented over HTTP by [`HttpRoomApi`](crate::api::HttpRoomApi).
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Fetch the profile of the credential holder.
    ///
    /// # Errors
    ///
    /// Any error means "not logged in" to the gate.
    async fn fetch_profile(&self, credentials: &Credentials) -> Result<UserProfile>;
}

// ── Gate ────────────────────────────────────────────────────────────

/// Runs the identity check and produces the room page's initial props.
#[derive(Debug)]
pub struct EntryGate<V> {
    verifier: V,
}

impl<V: IdentityVerifier> EntryGate<V> {
    pub fn new(verifier: V) -> Self {
        Self { verifier }
    }

    /// Verify `credentials`. Consumes them so they do not outlive the call,
    /// whatever the outcome.
    pub async fn authenticate(&self, credentials: Credentials) -> AuthResult {
        let outcome = self.verifier.fetch_profile(&credentials).await;
        drop(credentials);

        match outcome {
            Ok(profile) => AuthResult::Authenticated(profile),
            Err(e) => {
                warn!("entry gate: identity check failed, treating as not logged in: {e}");
                AuthResult::Unauthenticated
            }
        }
    }

    /// Authenticate the visitor, record the result in `session`, and build
    /// the page props. `route_room` is the `roomIdx` route parameter.
    pub async fn admit(
        &self,
        credentials: Credentials,
        route_room: Option<&str>,
        session: &RoomSession,
    ) -> PageProps {
        match self.authenticate(credentials).await {
            AuthResult::Authenticated(profile) => {
                let room_idx = RoomIdx::from_route(route_room);
                session.record_login(profile);
                debug!(room = %room_idx, "entry gate: admitted");
                PageProps::login(&room_idx)
            }
            AuthResult::Unauthenticated => {
                session.clear_login();
                PageProps::not_login()
            }
        }
    }
}
