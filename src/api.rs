//! HTTP member/room API backed by `reqwest`.
//!
//! [`HttpRoomApi`] implements both seams the room page needs from the REST
//! backend:
//!
//! - [`IdentityVerifier`]: `GET {base}/member/myinfo` with the visitor's
//!   `Authorization` header and `refreshtoken` cookie.
//! - [`RoomExitNotifier`]: `POST {base}/room/{roomIdx}/out` when the page
//!   unmounts.
//!
//! Headers are built per request; the client keeps no credential state
//! between calls except what [`HttpRoomApi::with_credentials`] installs for
//! the exit call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use tracing::debug;

use crate::controller::RoomExitNotifier;
use crate::error::{Result, RoomError};
use crate::gate::{Credentials, IdentityVerifier, REFRESH_TOKEN_COOKIE};
use crate::protocol::RoomIdx;
use crate::session::UserProfile;

/// Placeholder replaced by the room identifier in [`ApiConfig::exit_path`].
pub const ROOM_PLACEHOLDER: &str = "{roomIdx}";

// ── Configuration ───────────────────────────────────────────────────

/// Endpoint and timeout settings for [`HttpRoomApi`].
///
/// ```
/// use room_session_client::api::ApiConfig;
/// use std::time::Duration;
///
/// let config = ApiConfig::new("http://localhost:8080/api")
///     .with_request_timeout(Duration::from_secs(3));
/// assert_eq!(config.profile_path, "/member/myinfo");
/// assert_eq!(config.request_timeout, Duration::from_secs(3));
/// ```
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the REST API, without a trailing slash.
    pub base_url: String,
    /// Path of the member info endpoint. Defaults to `/member/myinfo`.
    pub profile_path: String,
    /// Path of the room exit endpoint; `{roomIdx}` is substituted.
    /// Defaults to `/room/{roomIdx}/out`.
    pub exit_path: String,
    /// TCP connect timeout. Defaults to **3 seconds**.
    pub connect_timeout: Duration,
    /// Whole-request timeout. Defaults to **10 seconds**.
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile_path: "/member/myinfo".to_string(),
            exit_path: format!("/room/{ROOM_PLACEHOLDER}/out"),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_exit_path(mut self, path: impl Into<String>) -> Self {
        self.exit_path = path.into();
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn profile_url(&self) -> String {
        format!("{}{}", self.base_url, self.profile_path)
    }

    fn exit_url(&self, room_idx: &RoomIdx) -> String {
        format!(
            "{}{}",
            self.base_url,
            self.exit_path.replace(ROOM_PLACEHOLDER, room_idx.as_str())
        )
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// `reqwest` client for the member and room endpoints.
#[derive(Debug, Clone)]
pub struct HttpRoomApi {
    config: ApiConfig,
    client: reqwest::Client,
    credentials: Credentials,
}

impl HttpRoomApi {
    pub fn new(config: ApiConfig) -> Self {
        // Builder failure falls back to a default client rather than panicking.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            credentials: Credentials::default(),
        }
    }

    /// Credentials sent with the room exit call.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        credentials: &Credentials,
    ) -> reqwest::RequestBuilder {
        let mut request = request.header(CONTENT_TYPE, "application/json");
        if let Some(token) = credentials.access_token() {
            request = request.header(AUTHORIZATION, token);
        }
        if let Some(token) = credentials.refresh_token() {
            request = request.header(COOKIE, format!("{REFRESH_TOKEN_COOKIE}={token}"));
        }
        request
    }

    async fn execute(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| request_error(url, &e))?;
        if !response.status().is_success() {
            return Err(RoomError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

fn request_error(url: &str, e: &reqwest::Error) -> RoomError {
    if e.is_timeout() {
        RoomError::Timeout
    } else {
        RoomError::Request {
            url: url.to_string(),
            detail: e.to_string(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for HttpRoomApi {
    async fn fetch_profile(&self, credentials: &Credentials) -> Result<UserProfile> {
        let url = self.config.profile_url();
        debug!(url = %url, "fetching member profile");

        let request = self.authorized(self.client.get(&url), credentials);
        let response = self.execute(request, &url).await?;
        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| request_error(&url, &e))?;
        Ok(UserProfile::new(body))
    }
}

#[async_trait]
impl RoomExitNotifier for HttpRoomApi {
    async fn notify_exit(&self, room_idx: &RoomIdx) -> Result<()> {
        let url = self.config.exit_url(room_idx);
        debug!(url = %url, "notifying room exit");

        let request = self.authorized(self.client.post(&url), &self.credentials);
        self.execute(request, &url).await.map(|_| ())
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve one HTTP request with a canned response. Returns the base URL
    /// and a receiver for the raw request head.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (head_tx, head_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = tcp.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let _ = head_tx.send(String::from_utf8_lossy(&buf).into_owned());

            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            tcp.write_all(response.as_bytes()).await.unwrap();
            tcp.shutdown().await.unwrap();
        });

        (format!("http://{addr}"), head_rx)
    }

    fn creds() -> Credentials {
        Credentials::new(Some("acc-123".into()), Some("ref-456".into()))
    }

    #[tokio::test]
    async fn fetch_profile_sends_credentials_and_parses_body() {
        let (base, head) = serve_once("200 OK", r#"{"userIdx":7,"userNickname":"kim"}"#).await;
        let api = HttpRoomApi::new(ApiConfig::new(base));

        let profile = api.fetch_profile(&creds()).await.unwrap();
        assert_eq!(profile.field("userNickname").unwrap(), "kim");

        let head = head.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /member/myinfo "));
        assert!(head.contains("authorization: acc-123"));
        assert!(head.contains("cookie: refreshtoken=ref-456"));
    }

    #[tokio::test]
    async fn fetch_profile_maps_rejection_to_http_error() {
        let (base, _head) = serve_once("401 Unauthorized", "{}").await;
        let api = HttpRoomApi::new(ApiConfig::new(base));

        let err = api.fetch_profile(&creds()).await.unwrap_err();
        assert!(matches!(err, RoomError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn fetch_profile_rejects_non_json_body() {
        let (base, _head) = serve_once("200 OK", "<html>").await;
        let api = HttpRoomApi::new(ApiConfig::new(base));

        let err = api.fetch_profile(&creds()).await.unwrap_err();
        assert!(matches!(err, RoomError::Request { .. }));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        let api = HttpRoomApi::new(ApiConfig::new("http://127.0.0.1:1"));
        let err = api.fetch_profile(&creds()).await.unwrap_err();
        assert!(matches!(err, RoomError::Request { .. } | RoomError::Timeout));
    }

    #[tokio::test]
    async fn notify_exit_posts_to_room_path() {
        let (base, head) = serve_once("200 OK", "{}").await;
        let api = HttpRoomApi::new(ApiConfig::new(format!("{base}/"))).with_credentials(creds());

        api.notify_exit(&RoomIdx::new("42")).await.unwrap();

        let head = head.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("post /room/42/out "), "got {head}");
        assert!(head.contains("authorization: acc-123"));
    }

    #[test]
    fn exit_path_is_configurable() {
        let config = ApiConfig::new("http://h").with_exit_path("/game/out/{roomIdx}");
        assert_eq!(config.exit_url(&RoomIdx::new("9")), "http://h/game/out/9");
    }
}
