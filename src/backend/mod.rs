//! Client for the hosted backend.
//!
//! The backend exposes three services under one base URL:
//!
//! - `auth/v1` - OAuth sign-in, token exchange, session refresh
//! - `rest/v1` - the `bookmarks` table, filtered by owner
//! - `realtime/v1` - a WebSocket change feed scoped to one owner
//!
//! [`Backend`] is constructed once from configuration and cloned into every
//! component and background task that needs it.

mod auth;
mod error;
pub mod pkce;
pub mod realtime;
mod rest;
mod types;

pub use error::BackendError;
pub use types::{
    Bookmark, ChangeEvent, NewBookmark, OldRecord, Session, SubscriptionStatus, User,
};

use crate::config::BackendSettings;
use futures::StreamExt;
use reqwest::redirect::Policy;
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::sync::Arc;
use url::Url;

/// Largest response body accepted from any backend endpoint.
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Table-level operations on bookmarks.
///
/// Every call is scoped to the session's user; the backend enforces ownership
/// independently.
pub trait BookmarkStore: Send + Sync {
    /// All bookmarks owned by the session user, newest first.
    fn select_bookmarks(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<Vec<Bookmark>, BackendError>> + Send;

    /// Insert one row and return it as stored (with `id` and `created_at`).
    fn insert_bookmark(
        &self,
        session: &Session,
        row: &NewBookmark,
    ) -> impl Future<Output = Result<Bookmark, BackendError>> + Send;

    /// Delete the row matching `(id, session user)`.
    fn delete_bookmark(
        &self,
        session: &Session,
        id: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Handle to the hosted backend: base URL, public API key, and a pooled
/// HTTP client.
#[derive(Clone)]
pub struct Backend {
    base_url: Url,
    api_key: Arc<SecretString>,
    http: reqwest::Client,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Redirect policy for backend calls: at most 3 hops, no loops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following backend redirect"
        );

        attempt.follow()
    })
}

impl Backend {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(std::time::Duration::from_secs(30))
            .tcp_keepalive(std::time::Duration::from_secs(60))
            .timeout(settings.request_timeout)
            .build()
            .map_err(BackendError::Network)?;

        Ok(Self {
            base_url: settings.url.clone(),
            api_key: Arc::new(SecretString::from(
                settings.api_key.expose_secret().to_string(),
            )),
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a service path (`auth/v1/token`, `rest/v1/bookmarks`, ...)
    /// against the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base_url.join(path)?)
    }

    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Start a request carrying the public API key.
    ///
    /// Authenticated calls add the session bearer on top; anonymous calls use
    /// the API key as the bearer, which is what the backend expects.
    pub(crate) fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", self.api_key())
    }

    /// Send a request and return the body of a 2xx response.
    ///
    /// Non-2xx responses become [`BackendError::Api`] with the backend's own
    /// message.
    pub(crate) async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, BackendError> {
        let response = request.send().await.map_err(BackendError::from_reqwest)?;
        let status = response.status();
        let body = read_limited_text(response, MAX_RESPONSE_SIZE).await?;

        if !status.is_success() {
            let err = BackendError::from_response_body(status.as_u16(), &body);
            tracing::debug!(status = status.as_u16(), error = %err, "Backend returned an error");
            return Err(err);
        }

        Ok(body)
    }
}

/// Read a response body, refusing anything larger than `limit` bytes.
async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, BackendError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(BackendError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BackendError::from_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BackendError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| BackendError::Decode("invalid UTF-8 in response".into()))
}

/// Deserialize a JSON body, mapping failures to [`BackendError::Decode`].
pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|e| BackendError::Decode(e.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::time::Duration;

    pub fn backend_for(uri: &str) -> Backend {
        let settings = BackendSettings {
            url: Url::parse(uri).unwrap(),
            api_key: SecretString::from("anon-key".to_string()),
            request_timeout: Duration::from_secs(5),
        };
        Backend::new(&settings).unwrap()
    }

    pub fn session_for(user_id: &str) -> Session {
        Session {
            user: User {
                id: user_id.to_string(),
                email: Some(format!("{}@example.com", user_id)),
            },
            access_token: SecretString::from("access-token".to_string()),
            refresh_token: SecretString::from("refresh-token".to_string()),
            expires_at: chrono::Utc::now().timestamp() + 3600,
        }
    }
}
