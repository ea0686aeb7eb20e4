//! Session accessor: who is signed in, and the sign-in/sign-out flows.
//!
//! The session lives in the local database between runs. Sign-in is the
//! OAuth authorization-code flow with PKCE: the verifier is stored locally,
//! the browser is sent to the provider, and the loopback callback hands the
//! code back to [`SessionAccessor::exchange_code`].

use secrecy::ExposeSecret;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::backend::pkce::PkcePair;
use crate::backend::{Backend, BackendError, Session};
use crate::storage::{Database, DatabaseError};

/// Path the provider redirects to on the loopback listener.
pub const CALLBACK_PATH: &str = "/auth/callback";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No authorization code in callback")]
    MissingCode,

    #[error("No sign-in in progress (or it expired); start again")]
    MissingVerifier,

    /// The provider redirected back with an error instead of a code.
    #[error("Sign-in failed: {0}")]
    Provider(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Storage(#[from] DatabaseError),

    #[error("Could not open browser: {0}")]
    Browser(String),

    #[error("Your session has expired; sign in again")]
    SessionExpired,
}

#[derive(Clone)]
pub struct SessionAccessor {
    backend: Backend,
    db: Database,
    provider: String,
    redirect_to: Url,
    /// Held while a refresh is in flight. Refresh tokens are single-use, so
    /// two concurrent refreshes would revoke each other.
    refresh_lock: Arc<Mutex<()>>,
}

impl SessionAccessor {
    pub fn new(
        backend: Backend,
        db: Database,
        provider: &str,
        callback_port: u16,
    ) -> Result<Self, AuthError> {
        let redirect_to = redirect_url(callback_port).map_err(BackendError::from)?;
        Ok(Self {
            backend,
            db,
            provider: provider.to_string(),
            redirect_to,
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn redirect_to(&self) -> &Url {
        &self.redirect_to
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The signed-in session, or `None` for the anonymous state.
    ///
    /// Refreshes an expired session and confirms it with the backend. Never
    /// fails: problems are logged and yield `None`. The stored session is
    /// only discarded when the backend rejects it, so a network outage at
    /// startup does not sign the user out.
    pub async fn get_current_session(&self) -> Option<Arc<Session>> {
        let stored = match self.db.load_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read stored session");
                return None;
            }
        };

        let session = if stored.is_expired() {
            match self
                .backend
                .refresh_session(stored.refresh_token.expose_secret())
                .await
            {
                Ok(fresh) => {
                    if let Err(e) = self.db.save_session(&fresh).await {
                        tracing::warn!(error = %e, "Could not persist refreshed session");
                    }
                    fresh
                }
                Err(e) => {
                    tracing::info!(error = %e, "Stored session could not be refreshed");
                    self.discard_if_rejected(&e).await;
                    return None;
                }
            }
        } else {
            stored
        };

        match self.backend.get_user(&session).await {
            Ok(user) if user.id == session.user.id => Some(Arc::new(Session { user, ..session })),
            Ok(user) => {
                tracing::warn!(
                    stored = %session.user_id(),
                    actual = %user.id,
                    "Stored session belongs to a different user, discarding"
                );
                self.clear_local().await;
                None
            }
            Err(e) => {
                tracing::info!(error = %e, "Stored session could not be validated");
                self.discard_if_rejected(&e).await;
                None
            }
        }
    }

    /// A session that is safe to send to the backend.
    ///
    /// Returns `session` itself while it is valid. An expired session is
    /// refreshed and the result persisted; if another task already did that,
    /// the stored session is reused. When the backend refuses the refresh
    /// token the stored session is cleared and [`AuthError::SessionExpired`]
    /// is returned.
    pub async fn ensure_fresh(&self, session: &Arc<Session>) -> Result<Arc<Session>, AuthError> {
        if !session.is_expired() {
            return Ok(Arc::clone(session));
        }

        let _guard = self.refresh_lock.lock().await;
        if let Ok(Some(stored)) = self.db.load_session().await {
            if stored.user.id == session.user.id && !stored.is_expired() {
                return Ok(Arc::new(stored));
            }
        }

        match self
            .backend
            .refresh_session(session.refresh_token.expose_secret())
            .await
        {
            Ok(fresh) => {
                if let Err(e) = self.db.save_session(&fresh).await {
                    tracing::warn!(error = %e, "Could not persist refreshed session");
                }
                tracing::info!(user_id = %fresh.user_id(), "Session refreshed");
                Ok(Arc::new(fresh))
            }
            Err(e) => {
                if self.discard_if_rejected(&e).await {
                    tracing::info!(error = %e, "Refresh token refused, session cleared");
                    Err(AuthError::SessionExpired)
                } else {
                    Err(AuthError::Backend(e))
                }
            }
        }
    }

    /// Prepare a sign-in: store a fresh PKCE verifier and build the provider URL.
    pub async fn begin_sign_in(&self) -> Result<Url, AuthError> {
        let pair = PkcePair::generate();
        self.db.save_verifier(&pair.verifier).await?;
        let url = self
            .backend
            .authorize_url(&self.provider, &self.redirect_to, &pair.challenge)?;
        tracing::info!(provider = %self.provider, "Starting OAuth sign-in");
        Ok(url)
    }

    /// Start sign-in and open the provider page in the system browser.
    ///
    /// The URL is returned so it can be shown if no browser is available.
    pub async fn sign_in(&self) -> Result<Url, AuthError> {
        let url = self.begin_sign_in().await?;
        open::that(url.as_str()).map_err(|e| AuthError::Browser(e.to_string()))?;
        Ok(url)
    }

    /// Exchange the callback's code for a session and persist it.
    pub async fn exchange_code(&self, code: &str) -> Result<Arc<Session>, AuthError> {
        if code.trim().is_empty() {
            return Err(AuthError::MissingCode);
        }
        let verifier = self
            .db
            .take_verifier()
            .await?
            .ok_or(AuthError::MissingVerifier)?;

        let session = self
            .backend
            .exchange_code_for_session(code, &verifier)
            .await?;
        self.db.save_session(&session).await?;
        Ok(Arc::new(session))
    }

    /// Sign out: revoke at the backend, then clear the local session.
    ///
    /// The local session is cleared whatever the backend says; its error, if
    /// any, is returned for display.
    pub async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        let remote = self.backend.sign_out(session).await;
        self.clear_local().await;
        if let Err(e) = &remote {
            tracing::warn!(error = %e, "Backend sign-out failed; local session cleared anyway");
        }
        remote.map_err(AuthError::from)
    }

    /// Forget the stored session without contacting the backend.
    pub async fn clear_local(&self) {
        if let Err(e) = self.db.clear_session().await {
            tracing::warn!(error = %e, "Could not clear stored session");
        }
    }

    /// Clear the stored session if `err` means the backend refused it.
    async fn discard_if_rejected(&self, err: &BackendError) -> bool {
        let rejected =
            err.is_unauthorized() || matches!(err, BackendError::Api { status: 400, .. });
        if rejected {
            self.clear_local().await;
        }
        rejected
    }
}

/// `http://127.0.0.1:<port>/auth/callback`
pub fn redirect_url(port: u16) -> Result<Url, url::ParseError> {
    Url::parse(&format!("http://127.0.0.1:{}{}", port, CALLBACK_PATH))
}
