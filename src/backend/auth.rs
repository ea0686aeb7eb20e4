use super::{decode_json, Backend, BackendError, Session, User};
use chrono::Utc;
use reqwest::Method;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Token grant returned by `auth/v1/token`.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs))
            .unwrap_or_else(|| Utc::now().timestamp() + 3600);

        Session {
            user: self.user,
            access_token: SecretString::from(self.access_token),
            refresh_token: SecretString::from(self.refresh_token),
            expires_at,
        }
    }
}

impl Backend {
    /// URL the browser must visit to start the OAuth flow.
    ///
    /// The provider redirects back to `redirect_to` with `?code=...`, which is
    /// then exchanged together with the PKCE verifier behind `challenge`.
    pub fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &Url,
        challenge: &str,
    ) -> Result<Url, BackendError> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to.as_str())
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url)
    }

    /// Exchange an OAuth authorization code for a session.
    pub async fn exchange_code_for_session(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<Session, BackendError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "pkce");

        let request = self
            .request(Method::POST, url)
            .json(&serde_json::json!({
                "auth_code": code,
                "code_verifier": verifier,
            }));

        let body = self.send(request).await?;
        let session = decode_json::<TokenResponse>(&body)?.into_session();
        tracing::info!(user_id = %session.user_id(), "Exchanged OAuth code for session");
        Ok(session)
    }

    /// Trade a refresh token for a new session.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");

        let request = self
            .request(Method::POST, url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }));

        let body = self.send(request).await?;
        let session = decode_json::<TokenResponse>(&body)?.into_session();
        tracing::debug!(user_id = %session.user_id(), "Session refreshed");
        Ok(session)
    }

    /// Fetch the user behind a session, confirming the token is still live.
    pub async fn get_user(&self, session: &Session) -> Result<User, BackendError> {
        let url = self.endpoint("auth/v1/user")?;
        let request = self
            .request(Method::GET, url)
            .header("Authorization", session.bearer());

        let body = self.send(request).await?;
        decode_json(&body)
    }

    /// Revoke the session at the backend.
    pub async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        let url = self.endpoint("auth/v1/logout")?;
        let request = self
            .request(Method::POST, url)
            .header("Authorization", session.bearer());

        self.send(request).await?;
        tracing::info!(user_id = %session.user_id(), "Signed out at backend");
        Ok(())
    }
}
