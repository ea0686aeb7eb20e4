use secrecy::{ExposeSecret, SecretString};

use super::schema::Database;
use super::types::DatabaseError;
use crate::backend::{Session, User};

/// A PKCE verifier older than this is discarded instead of used.
const VERIFIER_MAX_AGE_SECS: i64 = 10 * 60;

type SessionRow = (String, Option<String>, String, String, i64);

impl Database {
    // ========================================================================
    // Session Operations
    // ========================================================================

    /// Persist the session, replacing any previous one.
    pub async fn save_session(&self, session: &Session) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO auth_session (id, user_id, email, access_token, refresh_token, expires_at, saved_at)
            VALUES (1, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                email = excluded.email,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                saved_at = excluded.saved_at
        "#,
        )
        .bind(session.user_id())
        .bind(session.email())
        .bind(session.access_token.expose_secret())
        .bind(session.refresh_token.expose_secret())
        .bind(session.expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(user_id = %session.user_id(), "Session persisted");
        Ok(())
    }

    /// The persisted session, if any. Expiry is not checked here.
    pub async fn load_session(&self) -> Result<Option<Session>, DatabaseError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT user_id, email, access_token, refresh_token, expires_at FROM auth_session WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(user_id, email, access_token, refresh_token, expires_at)| Session {
                user: User { id: user_id, email },
                access_token: SecretString::from(access_token),
                refresh_token: SecretString::from(refresh_token),
                expires_at,
            },
        ))
    }

    pub async fn clear_session(&self) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM auth_session")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // PKCE Verifier Operations
    // ========================================================================

    /// Remember the verifier for the sign-in that is about to start.
    ///
    /// Starting a new sign-in overwrites any verifier left from an earlier one.
    pub async fn save_verifier(&self, verifier: &str) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO pkce_verifier (id, verifier, created_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                verifier = excluded.verifier,
                created_at = excluded.created_at
        "#,
        )
        .bind(verifier)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove and return the pending verifier.
    ///
    /// Returns `None` when there is none or it is older than ten minutes; the
    /// row is deleted in both cases so a code can only be exchanged once.
    pub async fn take_verifier(&self) -> Result<Option<String>, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT verifier, created_at FROM pkce_verifier WHERE id = 1")
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM pkce_verifier")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let now = chrono::Utc::now().timestamp();
        Ok(row.and_then(|(verifier, created_at)| {
            if now - created_at > VERIFIER_MAX_AGE_SECS {
                tracing::debug!("Discarding stale PKCE verifier");
                None
            } else {
                Some(verifier)
            }
        }))
    }
}
