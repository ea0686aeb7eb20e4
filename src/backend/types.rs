use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

// ============================================================================
// Table Rows
// ============================================================================

/// A row of the `bookmarks` table.
///
/// `id` and `created_at` are assigned by the backend; the client never
/// invents either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for the `bookmarks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBookmark {
    pub user_id: String,
    pub title: String,
    pub url: String,
}

/// The subset of an old row that the change feed is guaranteed to carry.
///
/// Without `REPLICA IDENTITY FULL` on the table, delete and update events
/// only include the primary key, so everything but `id` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OldRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

// ============================================================================
// Change Feed
// ============================================================================

/// A change notification delivered by the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert { new: Bookmark },
    Update { new: Bookmark, old: Option<OldRecord> },
    Delete { old: OldRecord },
}

impl ChangeEvent {
    /// Id of the bookmark this event is about.
    pub fn bookmark_id(&self) -> &str {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new, .. } => &new.id,
            ChangeEvent::Delete { old } => &old.id,
        }
    }

    /// Owner of the affected row, when the payload carries it.
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new, .. } => Some(&new.user_id),
            ChangeEvent::Delete { old } => old.user_id.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "INSERT",
            ChangeEvent::Update { .. } => "UPDATE",
            ChangeEvent::Delete { .. } => "DELETE",
        }
    }
}

/// Transport-level state of a realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Subscribing,
    Subscribed,
    /// `CHANNEL_ERROR`: the join was refused or the socket failed.
    ChannelError(String),
    /// `TIMED_OUT`: join or heartbeat reply never arrived.
    TimedOut,
    Closed,
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session.
///
/// Tokens are held as secrets; the custom `Debug` impl never prints them.
pub struct Session {
    pub user: User,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Unix timestamp (seconds) after which the access token is rejected.
    pub expires_at: i64,
}

impl Session {
    /// Seconds before `expires_at` at which the session is treated as expired.
    pub const EXPIRY_MARGIN_SECS: i64 = 60;

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now + Self::EXPIRY_MARGIN_SECS >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: i64) -> Session {
        Session {
            user: User {
                id: "user-1".to_string(),
                email: Some("a@example.com".to_string()),
            },
            access_token: SecretString::from("access-secret".to_string()),
            refresh_token: SecretString::from("refresh-secret".to_string()),
            expires_at,
        }
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let output = format!("{:?}", session(0));
        assert!(!output.contains("access-secret"));
        assert!(!output.contains("refresh-secret"));
        assert!(output.contains("[REDACTED]"));
        assert!(output.contains("user-1"));
    }

    #[test]
    fn test_session_expiry_margin() {
        let s = session(1_000);
        assert!(!s.is_expired_at(900));
        assert!(s.is_expired_at(940));
        assert!(s.is_expired_at(2_000));
    }

    #[test]
    fn test_bookmark_deserializes_backend_timestamp() {
        let json = r#"{
            "id": "b1",
            "user_id": "u1",
            "title": "Docs",
            "url": "https://example.com",
            "created_at": "2024-05-01T10:20:30.123456+00:00"
        }"#;
        let bookmark: Bookmark = serde_json::from_str(json).unwrap();
        assert_eq!(bookmark.id, "b1");
        assert_eq!(bookmark.created_at.timestamp(), 1714558830);
    }

    #[test]
    fn test_change_event_accessors() {
        let delete = ChangeEvent::Delete {
            old: OldRecord {
                id: "b9".to_string(),
                user_id: None,
            },
        };
        assert_eq!(delete.bookmark_id(), "b9");
        assert_eq!(delete.owner_id(), None);
        assert_eq!(delete.kind(), "DELETE");
    }
}
