//! Bookmark writer: validates the add-bookmark form and inserts the row.
//!
//! Validation is pure and runs before any backend call. A successful insert
//! clears the form, shows a short-lived success notice, and bumps the
//! [`RefreshSignal`] exactly once so the list reloads.

use std::time::{Duration, Instant};
use thiserror::Error;

use crate::backend::{BackendError, Bookmark, BookmarkStore, NewBookmark, Session};
use crate::util::parse_web_url;

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_URL_LEN: usize = 2048;

/// How long the "Bookmark added" notice stays up.
pub const SUCCESS_NOTICE: Duration = Duration::from_secs(3);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Url,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Title => f.write_str("Title"),
            Field::Url => f.write_str("URL"),
        }
    }
}

/// Why a title/url pair was refused before reaching the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(Field),

    #[error("{field} must be less than {max} characters")]
    TooLong { field: Field, max: usize },

    #[error("Please enter a valid URL (e.g., https://example.com)")]
    InvalidUrl,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("You must be logged in to add bookmarks")]
    NotSignedIn,

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The backend refused the write; the message is shown verbatim.
    #[error("{0}")]
    Rejected(String),

    /// The access token was refused; the session is no longer usable.
    #[error("{0}")]
    SessionExpired(String),
}

impl WriteError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, WriteError::SessionExpired(_))
    }
}

impl From<BackendError> for WriteError {
    fn from(err: BackendError) -> Self {
        if err.is_token_rejected() {
            WriteError::SessionExpired(err.to_string())
        } else {
            WriteError::Rejected(err.to_string())
        }
    }
}

// ============================================================================
// Validation and Submit
// ============================================================================

/// Check a title/url pair. Both are trimmed first; lengths count characters.
pub fn validate(title: &str, url: &str) -> Result<(), ValidationError> {
    let title = title.trim();
    let url = url.trim();

    if title.is_empty() {
        return Err(ValidationError::Required(Field::Title));
    }
    if url.is_empty() {
        return Err(ValidationError::Required(Field::Url));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::TooLong {
            field: Field::Title,
            max: MAX_TITLE_LEN,
        });
    }
    if url.chars().count() > MAX_URL_LEN {
        return Err(ValidationError::TooLong {
            field: Field::Url,
            max: MAX_URL_LEN,
        });
    }
    parse_web_url(url).map_err(|_| ValidationError::InvalidUrl)?;

    Ok(())
}

/// Validate and insert a bookmark for the session's user.
///
/// Makes no backend call unless the session exists and validation passes.
pub async fn submit<S: BookmarkStore>(
    store: &S,
    session: Option<&Session>,
    title: &str,
    url: &str,
) -> Result<Bookmark, WriteError> {
    let session = session.ok_or(WriteError::NotSignedIn)?;
    validate(title, url)?;

    let row = NewBookmark {
        user_id: session.user_id().to_string(),
        title: title.trim().to_string(),
        url: url.trim().to_string(),
    };
    let inserted = store.insert_bookmark(session, &row).await?;
    Ok(inserted)
}

// ============================================================================
// Form State
// ============================================================================

/// Monotonic counter other components watch to know when to reload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSignal(u64);

impl RefreshSignal {
    pub fn bump(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// State of the add-bookmark form.
#[derive(Debug, Default)]
pub struct BookmarkForm {
    pub title: String,
    pub url: String,
    busy: bool,
    error: Option<String>,
    success_at: Option<Instant>,
}

impl BookmarkForm {
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn push_title(&mut self, c: char) {
        if self.title.chars().count() < MAX_TITLE_LEN {
            self.title.push(c);
        }
    }

    pub fn push_url(&mut self, c: char) {
        self.url.push(c);
    }

    pub fn pop(&mut self, field: Field) {
        match field {
            Field::Title => self.title.pop(),
            Field::Url => self.url.pop(),
        };
    }

    /// Record an error without touching the fields.
    pub fn set_error(&mut self, error: &WriteError) {
        if let WriteError::Invalid(e) = error {
            tracing::debug!(error = %e, "Bookmark form rejected input");
        }
        self.error = Some(error.to_string());
    }

    /// Start a submission: validates locally and, when the input passes,
    /// marks the form busy and returns the values to send.
    ///
    /// Returns `None` while a submission is already in flight or when the
    /// input was rejected (the error is then set on the form).
    pub fn begin_submit(&mut self, signed_in: bool) -> Option<(String, String)> {
        if self.busy {
            return None;
        }
        self.error = None;
        self.success_at = None;

        if !signed_in {
            self.set_error(&WriteError::NotSignedIn);
            return None;
        }
        if let Err(e) = validate(&self.title, &self.url) {
            self.set_error(&WriteError::Invalid(e));
            return None;
        }

        self.busy = true;
        Some((self.title.clone(), self.url.clone()))
    }

    /// Apply the outcome of a submission started with `begin_submit`.
    pub fn finish_submit(
        &mut self,
        result: &Result<Bookmark, WriteError>,
        refresh: &mut RefreshSignal,
    ) {
        self.busy = false;
        match result {
            Ok(_) => {
                self.title.clear();
                self.url.clear();
                self.error = None;
                self.success_at = Some(Instant::now());
                refresh.bump();
            }
            Err(e) => self.set_error(e),
        }
    }

    pub fn success_visible(&self) -> bool {
        self.success_at
            .is_some_and(|at| at.elapsed() < SUCCESS_NOTICE)
    }

    /// Drop an expired success notice. Returns true if anything changed.
    pub fn expire_notice(&mut self) -> bool {
        if self.success_at.is_some() && !self.success_visible() {
            self.success_at = None;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{backend_for, session_for};
    use chrono::Utc;
    use proptest::prelude::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bookmark(id: &str) -> Bookmark {
        Bookmark {
            id: id.to_string(),
            user_id: "u1".to_string(),
            title: "Docs".to_string(),
            url: "https://example.com".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_validation_order_and_messages() {
        assert_eq!(
            validate("  ", "").unwrap_err().to_string(),
            "Title is required"
        );
        assert_eq!(
            validate("Docs", "   ").unwrap_err().to_string(),
            "URL is required"
        );
        let long_title = "t".repeat(256);
        assert_eq!(
            validate(&long_title, "not-a-url").unwrap_err().to_string(),
            "Title must be less than 255 characters"
        );
        let long_url = format!("https://example.com/{}", "a".repeat(2030));
        assert_eq!(
            validate("Docs", &long_url).unwrap_err(),
            ValidationError::TooLong {
                field: Field::Url,
                max: MAX_URL_LEN
            }
        );
        assert_eq!(
            validate("Docs", "not-a-url").unwrap_err().to_string(),
            "Please enter a valid URL (e.g., https://example.com)"
        );
    }

    #[test]
    fn test_lengths_count_characters() {
        let title: String = "é".repeat(MAX_TITLE_LEN);
        assert!(title.len() > MAX_TITLE_LEN);
        assert!(validate(&title, "https://example.com").is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        assert!(validate("  Docs  ", "  https://example.com  ").is_ok());
    }

    proptest! {
        #[test]
        fn prop_valid_pairs_accepted(
            title in "[A-Za-z0-9][A-Za-z0-9 ]{0,200}",
            host in "[a-z]{1,20}",
            tail in "[a-z0-9/]{0,40}",
            secure in any::<bool>(),
        ) {
            let scheme = if secure { "https" } else { "http" };
            let url = format!("{}://{}.com/{}", scheme, host, tail);
            prop_assert!(validate(&title, &url).is_ok());
        }

        #[test]
        fn prop_long_title_rejected(extra in 1usize..200) {
            let title = "x".repeat(MAX_TITLE_LEN + extra);
            prop_assert_eq!(
                validate(&title, "https://example.com"),
                Err(ValidationError::TooLong { field: Field::Title, max: MAX_TITLE_LEN })
            );
        }

        #[test]
        fn prop_long_url_rejected(extra in 1usize..500) {
            let base = "https://example.com/";
            let url = format!("{}{}", base, "a".repeat(MAX_URL_LEN - base.len() + extra));
            prop_assert_eq!(
                validate("Docs", &url),
                Err(ValidationError::TooLong { field: Field::Url, max: MAX_URL_LEN })
            );
        }

        #[test]
        fn prop_non_web_schemes_rejected(
            scheme in "(ftp|file|mailto|javascript|data)",
            rest in "[a-z]{1,20}",
        ) {
            let url = format!("{}://{}", scheme, rest);
            prop_assert_eq!(validate("Docs", &url), Err(ValidationError::InvalidUrl));
        }
    }

    #[tokio::test]
    async fn test_submit_trims_and_inserts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/bookmarks"))
            .and(body_json(serde_json::json!({
                "user_id": "u1",
                "title": "Docs",
                "url": "https://example.com",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([{
                "id": "b1",
                "user_id": "u1",
                "title": "Docs",
                "url": "https://example.com",
                "created_at": "2024-05-01T00:00:00+00:00",
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        let session = session_for("u1");
        let inserted = submit(&backend, Some(&session), " Docs ", " https://example.com ")
            .await
            .unwrap();
        assert_eq!(inserted.id, "b1");
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_backend_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        let session = session_for("u1");
        let err = submit(&backend, Some(&session), "Docs", "not-a-url")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WriteError::Invalid(ValidationError::InvalidUrl)
        ));
    }

    #[tokio::test]
    async fn test_submit_without_session() {
        let server = MockServer::start().await;
        let backend = backend_for(&server.uri());
        let err = submit(&backend, None, "Docs", "https://example.com")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "You must be logged in to add bookmarks");
    }

    #[tokio::test]
    async fn test_backend_rejection_is_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "message": "duplicate key value violates unique constraint",
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        let session = session_for("u1");
        let err = submit(&backend, Some(&session), "Docs", "https://example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Rejected(_)));
        assert_eq!(err.to_string(), "duplicate key value violates unique constraint");
    }

    #[tokio::test]
    async fn test_refused_token_is_session_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "message": "JWT expired",
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        let session = session_for("u1");
        let err = submit(&backend, Some(&session), "Docs", "https://example.com")
            .await
            .unwrap_err();
        assert!(err.is_session_expired());
        assert_eq!(err.to_string(), "JWT expired");
    }

    #[test]
    fn test_form_success_clears_and_bumps_once() {
        let mut form = BookmarkForm::default();
        let mut refresh = RefreshSignal::default();
        form.title = "Docs".to_string();
        form.url = "https://example.com".to_string();

        let values = form.begin_submit(true).unwrap();
        assert_eq!(values.0, "Docs");
        assert!(form.is_busy());
        assert!(form.begin_submit(true).is_none());

        form.finish_submit(&Ok(bookmark("b1")), &mut refresh);
        assert!(!form.is_busy());
        assert!(form.title.is_empty());
        assert!(form.url.is_empty());
        assert!(form.success_visible());
        assert_eq!(refresh.value(), 1);
    }

    #[test]
    fn test_form_failure_keeps_fields() {
        let mut form = BookmarkForm::default();
        let mut refresh = RefreshSignal::default();
        form.title = "Docs".to_string();
        form.url = "https://example.com".to_string();
        form.begin_submit(true).unwrap();

        form.finish_submit(&Err(WriteError::Rejected("nope".into())), &mut refresh);
        assert_eq!(form.title, "Docs");
        assert_eq!(form.error(), Some("nope"));
        assert_eq!(refresh.value(), 0);
    }

    #[test]
    fn test_form_local_rejections() {
        let mut form = BookmarkForm::default();
        form.title = "Docs".to_string();
        form.url = "https://example.com".to_string();
        assert!(form.begin_submit(false).is_none());
        assert_eq!(form.error(), Some("You must be logged in to add bookmarks"));

        form.url = "nope".to_string();
        assert!(form.begin_submit(true).is_none());
        assert!(!form.is_busy());
        assert_eq!(
            form.error(),
            Some("Please enter a valid URL (e.g., https://example.com)")
        );
    }

    #[test]
    fn test_title_input_capped() {
        let mut form = BookmarkForm::default();
        for _ in 0..300 {
            form.push_title('a');
        }
        assert_eq!(form.title.chars().count(), MAX_TITLE_LEN);
        form.pop(Field::Title);
        assert_eq!(form.title.chars().count(), MAX_TITLE_LEN - 1);
    }
}
