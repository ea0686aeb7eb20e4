use super::synchronizer::{FetchError, RemoveOutcome};
use crate::backend::{Bookmark, BookmarkStore, Session};

/// Fetch the owner-filtered snapshot for the session user.
pub async fn fetch_snapshot<S: BookmarkStore>(
    store: &S,
    session: &Session,
) -> Result<Vec<Bookmark>, FetchError> {
    Ok(store.select_bookmarks(session).await?)
}

/// Backend half of an optimistic delete.
///
/// On failure the list is fetched again so the caller can restore it before
/// reporting the error.
pub async fn remove_remote<S: BookmarkStore>(
    store: &S,
    session: &Session,
    id: &str,
) -> RemoveOutcome {
    match store.delete_bookmark(session, id).await {
        Ok(()) => RemoveOutcome::Deleted,
        Err(e) => {
            tracing::warn!(bookmark_id = %id, error = %e, "Backend delete failed, resyncing");
            let resync = fetch_snapshot(store, session).await;
            RemoveOutcome::Failed {
                error: e.into(),
                resync,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{backend_for, session_for};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_failed_delete_triggers_resync() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/bookmarks"))
            .and(query_param("id", "eq.b1"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "message": "internal error",
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/bookmarks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
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
        match remove_remote(&backend, &session_for("u1"), "b1").await {
            RemoveOutcome::Failed { error, resync } => {
                assert_eq!(error.to_string(), "internal error");
                assert_eq!(resync.unwrap().len(), 1);
            }
            RemoveOutcome::Deleted => panic!("delete should have failed"),
        }
    }

    #[tokio::test]
    async fn test_successful_delete_does_not_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        assert!(matches!(
            remove_remote(&backend, &session_for("u1"), "missing").await,
            RemoveOutcome::Deleted
        ));
    }
}
