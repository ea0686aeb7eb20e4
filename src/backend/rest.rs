use super::{decode_json, Backend, BackendError, Bookmark, BookmarkStore, NewBookmark, Session};
use reqwest::Method;
use url::Url;

const BOOKMARKS_TABLE: &str = "rest/v1/bookmarks";

impl Backend {
    fn bookmarks_url(&self) -> Result<Url, BackendError> {
        self.endpoint(BOOKMARKS_TABLE)
    }

    fn authed(&self, method: Method, url: Url, session: &Session) -> reqwest::RequestBuilder {
        self.request(method, url)
            .header("Authorization", session.bearer())
    }
}

impl BookmarkStore for Backend {
    async fn select_bookmarks(&self, session: &Session) -> Result<Vec<Bookmark>, BackendError> {
        let mut url = self.bookmarks_url()?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &format!("eq.{}", session.user_id()))
            .append_pair("order", "created_at.desc");

        let body = self.send(self.authed(Method::GET, url, session)).await?;
        let rows: Vec<Bookmark> = decode_json(&body)?;
        tracing::debug!(user_id = %session.user_id(), count = rows.len(), "Fetched bookmarks");
        Ok(rows)
    }

    async fn insert_bookmark(
        &self,
        session: &Session,
        row: &NewBookmark,
    ) -> Result<Bookmark, BackendError> {
        let url = self.bookmarks_url()?;
        let request = self
            .authed(Method::POST, url, session)
            .header("Prefer", "return=representation")
            .json(row);

        let body = self.send(request).await?;
        let mut rows: Vec<Bookmark> = decode_json(&body)?;
        let inserted = rows
            .pop()
            .ok_or_else(|| BackendError::Decode("insert returned no rows".into()))?;
        tracing::info!(bookmark_id = %inserted.id, "Bookmark inserted");
        Ok(inserted)
    }

    async fn delete_bookmark(&self, session: &Session, id: &str) -> Result<(), BackendError> {
        let mut url = self.bookmarks_url()?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", id))
            .append_pair("user_id", &format!("eq.{}", session.user_id()));

        self.send(self.authed(Method::DELETE, url, session)).await?;
        tracing::info!(bookmark_id = %id, "Bookmark deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{backend_for, session_for};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row_json(id: &str, created_at: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "user_id": "u1",
            "title": format!("Title {}", id),
            "url": format!("https://example.com/{}", id),
            "created_at": created_at,
        })
    }

    #[tokio::test]
    async fn test_select_filters_by_owner_and_orders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/bookmarks"))
            .and(query_param("user_id", "eq.u1"))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "anon-key"))
            .and(header("Authorization", "Bearer access-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                row_json("b2", "2024-05-02T00:00:00+00:00"),
                row_json("b1", "2024-05-01T00:00:00+00:00"),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        let rows = backend.select_bookmarks(&session_for("u1")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "b2");
    }

    #[tokio::test]
    async fn test_insert_returns_stored_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/bookmarks"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(serde_json::json!({
                "user_id": "u1",
                "title": "Docs",
                "url": "https://example.com",
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!([row_json("new", "2024-05-03T00:00:00+00:00")])),
            )
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        let row = NewBookmark {
            user_id: "u1".to_string(),
            title: "Docs".to_string(),
            url: "https://example.com".to_string(),
        };
        let inserted = backend
            .insert_bookmark(&session_for("u1"), &row)
            .await
            .unwrap();
        assert_eq!(inserted.id, "new");
    }

    #[tokio::test]
    async fn test_insert_rejection_keeps_backend_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/bookmarks"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "code": "42501",
                "message": "new row violates row-level security policy for table \"bookmarks\"",
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        let row = NewBookmark {
            user_id: "someone-else".to_string(),
            title: "Docs".to_string(),
            url: "https://example.com".to_string(),
        };
        let err = backend
            .insert_bookmark(&session_for("u1"), &row)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "new row violates row-level security policy for table \"bookmarks\""
        );
    }

    #[tokio::test]
    async fn test_delete_scoped_to_id_and_owner() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/bookmarks"))
            .and(query_param("id", "eq.b1"))
            .and(query_param("user_id", "eq.u1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        backend
            .delete_bookmark(&session_for("u1"), "b1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_select_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let backend = backend_for(&server.uri());
        let err = backend
            .select_bookmarks(&session_for("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }
}
