//! Loopback HTTP listener for the OAuth redirect.
//!
//! The provider sends the browser to `http://127.0.0.1:<port>/auth/callback`
//! with an authorization code. The route exchanges it, forwards the outcome
//! to the TUI as an [`AppEvent::Auth`], and redirects the browser to a page
//! telling the user to go back to the terminal.

use axum::extract::{Query, State};
use axum::response::{Html, Redirect};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::app::AppEvent;
use crate::backend::Session;
use crate::session::{AuthError, SessionAccessor, CALLBACK_PATH};

const DASHBOARD_PATH: &str = "/dashboard";
const HOME_PATH: &str = "/";

const SIGNED_IN_PAGE: &str = "<!doctype html>\
<html><head><meta charset=\"utf-8\"><title>Smart Bookmarks</title></head>\
<body><h1>Signed in</h1><p>You can close this tab and return to the terminal.</p></body></html>";

const HOME_PAGE: &str = "<!doctype html>\
<html><head><meta charset=\"utf-8\"><title>Smart Bookmarks</title></head>\
<body><h1>Smart Bookmarks</h1><p>Sign-in did not complete. Return to the terminal and press <kbd>g</kbd> to try again.</p></body></html>";

/// Result of one pass through the callback route.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    SignedIn(Arc<Session>),
    Failed(String),
}

#[derive(Clone)]
struct CallbackState {
    accessor: SessionAccessor,
    events: mpsc::Sender<AppEvent>,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    /// The provider's own error, if it redirected back with one.
    fn provider_error(&self) -> Option<String> {
        match (&self.error_description, &self.error) {
            (Some(description), _) if !description.is_empty() => Some(description.clone()),
            (_, Some(error)) if !error.is_empty() => Some(error.clone()),
            _ => None,
        }
    }
}

/// Build the callback router.
pub fn router(accessor: SessionAccessor, events: mpsc::Sender<AppEvent>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(auth_callback))
        .route(DASHBOARD_PATH, get(|| async { Html(SIGNED_IN_PAGE) }))
        .route(HOME_PATH, get(|| async { Html(HOME_PAGE) }))
        .with_state(CallbackState { accessor, events })
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "OAuth callback listener started");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn auth_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let result = match params.provider_error() {
        Some(message) => Err(AuthError::Provider(message)),
        None => match params.code.as_deref() {
            Some(code) => state.accessor.exchange_code(code).await,
            None => Err(AuthError::MissingCode),
        },
    };

    let (outcome, target) = match result {
        Ok(session) => {
            tracing::info!(user_id = %session.user_id(), "OAuth sign-in completed");
            (AuthOutcome::SignedIn(session), DASHBOARD_PATH)
        }
        Err(e) => {
            tracing::warn!(error = %e, "OAuth callback failed");
            (AuthOutcome::Failed(e.to_string()), HOME_PATH)
        }
    };

    if let Err(e) = state.events.send(AppEvent::Auth(outcome)).await {
        tracing::warn!(error = %e, event = "Auth", "Channel send failed (receiver dropped)");
    }
    Redirect::to(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::backend_for;
    use crate::storage::Database;
    use std::net::SocketAddr;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        addr: SocketAddr,
        accessor: SessionAccessor,
        events: mpsc::Receiver<AppEvent>,
        _shutdown: tokio::sync::oneshot::Sender<()>,
    }

    async fn start(backend_uri: &str) -> Harness {
        let db = Database::open(":memory:").await.unwrap();
        let accessor = SessionAccessor::new(backend_for(backend_uri), db, "google", 54321).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(accessor.clone(), tx);
        tokio::spawn(serve(listener, app, async move {
            let _ = shutdown_rx.await;
        }));

        Harness {
            addr,
            accessor,
            events: rx,
            _shutdown: shutdown_tx,
        }
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    fn location(response: &reqwest::Response) -> &str {
        response
            .headers()
            .get(reqwest::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn test_code_exchange_redirects_to_dashboard() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "pkce"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600,
                "user": { "id": "u1", "email": "u1@example.com" },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut harness = start(&server.uri()).await;
        harness.accessor.begin_sign_in().await.unwrap();

        let response = client()
            .get(format!("http://{}/auth/callback?code=abc", harness.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 303);
        assert_eq!(location(&response), "/dashboard");

        match harness.events.recv().await {
            Some(AppEvent::Auth(AuthOutcome::SignedIn(session))) => {
                assert_eq!(session.user_id(), "u1");
            }
            _ => panic!("expected a signed-in event"),
        }
    }

    #[tokio::test]
    async fn test_missing_code_redirects_home() {
        let server = MockServer::start().await;
        let mut harness = start(&server.uri()).await;

        let response = client()
            .get(format!("http://{}/auth/callback", harness.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 303);
        assert_eq!(location(&response), "/");
        assert!(matches!(
            harness.events.recv().await,
            Some(AppEvent::Auth(AuthOutcome::Failed(_)))
        ));
    }

    #[tokio::test]
    async fn test_provider_error_redirects_home() {
        let server = MockServer::start().await;
        let mut harness = start(&server.uri()).await;

        let response = client()
            .get(format!(
                "http://{}/auth/callback?error=access_denied&error_description=User%20cancelled",
                harness.addr
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(location(&response), "/");
        match harness.events.recv().await {
            Some(AppEvent::Auth(AuthOutcome::Failed(message))) => {
                assert_eq!(message, "Sign-in failed: User cancelled");
            }
            _ => panic!("expected a failure event"),
        }
    }

    #[tokio::test]
    async fn test_exchange_without_pending_sign_in_redirects_home() {
        let server = MockServer::start().await;
        let harness = start(&server.uri()).await;

        let response = client()
            .get(format!("http://{}/auth/callback?code=abc", harness.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(location(&response), "/");
    }

    #[tokio::test]
    async fn test_landing_pages_render() {
        let server = MockServer::start().await;
        let harness = start(&server.uri()).await;

        let body = client()
            .get(format!("http://{}/dashboard", harness.addr))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("return to the terminal"));
    }
}
