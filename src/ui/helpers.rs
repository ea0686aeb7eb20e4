//! Helper functions for UI operations.
//!
//! Every backend call the UI makes is spawned from here. Each task catches
//! its own panics and reports its result as an [`AppEvent`].

use crate::app::{App, AppEvent};
use crate::backend::Session;
use crate::session::{AuthError, SessionAccessor};
use crate::sync::{fetch_snapshot, remove_remote, FetchError, RemoveOutcome};
use crate::util::validate_url_for_open;
use crate::writer::{self, WriteError};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wraps a future to catch panics and convert them to errors.
///
/// # Returns
///
/// - `Ok(result)` if the future completes normally
/// - `Err(panic_message)` if the future panics
pub(super) async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else if let Some(e) = panic.downcast_ref::<Box<dyn std::error::Error + Send>>() {
                e.to_string()
            } else {
                format!("Unknown panic: {:?}", (*panic).type_id())
            }
        })
}

/// Spawn `work`, send the event it produces, and report a panic instead if
/// it has one.
fn spawn_reporting<F>(task: &'static str, tx: &mpsc::Sender<AppEvent>, work: F)
where
    F: std::future::Future<Output = AppEvent> + Send + 'static,
{
    let tx = tx.clone();
    tokio::spawn(async move {
        let event = match catch_task_panic(work).await {
            Ok(event) => event,
            Err(panic_msg) => {
                tracing::error!(task, error = %panic_msg, "Background task panicked");
                AppEvent::TaskPanicked {
                    task,
                    error: panic_msg,
                }
            }
        };
        if let Err(e) = tx.send(event).await {
            tracing::warn!(error = %e, task, "Channel send failed (receiver dropped)");
        }
    });
}

/// Look up the stored session in the background.
pub fn spawn_session_check(app: &App, tx: &mpsc::Sender<AppEvent>) {
    let accessor = app.accessor.clone();
    spawn_reporting("session_check", tx, async move {
        AppEvent::SessionChecked(accessor.get_current_session().await)
    });
}

pub(super) fn spawn_sign_in(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    app.set_status("Opening browser for sign-in...");
    let accessor = app.accessor.clone();
    spawn_reporting("sign_in", tx, async move {
        AppEvent::SignInStarted(accessor.sign_in().await.map_err(|e| e.to_string()))
    });
}

/// Sign out: the UI drops the session at once, the backend revoke runs behind.
pub(super) fn spawn_sign_out(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    let Some(session) = app.session().cloned() else {
        return;
    };
    tracing::info!(user_id = %session.user_id(), "Signing out");
    app.become_anonymous();
    app.set_status("Signing out...");

    let accessor = app.accessor.clone();
    spawn_reporting("sign_out", tx, async move {
        AppEvent::SignedOut(accessor.sign_out(&session).await.map_err(|e| e.to_string()))
    });
}

/// Enter the dashboard for `session`: load the list and open the channel.
pub(super) fn enter_dashboard(app: &mut App, session: Arc<Session>, tx: &mpsc::Sender<AppEvent>) {
    app.adopt_session(session);
    spawn_load(app, tx);
    ensure_subscribed(app, tx);
}

/// Session to use for a backend call from a spawned task.
///
/// An expired session is refreshed first and the new one is announced with
/// [`AppEvent::SessionRefreshed`]. `None` means the backend refused the
/// refresh; the stored session is already gone. A refresh that fails for any
/// other reason falls back to the old session and lets the call report it.
async fn usable_session(
    accessor: &SessionAccessor,
    session: Arc<Session>,
    tx: &mpsc::Sender<AppEvent>,
) -> Option<Arc<Session>> {
    match accessor.ensure_fresh(&session).await {
        Ok(fresh) => {
            if !Arc::ptr_eq(&fresh, &session) {
                if let Err(e) = tx.send(AppEvent::SessionRefreshed(Arc::clone(&fresh))).await {
                    tracing::warn!(error = %e, "Channel send failed (receiver dropped)");
                }
            }
            Some(fresh)
        }
        Err(AuthError::SessionExpired) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Session refresh failed, using current token");
            Some(session)
        }
    }
}

/// The table refused the access token: forget the session.
async fn session_expired(accessor: &SessionAccessor, user_id: String) -> AppEvent {
    accessor.clear_local().await;
    AppEvent::SessionExpired { user_id }
}

/// Reload the list for the signed-in user.
///
/// A reload already in flight is superseded; its result will be dropped.
pub(super) fn spawn_load(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    let Some(session) = app.session().cloned() else {
        return;
    };
    let generation = app.sync.begin_load();

    let accessor = app.accessor.clone();
    let backend = app.backend.clone();
    let events = tx.clone();
    spawn_reporting("load", tx, async move {
        let user_id = session.user_id().to_string();
        let Some(session) = usable_session(&accessor, session, &events).await else {
            return AppEvent::SessionExpired { user_id };
        };
        let result = fetch_snapshot(&backend, &session).await;
        if result.as_ref().is_err_and(FetchError::is_session_expired) {
            return session_expired(&accessor, user_id).await;
        }
        AppEvent::BookmarksLoaded {
            user_id,
            generation,
            result,
        }
    });
}

/// Submit the form if it passes local validation.
pub(super) fn spawn_submit(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    let session = app.session().cloned();
    let Some((title, url)) = app.form.begin_submit(session.is_some()) else {
        return;
    };
    let Some(session) = session else {
        return;
    };

    let accessor = app.accessor.clone();
    let backend = app.backend.clone();
    let events = tx.clone();
    spawn_reporting("submit", tx, async move {
        let user_id = session.user_id().to_string();
        let Some(session) = usable_session(&accessor, session, &events).await else {
            return AppEvent::SessionExpired { user_id };
        };
        let result = writer::submit(&backend, Some(&session), &title, &url).await;
        if result.as_ref().is_err_and(WriteError::is_session_expired) {
            return session_expired(&accessor, user_id).await;
        }
        AppEvent::BookmarkSubmitted { user_id, result }
    });
}

/// Optimistically delete the selected bookmark.
pub(super) fn spawn_remove_selected(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    let Some(session) = app.session().cloned() else {
        return;
    };
    let Some(id) = app.selected_bookmark().map(|b| b.id.clone()) else {
        return;
    };

    app.sync.begin_remove(&id);
    app.clamp_selection();

    let accessor = app.accessor.clone();
    let backend = app.backend.clone();
    let events = tx.clone();
    spawn_reporting("remove", tx, async move {
        let user_id = session.user_id().to_string();
        let Some(session) = usable_session(&accessor, session, &events).await else {
            return AppEvent::SessionExpired { user_id };
        };
        let outcome = remove_remote(&backend, &session, &id).await;
        if let RemoveOutcome::Failed { error, .. } = &outcome {
            if error.is_session_expired() {
                return session_expired(&accessor, user_id).await;
            }
        }
        AppEvent::BookmarkRemoved {
            user_id,
            id,
            outcome,
        }
    });
}

/// Open the channel for the signed-in user unless it is already open.
pub(super) fn ensure_subscribed(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    let Some(session) = app.session().cloned() else {
        return;
    };
    if app.subscriptions.subscribe(&app.backend, &session, tx) {
        tracing::info!(user_id = %session.user_id(), "Opened realtime channel");
    }
}

/// Close and reopen the channel for the signed-in user.
pub(super) fn resubscribe(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    let Some(session) = app.session().cloned() else {
        return;
    };
    app.subscriptions.resubscribe(&app.backend, &session, tx);
    tracing::info!(user_id = %session.user_id(), "Reopened realtime channel");
}

/// Open the selected bookmark in the system browser.
pub(super) fn open_selected(app: &mut App) {
    let Some((id, raw)) = app
        .selected_bookmark()
        .map(|b| (b.id.clone(), b.url.clone()))
    else {
        return;
    };
    match validate_url_for_open(&raw) {
        Ok(url) => match open::that(url.as_str()) {
            Ok(()) => app.set_status("Opened in browser"),
            Err(e) => app.set_status(format!("Failed to open browser: {}", e)),
        },
        Err(e) => {
            tracing::warn!(bookmark_id = %id, error = %e, "Refusing to open bookmark URL");
            app.set_status(format!("Cannot open: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catch_task_panic_ok() {
        assert_eq!(catch_task_panic(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_catch_task_panic_message() {
        let result: Result<(), String> = catch_task_panic(async { panic!("boom") }).await;
        assert_eq!(result, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_catch_task_panic_formatted_message() {
        let id = 42;
        let result: Result<(), String> =
            catch_task_panic(async move { panic!("bad id {}", id) }).await;
        assert_eq!(result, Err("bad id 42".to_string()));
    }
}
