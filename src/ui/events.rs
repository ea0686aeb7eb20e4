//! Application event handling.
//!
//! This module applies background task results (session checks, list loads,
//! writes, deletes) and realtime channel messages to the app state.

use crate::app::{App, AppEvent, AuthState};
use crate::backend::realtime::ChannelEvent;
use crate::callback::AuthOutcome;
use crate::sync::{Applied, ChannelMessage, ChannelState};
use crate::writer::WriteError;
use secrecy::ExposeSecret;
use tokio::sync::mpsc;

use super::helpers::{enter_dashboard, resubscribe};

/// Handle application events from background tasks.
pub(super) async fn handle_app_event(
    app: &mut App,
    event: AppEvent,
    event_tx: &mpsc::Sender<AppEvent>,
) {
    match event {
        AppEvent::SessionChecked(Some(session)) => {
            tracing::info!(user_id = %session.user_id(), "Restored stored session");
            enter_dashboard(app, session, event_tx);
        }
        AppEvent::SessionChecked(None) => {
            if matches!(app.auth, AuthState::Loading) {
                app.auth = AuthState::Anonymous;
            }
        }

        AppEvent::Auth(AuthOutcome::SignedIn(session)) => {
            let greeting = match session.email() {
                Some(email) => format!("Signed in as {}", email),
                None => "Signed in".to_string(),
            };
            enter_dashboard(app, session, event_tx);
            app.set_status(greeting);
        }
        AppEvent::Auth(AuthOutcome::Failed(message)) => {
            if !app.is_signed_in() {
                app.auth = AuthState::Anonymous;
            }
            app.sign_in_url = None;
            app.set_status(message);
        }

        AppEvent::SignInStarted(Ok(url)) => {
            app.sign_in_url = Some(url);
            app.set_status("Finish signing in in your browser");
        }
        AppEvent::SignInStarted(Err(message)) => {
            tracing::warn!(error = %message, "Could not start sign-in");
            app.set_status(message);
        }

        AppEvent::SignedOut(Ok(())) => app.set_status("Signed out"),
        AppEvent::SignedOut(Err(message)) => {
            app.set_status(format!("Signed out locally ({})", message));
        }

        AppEvent::SessionRefreshed(session) => {
            let Some(current) = app.session() else {
                return;
            };
            if current.user_id() != session.user_id()
                || current.access_token.expose_secret() == session.access_token.expose_secret()
            {
                return;
            }
            app.adopt_session(session);
            // The open channel joined with the old token.
            resubscribe(app, event_tx);
        }
        AppEvent::SessionExpired { user_id } => {
            if app.user_id() != Some(user_id.as_str()) {
                return;
            }
            tracing::info!(user_id = %user_id, "Session expired, returning to sign-in");
            app.become_anonymous();
            app.set_status("Your session has expired. Press [g] to sign in again");
        }

        AppEvent::BookmarksLoaded {
            user_id,
            generation,
            result,
        } => {
            if app.user_id() != Some(user_id.as_str()) {
                tracing::debug!(user_id = %user_id, "Dropping load result for inactive user");
                return;
            }
            if app.sync.finish_load(&user_id, generation, result) {
                app.clamp_selection();
            }
        }

        AppEvent::BookmarkSubmitted { user_id, result } => {
            if app.user_id() != Some(user_id.as_str()) {
                return;
            }
            if let Ok(bookmark) = &result {
                tracing::info!(bookmark_id = %bookmark.id, "Bookmark added");
            }
            app.form.finish_submit(&result, &mut app.refresh);
        }

        AppEvent::BookmarkRemoved {
            user_id,
            id,
            outcome,
        } => {
            if app.user_id() != Some(user_id.as_str()) {
                return;
            }
            app.sync.finish_remove(&user_id, &id, outcome);
            app.clamp_selection();
        }

        AppEvent::Channel(message) => handle_channel_message(app, message),

        AppEvent::TaskPanicked { task, error } => {
            if task == "submit" {
                app.form.finish_submit(
                    &Err(WriteError::Rejected("Something went wrong".to_string())),
                    &mut app.refresh,
                );
            }
            app.set_status(format!("Internal error in {}: {}", task, error));
        }
    }
}

fn handle_channel_message(app: &mut App, message: ChannelMessage) {
    let ChannelMessage { channel, event } = message;
    if !app.subscriptions.accepts(&channel) {
        tracing::debug!(
            user_id = %channel.user_id,
            generation = channel.generation,
            "Dropping message from stale channel"
        );
        return;
    }

    match event {
        ChannelEvent::Status(status) => {
            app.subscriptions.on_status(&channel, status);
            if let ChannelState::Error(reason) = app.subscriptions.state() {
                tracing::warn!(reason = %reason, "Realtime channel degraded");
            }
        }
        ChannelEvent::Change(change) => {
            let kind = change.kind();
            let applied = app.sync.apply(&channel.user_id, change);
            if applied != Applied::Ignored {
                tracing::debug!(kind, ?applied, "Applied change event");
            }
            app.clamp_selection();
        }
    }
}
