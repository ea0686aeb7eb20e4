//! Input handling for the TUI.
//!
//! The landing screen only knows sign-in and quit. On the dashboard, keys go
//! to the focused form field or to the bookmark list.

use crate::app::{App, AppEvent, AuthState, Focus};
use crate::sync::ChannelState;
use crate::writer::Field;
use anyhow::Result;
use crossterm::event::{KeyCode, KeyModifiers};
use tokio::sync::mpsc;

use super::helpers::{
    ensure_subscribed, open_selected, resubscribe, spawn_load, spawn_remove_selected,
    spawn_sign_in, spawn_sign_out, spawn_submit,
};
use super::Action;

/// Main input dispatch function.
pub(super) async fn handle_input(
    app: &mut App,
    code: KeyCode,
    modifiers: KeyModifiers,
    event_tx: &mpsc::Sender<AppEvent>,
) -> Result<Action> {
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        return Ok(Action::Quit);
    }

    if app.is_signed_in() {
        Ok(handle_dashboard_input(app, code, event_tx))
    } else {
        Ok(handle_landing_input(app, code, event_tx))
    }
}

fn handle_landing_input(
    app: &mut App,
    code: KeyCode,
    event_tx: &mpsc::Sender<AppEvent>,
) -> Action {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => return Action::Quit,
        KeyCode::Char('g') | KeyCode::Enter => {
            if matches!(app.auth, AuthState::Loading) {
                app.set_status("Still checking for a saved session...");
            } else {
                spawn_sign_in(app, event_tx);
            }
        }
        _ => {}
    }
    Action::Continue
}

fn handle_dashboard_input(
    app: &mut App,
    code: KeyCode,
    event_tx: &mpsc::Sender<AppEvent>,
) -> Action {
    match app.focus {
        Focus::Title => handle_field_input(app, Field::Title, code, event_tx),
        Focus::Url => handle_field_input(app, Field::Url, code, event_tx),
        Focus::List => return handle_list_input(app, code, event_tx),
    }
    Action::Continue
}

/// Typing into a form field. Text keys never trigger list shortcuts here.
fn handle_field_input(
    app: &mut App,
    field: Field,
    code: KeyCode,
    event_tx: &mpsc::Sender<AppEvent>,
) {
    match code {
        KeyCode::Tab => app.focus = app.focus.next(),
        KeyCode::BackTab => app.focus = app.focus.prev(),
        KeyCode::Esc => app.focus = Focus::List,
        KeyCode::Enter => spawn_submit(app, event_tx),
        KeyCode::Backspace if !app.form.is_busy() => app.form.pop(field),
        KeyCode::Char(c) if !app.form.is_busy() && !c.is_control() => match field {
            Field::Title => app.form.push_title(c),
            Field::Url => app.form.push_url(c),
        },
        _ => {}
    }
}

fn handle_list_input(app: &mut App, code: KeyCode, event_tx: &mpsc::Sender<AppEvent>) -> Action {
    match code {
        KeyCode::Char('q') => return Action::Quit,
        KeyCode::Char('j') | KeyCode::Down => app.nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.nav_up(),
        KeyCode::Tab => app.focus = app.focus.next(),
        KeyCode::BackTab => app.focus = app.focus.prev(),
        KeyCode::Char('a') => app.focus = Focus::Title,
        KeyCode::Char('d') | KeyCode::Delete => spawn_remove_selected(app, event_tx),
        KeyCode::Char('o') | KeyCode::Enter => open_selected(app),
        KeyCode::Char('r') if app.sync.is_loading() => {
            app.set_status("Already refreshing...");
        }
        KeyCode::Char('r') => {
            spawn_load(app, event_tx);
            if matches!(
                app.subscriptions.state(),
                ChannelState::Error(_) | ChannelState::Unsubscribed
            ) {
                resubscribe(app, event_tx);
            } else {
                ensure_subscribed(app, event_tx);
            }
            app.set_status("Refreshing...");
        }
        KeyCode::Char('L') => spawn_sign_out(app, event_tx),
        _ => {}
    }
    Action::Continue
}
