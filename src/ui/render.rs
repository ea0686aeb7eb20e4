//! Render functions for the TUI.
//!
//! This module handles all rendering logic: the navigation bar on top, the
//! landing or dashboard screen in the middle, and the status bar at the
//! bottom.

use crate::app::{App, AuthState};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Wrap},
    Frame,
};

use super::{form, list, navbar, status};

/// Minimum terminal dimensions required for normal operation.
pub(super) const MIN_WIDTH: u16 = 60;
pub(super) const MIN_HEIGHT: u16 = 12;

/// Main render dispatch function.
///
/// Handles terminal size validation before rendering.
pub(super) fn render(f: &mut Frame, app: &App) {
    let area = f.area();

    // Guard against zero-width/height to prevent panics
    if area.width < 1 || area.height < 1 {
        return;
    }

    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        let msg = if area.height < 3 || area.width < 20 {
            Paragraph::new("Too small")
        } else {
            Paragraph::new(format!(
                "Terminal too small\n\nMinimum: {}x{}\nCurrent: {}x{}",
                MIN_WIDTH, MIN_HEIGHT, area.width, area.height
            ))
            .alignment(Alignment::Center)
        };
        f.render_widget(msg, area);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    navbar::render(f, app, chunks[0]);
    match app.auth {
        AuthState::Authenticated(_) => render_dashboard(f, app, chunks[1]),
        AuthState::Loading | AuthState::Anonymous => render_landing(f, app, chunks[1]),
    }
    status::render(f, app, chunks[2]);
}

/// Render the signed-out landing screen.
fn render_landing(f: &mut Frame, app: &App, area: Rect) {
    let call_to_action = if matches!(app.auth, AuthState::Loading) {
        Span::styled(
            "Checking for a saved session...",
            Style::default().fg(Color::DarkGray),
        )
    } else {
        Span::styled(
            "Press [g] to sign in with Google",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    };

    let lines = vec![
        Line::from(Span::styled(
            "Smart Bookmarks",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Save, organize, and sync your bookmarks across all your devices."),
        Line::from("Private to your account and updated in real time."),
        Line::from(""),
        Line::from(call_to_action),
    ];

    // Vertically centre the text block.
    let height = lines.len() as u16;
    let top = area.height.saturating_sub(height) / 2;
    let centered = Rect {
        y: area.y + top,
        height: height.min(area.height),
        ..area
    };

    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, centered);
}

/// Render the dashboard: form on the left, list on the right, sync notice below.
fn render_dashboard(f: &mut Frame, app: &App, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(38), Constraint::Percentage(62)])
        .split(rows[0]);

    form::render(f, app, columns[0]);
    list::render(f, app, columns[1]);
    status::render_notice(f, app, rows[1]);
}
