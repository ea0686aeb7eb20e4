use crate::app::{App, AuthState};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

const PRODUCT_NAME: &str = "Smart Bookmarks";

/// What the navigation bar shows for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavState {
    Loading,
    Authenticated { email: String },
    Anonymous,
}

impl NavState {
    pub fn of(auth: &AuthState) -> Self {
        match auth {
            AuthState::Loading => NavState::Loading,
            AuthState::Authenticated(session) => NavState::Authenticated {
                email: session.email().unwrap_or("signed in").to_string(),
            },
            AuthState::Anonymous => NavState::Anonymous,
        }
    }
}

/// Render the navigation bar
pub fn render(f: &mut Frame, app: &App, area: Rect) {
    if area.width < 1 || area.height < 1 {
        return;
    }

    let block = Block::default().borders(Borders::BOTTOM);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(PRODUCT_NAME.len() as u16 + 2), Constraint::Min(0)])
        .split(inner);

    let brand = Paragraph::new(Span::styled(
        PRODUCT_NAME,
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ));
    f.render_widget(brand, chunks[0]);

    let right = match NavState::of(&app.auth) {
        NavState::Loading => Line::from(Span::styled(
            "Loading...",
            Style::default().fg(Color::DarkGray),
        )),
        NavState::Authenticated { email } => Line::from(vec![
            Span::styled(email, Style::default().fg(Color::Gray)),
            Span::raw("  "),
            Span::styled("[L] Sign out", Style::default().fg(Color::Yellow)),
        ]),
        NavState::Anonymous => Line::from(Span::styled(
            "[g] Sign in with Google",
            Style::default().fg(Color::Yellow),
        )),
    };
    f.render_widget(Paragraph::new(right).alignment(Alignment::Right), chunks[1]);
}
