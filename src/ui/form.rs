use crate::app::{App, Focus};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::util::{display_width, truncate_to_width};

/// Render the add-bookmark form
pub fn render(f: &mut Frame, app: &App, area: Rect) {
    if area.width < 4 || area.height < 4 {
        return;
    }

    let form_focused = matches!(app.focus, Focus::Title | Focus::Url);
    let outer = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style(form_focused))
        .title("Add Bookmark");
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(1),
        ])
        .split(inner);

    render_field(f, "Title", &app.form.title, app.focus == Focus::Title, chunks[0]);
    render_field(f, "URL", &app.form.url, app.focus == Focus::Url, chunks[1]);

    let mut lines = Vec::new();
    if app.form.is_busy() {
        lines.push(Line::from(Span::styled(
            "Adding...",
            Style::default().fg(Color::Yellow),
        )));
    } else if let Some(error) = app.form.error() {
        lines.push(Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(Color::Red),
        )));
    } else if app.form.success_visible() {
        lines.push(Line::from(Span::styled(
            "Bookmark added!",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "[Enter] Add bookmark  [Tab] Next  [Esc] List",
        Style::default().fg(Color::DarkGray),
    )));

    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), chunks[2]);
}

fn render_field(f: &mut Frame, label: &str, value: &str, focused: bool, area: Rect) {
    // Keep the cursor end of long input visible.
    let room = area.width.saturating_sub(3) as usize;
    let shown = if display_width(value) > room {
        let tail: String = value.chars().rev().collect();
        let tail = truncate_to_width(&tail, room).into_owned();
        tail.chars().rev().collect::<String>()
    } else {
        value.to_string()
    };

    let mut spans = vec![Span::raw(shown)];
    if focused {
        spans.push(Span::styled("_", Style::default().fg(Color::Cyan)));
    }

    let input = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style(focused))
            .title(label.to_string()),
    );
    f.render_widget(input, area);
}

fn border_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}
