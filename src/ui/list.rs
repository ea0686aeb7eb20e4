use crate::app::{App, Focus};
use crate::sync::Synchronizer;
use crate::util::{strip_control_chars, truncate_to_width};
use chrono::{DateTime, Local, TimeZone};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

/// Format a creation timestamp like "May 01, 2024, 09:30 AM".
pub fn format_created_at<Tz>(created_at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    created_at.format("%b %d, %Y, %I:%M %p").to_string()
}

/// Panel title: the count, plus a marker while a reload is in flight.
fn list_title(sync: &Synchronizer) -> String {
    if sync.is_loading() && !sync.awaiting_first_load() {
        format!("Your Bookmarks ({}) [reloading]", sync.len())
    } else {
        format!("Your Bookmarks ({})", sync.len())
    }
}

/// Render the bookmark list panel
pub fn render(f: &mut Frame, app: &App, area: Rect) {
    if area.width < 4 || area.height < 3 {
        return;
    }

    let is_focused = app.focus == Focus::List;
    let border_style = if is_focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(list_title(&app.sync));

    let sync = &app.sync;

    if sync.awaiting_first_load() {
        let placeholder = Paragraph::new("Loading bookmarks...")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(placeholder, area);
        return;
    }

    if sync.is_empty() {
        let body = match sync.error() {
            Some(error) => vec![
                Line::from(Span::styled(error.to_string(), Style::default().fg(Color::Red))),
                Line::from(""),
                Line::from(Span::styled(
                    "Press [r] to try again",
                    Style::default().fg(Color::DarkGray),
                )),
            ],
            None => vec![
                Line::from("No bookmarks yet"),
                Line::from(Span::styled(
                    "Add your first bookmark using the form",
                    Style::default().fg(Color::DarkGray),
                )),
            ],
        };
        let paragraph = Paragraph::new(body)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block);
        f.render_widget(paragraph, area);
        return;
    }

    let inner = block.inner(area);
    f.render_widget(block, area);

    let list_area = match sync.error() {
        Some(error) => {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(1), Constraint::Min(0)])
                .split(inner);
            let banner = Paragraph::new(Span::styled(
                format!("{}  [r] retry", error),
                Style::default().fg(Color::White).bg(Color::Red),
            ));
            f.render_widget(banner, chunks[0]);
            chunks[1]
        }
        None => inner,
    };

    let width = list_area.width.saturating_sub(2) as usize;
    let items: Vec<ListItem> = sync
        .bookmarks()
        .iter()
        .map(|bookmark| {
            let title = strip_control_chars(&bookmark.title);
            let url = strip_control_chars(&bookmark.url);

            let mut meta = vec![Span::styled(
                format_created_at(&bookmark.created_at.with_timezone(&Local)),
                Style::default().fg(Color::DarkGray),
            )];
            if sync.deleting() == Some(bookmark.id.as_str()) {
                meta.push(Span::styled("  Deleting...", Style::default().fg(Color::Yellow)));
            }

            ListItem::new(vec![
                Line::from(Span::styled(
                    truncate_to_width(&title, width).into_owned(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    truncate_to_width(&url, width).into_owned(),
                    Style::default().fg(Color::Blue),
                )),
                Line::from(meta),
                Line::from(""),
            ])
        })
        .collect();

    let mut state = ListState::default();
    if is_focused {
        state.select(Some(app.selected));
    }
    let list = List::new(items)
        .highlight_style(Style::default().bg(Color::DarkGray).fg(Color::White))
        .highlight_symbol("> ");
    f.render_stateful_widget(list, list_area, &mut state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_format_created_at() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 21, 5, 0).unwrap();
        assert_eq!(format_created_at(&at), "May 01, 2024, 09:05 PM");
    }

    #[test]
    fn test_list_title_marks_reload_after_first_load() {
        let mut sync = Synchronizer::default();
        let first = sync.begin_load();
        // The placeholder covers the first load.
        assert_eq!(list_title(&sync), "Your Bookmarks (0)");

        assert!(sync.finish_load("u1", first, Ok(Vec::new())));
        sync.begin_load();
        assert_eq!(list_title(&sync), "Your Bookmarks (0) [reloading]");
    }
}
