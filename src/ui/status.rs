use crate::app::App;
use crate::sync::ChannelState;
use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use std::borrow::Cow;

const SYNC_NOTICE: &str = "Bookmarks are synced in real-time across all your devices";

/// Short label and colour for the realtime channel state.
pub fn channel_label(state: &ChannelState) -> (Cow<'_, str>, Color) {
    match state {
        ChannelState::Unsubscribed => (Cow::Borrowed("offline"), Color::DarkGray),
        ChannelState::Subscribing => (Cow::Borrowed("connecting..."), Color::Yellow),
        ChannelState::Subscribed => (Cow::Borrowed("live"), Color::Green),
        ChannelState::Error(reason) => (Cow::Owned(format!("{} [r] reconnect", reason)), Color::Red),
    }
}

/// Render the sync notice line shown under the dashboard
pub fn render_notice(f: &mut Frame, app: &App, area: Rect) {
    if area.width < 1 || area.height < 1 {
        return;
    }

    let (label, color) = channel_label(app.subscriptions.state());
    let line = Line::from(vec![
        Span::styled(SYNC_NOTICE, Style::default().fg(Color::Gray)),
        Span::raw("  "),
        Span::styled(format!("● {}", label), Style::default().fg(color)),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

/// Render the status bar
pub fn render(f: &mut Frame, app: &App, area: Rect) {
    // Status bar needs at least 1 char width to be meaningful
    if area.width < 1 || area.height < 1 {
        return;
    }

    let text: Cow<'_, str> = if let Some((msg, _)) = &app.status_message {
        Cow::Borrowed(msg.as_ref())
    } else if let Some(url) = app.sign_in_url.as_ref().filter(|_| !app.is_signed_in()) {
        Cow::Owned(format!("Waiting for sign-in... {}", url))
    } else if app.is_signed_in() {
        Cow::Borrowed("[Tab]focus [j/k]move [o]pen [d]elete [r]efresh [L]sign out [q]uit")
    } else {
        Cow::Borrowed("[g]sign in [q]uit")
    };

    let style = Style::default().bg(Color::DarkGray).fg(Color::White);

    let paragraph = Paragraph::new(text).style(style);
    f.render_widget(paragraph, area);
}
