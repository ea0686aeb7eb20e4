//! The TUI event loop.
//!
//! One task owns the [`App`] and waits on four sources at once: shutdown
//! signals, the terminal, the [`AppEvent`] queue fed by background tasks and
//! the realtime channel, and a fixed tick.

use crate::app::{App, AppEvent};
use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::time::Duration;
use tokio::sync::mpsc;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

use super::events::handle_app_event;
use super::helpers::spawn_load;
use super::input::handle_input;
use super::render::render;

/// Period of the housekeeping tick (notice expiry, refresh signal).
const TICK: Duration = Duration::from_millis(250);

/// What the loop does after a key press.
pub enum Action {
    Continue,
    Quit,
}

/// Raw mode plus alternate screen, undone on drop.
struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }

    fn draw(&mut self, app: &App) -> Result<()> {
        self.terminal.draw(|f| render(f, app))?;
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// SIGTERM and SIGINT; never fires off Unix.
struct ShutdownSignals {
    #[cfg(unix)]
    term: Signal,
    #[cfg(unix)]
    int: Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            term: signal(SignalKind::terminate())?,
            #[cfg(unix)]
            int: signal(SignalKind::interrupt())?,
        })
    }

    /// Resolves with the signal's name.
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.term.recv() => "SIGTERM",
            _ = self.int.recv() => "SIGINT",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        std::future::pending().await
    }
}

/// Run the TUI until the user quits or a shutdown signal arrives.
///
/// A panic hook restores the terminal before the default hook prints, so a
/// panic never leaves the shell in raw mode.
pub async fn run(
    app: &mut App,
    event_tx: mpsc::Sender<AppEvent>,
    mut event_rx: mpsc::Receiver<AppEvent>,
) -> Result<()> {
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        previous_hook(info);
    }));

    let mut screen = TerminalSession::enter()?;
    let mut keys = EventStream::new();
    let mut signals = ShutdownSignals::install()?;
    let mut tick = tokio::time::interval(TICK);

    loop {
        if app.needs_redraw {
            screen.draw(app)?;
            app.needs_redraw = false;
        }
        if app.clear_expired_status() {
            app.needs_redraw = true;
        }

        // Queued task results and channel messages go first so a burst of
        // keystrokes cannot hold them back.
        while let Ok(event) = event_rx.try_recv() {
            app.needs_redraw = true;
            handle_app_event(app, event, &event_tx).await;
        }

        tokio::select! {
            biased;

            name = signals.recv() => {
                tracing::info!(signal = name, "Shutting down");
                break;
            }

            terminal_event = keys.next() => match terminal_event {
                Some(Ok(Event::Key(key))) => {
                    if let Action::Quit = on_key(app, key, &event_tx).await {
                        break;
                    }
                }
                Some(Ok(Event::Resize(..))) => app.needs_redraw = true,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Terminal input failed");
                    break;
                }
                None => break,
            },

            Some(event) = event_rx.recv() => {
                app.needs_redraw = true;
                handle_app_event(app, event, &event_tx).await;
            }

            _ = tick.tick() => on_tick(app, &event_tx),
        }
    }

    drop(screen);
    Ok(())
}

async fn on_key(app: &mut App, key: KeyEvent, event_tx: &mpsc::Sender<AppEvent>) -> Action {
    // Some terminals report releases too.
    if key.kind == KeyEventKind::Release {
        return Action::Continue;
    }
    app.needs_redraw = true;
    match handle_input(app, key.code, key.modifiers, event_tx).await {
        Ok(action) => action,
        Err(e) => {
            app.set_status(format!("Error: {}", e));
            Action::Continue
        }
    }
}

/// Expire the form's success notice and reload once per refresh signal.
fn on_tick(app: &mut App, event_tx: &mpsc::Sender<AppEvent>) {
    if app.form.expire_notice() {
        app.needs_redraw = true;
    }
    if app.take_refresh() {
        spawn_load(app, event_tx);
        app.needs_redraw = true;
    }
}
