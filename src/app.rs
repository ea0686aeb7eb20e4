use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use crate::backend::{Backend, Bookmark, Session};
use crate::callback::AuthOutcome;
use crate::session::SessionAccessor;
use crate::sync::{ChannelMessage, FetchError, RemoveOutcome, Subscriptions, Synchronizer};
use crate::writer::{BookmarkForm, RefreshSignal, WriteError};

/// How long a status bar message stays up.
const STATUS_TTL_SECS: u64 = 3;

// ============================================================================
// UI State Types
// ============================================================================

/// Who is signed in, as far as the UI knows.
#[derive(Debug, Clone)]
pub enum AuthState {
    /// The stored session is still being checked.
    Loading,
    Authenticated(Arc<Session>),
    Anonymous,
}

/// Which dashboard control receives key presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Title,
    Url,
    List,
}

impl Focus {
    pub fn next(self) -> Self {
        match self {
            Focus::Title => Focus::Url,
            Focus::Url => Focus::List,
            Focus::List => Focus::Title,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Focus::Title => Focus::List,
            Focus::Url => Focus::Title,
            Focus::List => Focus::Url,
        }
    }
}

/// Events from background tasks
pub enum AppEvent {
    /// Startup check of the stored session finished.
    SessionChecked(Option<Arc<Session>>),
    /// The OAuth callback route finished.
    Auth(AuthOutcome),
    /// The browser was (or could not be) sent to the provider.
    SignInStarted(Result<Url, String>),
    /// Backend sign-out finished. The local session is already gone.
    SignedOut(Result<(), String>),
    /// An expired session was refreshed before a backend call.
    SessionRefreshed(Arc<Session>),
    /// The backend refused the session; it has been cleared locally.
    SessionExpired { user_id: String },
    BookmarksLoaded {
        user_id: String,
        generation: u64,
        result: Result<Vec<Bookmark>, FetchError>,
    },
    BookmarkSubmitted {
        user_id: String,
        result: Result<Bookmark, WriteError>,
    },
    BookmarkRemoved {
        user_id: String,
        id: String,
        outcome: RemoveOutcome,
    },
    Channel(ChannelMessage),
    /// A background task panicked.
    TaskPanicked {
        task: &'static str,
        error: String,
    },
}

impl From<ChannelMessage> for AppEvent {
    fn from(message: ChannelMessage) -> Self {
        AppEvent::Channel(message)
    }
}

// ============================================================================
// Application State
// ============================================================================

pub struct App {
    pub accessor: SessionAccessor,
    pub backend: Backend,
    pub auth: AuthState,
    pub form: BookmarkForm,
    pub sync: Synchronizer,
    pub subscriptions: Subscriptions,
    /// Bumped by the writer after each successful insert.
    pub refresh: RefreshSignal,
    /// Last refresh value a reload was issued for.
    pub refresh_seen: RefreshSignal,
    pub focus: Focus,
    pub selected: usize,
    /// Provider URL of the sign-in in progress, shown when no browser opened.
    pub sign_in_url: Option<Url>,
    pub status_message: Option<(Cow<'static, str>, Instant)>,
    pub needs_redraw: bool,
}

impl App {
    pub fn new(accessor: SessionAccessor, backend: Backend) -> Self {
        Self {
            accessor,
            backend,
            auth: AuthState::Loading,
            form: BookmarkForm::default(),
            sync: Synchronizer::default(),
            subscriptions: Subscriptions::default(),
            refresh: RefreshSignal::default(),
            refresh_seen: RefreshSignal::default(),
            focus: Focus::Title,
            selected: 0,
            sign_in_url: None,
            status_message: None,
            needs_redraw: true,
        }
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        match &self.auth {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session().map(|s| s.user_id())
    }

    pub fn is_signed_in(&self) -> bool {
        self.session().is_some()
    }

    /// Adopt a session. Local state belonging to a different user is dropped.
    pub fn adopt_session(&mut self, session: Arc<Session>) {
        if self.user_id() != Some(session.user_id()) {
            self.sync.clear();
            self.form.reset();
            self.selected = 0;
            self.focus = Focus::Title;
        }
        self.sign_in_url = None;
        self.auth = AuthState::Authenticated(session);
    }

    /// Drop everything tied to the signed-in user and close their channel.
    pub fn become_anonymous(&mut self) {
        self.subscriptions.unsubscribe();
        self.sync.clear();
        self.form.reset();
        self.selected = 0;
        self.focus = Focus::Title;
        self.auth = AuthState::Anonymous;
    }

    /// True when the writer bumped the refresh signal since the last reload.
    pub fn take_refresh(&mut self) -> bool {
        if self.refresh == self.refresh_seen {
            return false;
        }
        self.refresh_seen = self.refresh;
        true
    }

    // ------------------------------------------------------------------------
    // List navigation
    // ------------------------------------------------------------------------

    pub fn selected_bookmark(&self) -> Option<&Bookmark> {
        self.sync.bookmarks().get(self.selected)
    }

    pub fn nav_down(&mut self) {
        if self.selected + 1 < self.sync.len() {
            self.selected += 1;
        }
    }

    pub fn nav_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    /// Keep the selection inside the list after it changed underneath us.
    pub fn clamp_selection(&mut self) {
        self.selected = self.selected.min(self.sync.len().saturating_sub(1));
    }

    // ------------------------------------------------------------------------
    // Status bar
    // ------------------------------------------------------------------------

    /// Set status message (will auto-expire after 3 seconds)
    pub fn set_status(&mut self, msg: impl Into<Cow<'static, str>>) {
        self.status_message = Some((msg.into(), Instant::now()));
    }

    /// Clear status message if expired (older than 3 seconds)
    /// Returns true if a message was actually cleared
    pub fn clear_expired_status(&mut self) -> bool {
        if let Some((_, time)) = &self.status_message {
            if time.elapsed().as_secs() >= STATUS_TTL_SECS {
                self.status_message = None;
                return true;
            }
        }
        false
    }
}

// ============================================================================
// Resource Cleanup
// ============================================================================

/// Leave the realtime channel cleanly when the app goes away.
impl Drop for App {
    fn drop(&mut self) {
        if self.subscriptions.active_user().is_some() {
            self.subscriptions.unsubscribe();
            tracing::debug!("Closed realtime channel on App drop");
        }
    }
}
