use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::realtime::{self, ChannelEvent, ChannelTimings};
use crate::backend::{Backend, Session, SubscriptionStatus};

/// How long a closed channel gets to send its leave frame before it is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Identifies one opened channel. The generation tells a re-opened channel
/// for the same user apart from the one it replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelId {
    pub user_id: String,
    pub generation: u64,
}

/// An event from a specific channel, as delivered to the app's event loop.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: ChannelId,
    pub event: ChannelEvent,
}

/// Channel lifecycle as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
    Error(String),
}

/// Something that can open a change feed for one user.
pub trait ChangeFeed {
    /// Start delivering `id.user_id`'s changes to `sink` until the handle is
    /// closed or dropped.
    fn open<E>(&self, id: ChannelId, session: Arc<Session>, sink: mpsc::Sender<E>) -> ChannelHandle
    where
        E: From<ChannelMessage> + Send + 'static;
}

/// Owner of a running channel task.
///
/// [`ChannelHandle::close`] asks the channel to leave cleanly; dropping the
/// handle without closing aborts the task outright.
#[derive(Debug)]
pub struct ChannelHandle {
    id: ChannelId,
    task: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ChannelHandle {
    pub fn new(id: ChannelId, task: JoinHandle<()>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            id,
            task: Some(task),
            shutdown: Some(shutdown),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Signal shutdown and give the task a short grace period to finish.
    pub fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            tokio::spawn(async move {
                if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                    abort.abort();
                }
            });
        }
        tracing::debug!(user_id = %self.id.user_id, generation = self.id.generation, "Channel closed");
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl ChangeFeed for Backend {
    fn open<E>(&self, id: ChannelId, session: Arc<Session>, sink: mpsc::Sender<E>) -> ChannelHandle
    where
        E: From<ChannelMessage> + Send + 'static,
    {
        let backend = self.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let channel = id.clone();

        let task = tokio::spawn(async move {
            let wrap = |event: ChannelEvent| {
                E::from(ChannelMessage {
                    channel: channel.clone(),
                    event,
                })
            };

            let result = realtime::run_channel(
                &backend,
                &session,
                ChannelTimings::default(),
                &sink,
                &wrap,
                shutdown_rx,
            )
            .await;

            if let Err(e) = result {
                tracing::warn!(
                    user_id = %channel.user_id,
                    generation = channel.generation,
                    error = %e,
                    "Realtime channel ended"
                );
                let _ = sink.send(wrap(ChannelEvent::Status(e.status()))).await;
            }
        });

        ChannelHandle::new(id, task, shutdown_tx)
    }
}

/// Keeps at most one open channel, for the active user.
#[derive(Debug, Default)]
pub struct Subscriptions {
    handle: Option<ChannelHandle>,
    state: ChannelState,
    next_generation: u64,
}

impl Subscriptions {
    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// User whose channel is currently open.
    pub fn active_user(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.id().user_id.as_str())
    }

    /// Ensure a channel is open for the session user.
    ///
    /// A no-op when one is already open for that user; otherwise any other
    /// user's channel is closed before the new one opens. Returns true when a
    /// channel was opened.
    pub fn subscribe<F, E>(
        &mut self,
        feed: &F,
        session: &Arc<Session>,
        sink: &mpsc::Sender<E>,
    ) -> bool
    where
        F: ChangeFeed,
        E: From<ChannelMessage> + Send + 'static,
    {
        if self.active_user() == Some(session.user_id()) {
            return false;
        }
        self.open(feed, session, sink);
        true
    }

    /// Close whatever is open and open a fresh channel for the session user.
    pub fn resubscribe<F, E>(&mut self, feed: &F, session: &Arc<Session>, sink: &mpsc::Sender<E>)
    where
        F: ChangeFeed,
        E: From<ChannelMessage> + Send + 'static,
    {
        self.open(feed, session, sink);
    }

    pub fn unsubscribe(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        self.state = ChannelState::Unsubscribed;
    }

    /// True if `id` is the channel currently open. Messages from replaced
    /// channels are stale and must be dropped.
    pub fn accepts(&self, id: &ChannelId) -> bool {
        self.handle.as_ref().is_some_and(|h| h.id() == id)
    }

    /// Apply a status report. Returns false for stale channels.
    ///
    /// A channel that failed or was closed by the server is released; it is
    /// not reopened until asked to.
    pub fn on_status(&mut self, id: &ChannelId, status: SubscriptionStatus) -> bool {
        if !self.accepts(id) {
            return false;
        }

        self.state = match status {
            SubscriptionStatus::Subscribing => ChannelState::Subscribing,
            SubscriptionStatus::Subscribed => ChannelState::Subscribed,
            SubscriptionStatus::ChannelError(reason) => ChannelState::Error(reason),
            SubscriptionStatus::TimedOut => ChannelState::Error("Realtime channel timed out".into()),
            SubscriptionStatus::Closed => ChannelState::Error("Realtime channel closed by server".into()),
        };

        if matches!(self.state, ChannelState::Error(_)) {
            self.handle = None;
        }
        true
    }

    fn open<F, E>(&mut self, feed: &F, session: &Arc<Session>, sink: &mpsc::Sender<E>)
    where
        F: ChangeFeed,
        E: From<ChannelMessage> + Send + 'static,
    {
        self.unsubscribe();

        self.next_generation += 1;
        let id = ChannelId {
            user_id: session.user_id().to_string(),
            generation: self.next_generation,
        };
        tracing::info!(user_id = %id.user_id, generation = id.generation, "Opening realtime channel");

        self.handle = Some(feed.open(id, Arc::clone(session), sink.clone()));
        self.state = ChannelState::Subscribing;
    }
}
