use thiserror::Error;

use crate::backend::{BackendError, Bookmark, ChangeEvent};
use crate::writer::WriteError;

/// Loading the bookmark list failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to load bookmarks: {0}")]
    Backend(#[from] BackendError),
}

impl FetchError {
    /// True when the fetch failed because the access token was refused.
    pub fn is_session_expired(&self) -> bool {
        match self {
            FetchError::Backend(e) => e.is_token_rejected(),
        }
    }
}

/// How a change event affected the local list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    Removed,
    /// Duplicate, absent, or not ours.
    Ignored,
}

/// Result of a backend delete issued after the optimistic local removal.
#[derive(Debug)]
pub enum RemoveOutcome {
    Deleted,
    /// The delete failed; `resync` is the reload issued to restore the list.
    Failed {
        error: WriteError,
        resync: Result<Vec<Bookmark>, FetchError>,
    },
}

/// The local, ordered view of the signed-in user's bookmarks.
///
/// Order is `created_at` descending with ties kept in arrival order. Every
/// mutation checks existence by id, which is what makes optimistic edits and
/// the echoed change events converge without duplicates.
#[derive(Debug, Default)]
pub struct Synchronizer {
    bookmarks: Vec<Bookmark>,
    loading: bool,
    loaded_once: bool,
    error: Option<String>,
    deleting: Option<String>,
    /// Generation of the most recent load; older results are stale.
    load_generation: u64,
    /// Change events seen while a load was in flight, replayed over its
    /// snapshot so they are not lost.
    replay: Vec<ChangeEvent>,
}

impl Synchronizer {
    pub fn bookmarks(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// True until the first load finishes, successfully or not.
    pub fn awaiting_first_load(&self) -> bool {
        !self.loaded_once
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Id of the bookmark whose delete is in flight.
    pub fn deleting(&self) -> Option<&str> {
        self.deleting.as_deref()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bookmarks.iter().any(|b| b.id == id)
    }

    /// Mark a load as started and return its generation.
    ///
    /// Starting a load supersedes any load still in flight.
    pub fn begin_load(&mut self) -> u64 {
        self.loading = true;
        self.error = None;
        self.load_generation += 1;
        self.load_generation
    }

    /// Settle the load started as `generation`.
    ///
    /// Returns false, leaving the list untouched, when a newer load has been
    /// started since. On failure the previous rows stay and the error is kept
    /// beside them.
    pub fn finish_load(
        &mut self,
        user_id: &str,
        generation: u64,
        result: Result<Vec<Bookmark>, FetchError>,
    ) -> bool {
        if generation != self.load_generation {
            tracing::debug!(
                generation,
                current = self.load_generation,
                "Dropping superseded load result"
            );
            return false;
        }
        self.replace(user_id, result);
        true
    }

    /// Apply one change event for the subscribed user.
    pub fn apply(&mut self, user_id: &str, event: ChangeEvent) -> Applied {
        if let Some(owner) = event.owner_id() {
            if owner != user_id {
                tracing::warn!(
                    kind = event.kind(),
                    bookmark_id = %event.bookmark_id(),
                    "Ignoring change event for another user"
                );
                return Applied::Ignored;
            }
        }

        if self.loading {
            self.replay.push(event.clone());
        }
        self.apply_owned(event)
    }

    fn apply_owned(&mut self, event: ChangeEvent) -> Applied {
        match event {
            ChangeEvent::Insert { new } => {
                if self.contains(&new.id) {
                    return Applied::Ignored;
                }
                self.bookmarks.insert(0, new);
                Applied::Inserted
            }
            ChangeEvent::Update { new, .. } => {
                match self.bookmarks.iter_mut().find(|b| b.id == new.id) {
                    Some(slot) => {
                        *slot = new;
                        Applied::Updated
                    }
                    None => Applied::Ignored,
                }
            }
            ChangeEvent::Delete { old } => self.remove_local(&old.id),
        }
    }

    /// Optimistic half of a delete: drop the row locally and mark it busy.
    ///
    /// Returns the removed row, or `None` when it was not present. The
    /// backend delete is issued either way.
    pub fn begin_remove(&mut self, id: &str) -> Option<Bookmark> {
        self.deleting = Some(id.to_string());
        let position = self.bookmarks.iter().position(|b| b.id == id)?;
        Some(self.bookmarks.remove(position))
    }

    /// Settle a delete started with [`Synchronizer::begin_remove`].
    ///
    /// On failure the resync result replaces the list (bringing the row
    /// back) and then the delete error is reported.
    pub fn finish_remove(&mut self, user_id: &str, id: &str, outcome: RemoveOutcome) {
        if self.deleting.as_deref() == Some(id) {
            self.deleting = None;
        }

        if let RemoveOutcome::Failed { error, resync } = outcome {
            // The resync is newer than any load still in flight.
            self.load_generation += 1;
            self.replace(user_id, resync);
            tracing::warn!(bookmark_id = %id, error = %error, "Delete failed, list reloaded");
            self.error = Some(error.to_string());
        }
    }

    /// Forget everything but the load generation, so results of loads
    /// started before the reset stay stale.
    pub fn clear(&mut self) {
        let load_generation = self.load_generation;
        *self = Self::default();
        self.load_generation = load_generation;
    }

    fn replace(&mut self, user_id: &str, result: Result<Vec<Bookmark>, FetchError>) {
        self.loading = false;
        self.loaded_once = true;
        let replay = std::mem::take(&mut self.replay);

        match result {
            Ok(rows) => {
                let fetched = rows.len();
                let mut rows: Vec<Bookmark> =
                    rows.into_iter().filter(|b| b.user_id == user_id).collect();
                if rows.len() != fetched {
                    tracing::warn!(
                        dropped = fetched - rows.len(),
                        "Fetch returned rows owned by another user"
                    );
                }
                rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                self.bookmarks = rows;
                self.error = None;

                if !replay.is_empty() {
                    tracing::debug!(events = replay.len(), "Replaying changes received during load");
                }
                for event in replay {
                    self.apply_owned(event);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Keeping stale bookmarks after failed load");
                self.error = Some(e.to_string());
            }
        }
    }

    fn remove_local(&mut self, id: &str) -> Applied {
        match self.bookmarks.iter().position(|b| b.id == id) {
            Some(position) => {
                self.bookmarks.remove(position);
                Applied::Removed
            }
            None => Applied::Ignored,
        }
    }
}
