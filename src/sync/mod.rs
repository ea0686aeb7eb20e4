//! Bookmark synchronizer.
//!
//! Keeps the signed-in user's bookmarks in a local ordered list and merges
//! three sources of change into it:
//!
//! - snapshots fetched from the table (`load`)
//! - the realtime change feed (one channel per user)
//! - optimistic local deletes, reconciled when the backend answers
//!
//! The list logic in [`Synchronizer`] is synchronous and owned by the UI;
//! backend calls happen in spawned tasks that report their results back.

mod channel;
mod remote;
mod synchronizer;

pub use channel::{ChangeFeed, ChannelHandle, ChannelId, ChannelMessage, ChannelState, Subscriptions};
pub use remote::{fetch_snapshot, remove_remote};
pub use synchronizer::{Applied, FetchError, RemoveOutcome, Synchronizer};
