//! smartmarks: a terminal bookmark manager with live sync across sessions.
//!
//! Sign-in, storage, row ownership and change notification are delegated to
//! a hosted backend (GoTrue auth, PostgREST tables, Phoenix realtime). The
//! client keeps a local ordered list of the user's bookmarks and merges the
//! realtime change feed with its own optimistic edits.

pub mod app;
pub mod backend;
pub mod callback;
pub mod config;
pub mod session;
pub mod storage;
pub mod sync;
pub mod ui;
pub mod util;
pub mod writer;
