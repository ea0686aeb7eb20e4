//! Terminal User Interface module.
//!
//! This module provides the TUI for the bookmark manager, including:
//! - Main event loop (`run`)
//! - Input handling for the landing screen, the form and the list
//! - Rendering for the navigation bar, landing and dashboard screens
//! - Background task event processing
//!
//! # Module Structure
//!
//! - `loop_runner` - Main event loop and terminal management
//! - `input` - Keyboard input handling
//! - `events` - Background task and channel event processing
//! - `render` - Screen rendering dispatch
//! - `helpers` - Background task spawners
//! - `navbar` - Session display and sign-in/out hints
//! - `form` - Add-bookmark form widget
//! - `list` - Bookmark list widget
//! - `status` - Status bar and sync notice

mod events;
mod form;
mod helpers;
mod input;
mod list;
mod loop_runner;
mod navbar;
mod render;
mod status;

// Re-export the public API
pub use helpers::spawn_session_check;
pub use loop_runner::{run, Action};
pub use navbar::NavState;
