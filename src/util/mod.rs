//! Utility functions for common operations.
//!
//! - **URL validation**: web-address parsing for bookmarks, the browser
//!   opener and the backend base URL
//! - **Text processing**: Unicode-aware width calculation, truncation and
//!   control-character stripping for terminal rendering

mod text;
mod url_validator;

pub use text::{display_width, strip_control_chars, truncate_to_width};
pub use url_validator::{
    parse_web_url, validate_backend_url, validate_url_for_open, UrlValidationError,
};
