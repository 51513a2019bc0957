//! Utility functions shared by the fetch pipeline and the storage layer.
//!
//! - **URL handling**: feed URL validation, `feed:` scheme rewriting and
//!   canonical item links (the basis of message identity)
//! - **Text processing**: control-character stripping and label cleanup for
//!   untrusted feed text

mod feed_url;
mod text;

pub use feed_url::{canonical_link, normalize_feed_url, validate_url, UrlValidationError};
pub use text::{clean_label, strip_control_chars};
