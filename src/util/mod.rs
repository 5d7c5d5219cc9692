//! Utility functions shared across the pipeline.
//!
//! - **URL validation**: scheme checks for feed and page URLs, plus an SSRF
//!   guard for URLs that arrive from untrusted files (OPML imports).
//! - **Identifiers**: collision-resistant ids derived from content hashes.

mod ids;
mod url_validator;

pub use ids::{hash_id, new_feed_id};
pub use url_validator::{validate_public_url, validate_url, UrlValidationError};
