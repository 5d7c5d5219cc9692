use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::UrlValidationError;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of feedkeep appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all mean
/// another process holds the database.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

/// Failures of the key/value persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read '{key}': {reason}")]
    Read { key: String, reason: String },

    #[error("Failed to write '{key}': {reason}")]
    Write { key: String, reason: String },

    /// Stored value does not deserialize into the expected container
    #[error("Stored value for '{key}' is corrupt: {reason}")]
    Corruption { key: String, reason: String },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Rejected Store mutations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Feed already subscribed: {0}")]
    DuplicateFeed(String),

    #[error("Failed to save feeds: {0}")]
    Storage(#[from] StorageError),
}

/// Result of [`Store::add_articles`](super::Store::add_articles).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArticleMerge {
    /// Articles that were new to the collection
    pub added: usize,
    /// Whether the merged collection reached storage
    pub persisted: bool,
}

#[derive(Debug, Error)]
pub enum ReadLaterError {
    #[error("Article already in read later: {0}")]
    AlreadyExists(String),

    #[error("Failed to save read later list: {0}")]
    Storage(#[from] StorageError),
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed. `url` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: String,
    pub url: String,
    pub title: String,
    pub added_at: DateTime<Utc>,
}

/// A normalized article.
///
/// `is_read`/`read_at` and the `offline_*` fields are only changed through
/// [`Store`](super::Store) operations, which keep `is_read == read_at.is_some()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Article {
    pub id: String,
    pub feed_url: String,
    pub feed_title: String,
    pub title: String,
    /// Plain-text summary
    pub description: String,
    /// Plain-text body
    pub content: String,
    /// Sanitized markup of the body
    pub html_content: String,
    pub url: String,
    pub published_date: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub image_url: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub offline_cached: bool,
    pub offline_content: String,
    pub offline_html_content: String,
    /// Why `offline_content` fell back to the summary, when the page fetch failed
    pub offline_error: Option<String>,
    pub cached_at: Option<DateTime<Utc>>,
}

/// Everything the Store persists, used for whole-collection backup/restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub feeds: Vec<Feed>,
    pub articles: Vec<Article>,
    pub read_later: Vec<Article>,
}
