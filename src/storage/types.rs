use thiserror::Error;

use crate::watcher::FeedState;

// ============================================================================
// Error Types
// ============================================================================

/// Persistence errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another instance of the application has locked the database
    #[error("Another instance of feedwatch appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored row cannot be turned back into a feed state
    #[error("Stored feed for {domain} is corrupt: {reason}")]
    Corrupt { domain: String, reason: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Error from a non-SQLite store implementation
    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return StoreError::InstanceLocked;
        }
        StoreError::Database(err)
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

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for `watched_feeds` queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct WatchedFeedRow {
    pub domain: String,
    pub feed_url: String,
    pub last_seen_id: Option<String>,
    pub unread_count: i64,
}

impl WatchedFeedRow {
    pub(crate) fn into_state(self) -> Result<FeedState, StoreError> {
        let unread_count = usize::try_from(self.unread_count).map_err(|_| StoreError::Corrupt {
            domain: self.domain.clone(),
            reason: format!("negative unread count {}", self.unread_count),
        })?;
        Ok(FeedState {
            domain: self.domain,
            feed_url: self.feed_url,
            last_seen_id: self.last_seen_id,
            unread_count,
        })
    }
}
