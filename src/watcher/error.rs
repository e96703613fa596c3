use thiserror::Error;

use crate::feed::{FetchError, ParseError};
use crate::storage::StoreError;

/// Why a check produced no new information.
///
/// Never returned to callers of the watcher; a failed check reports `None`
/// to its callback and leaves the feed state alone. Kept as a type so the
/// failure can be logged with its cause.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("feed could not be parsed: {0}")]
    Parse(#[from] ParseError),

    /// The fetch or parse panicked, e.g. inside an injected `HttpFetch`
    #[error("check panicked: {0}")]
    Panicked(String),
}

/// Errors surfaced by registration changes.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The persistence port refused the change; memory was left unchanged
    #[error("Failed to persist feed registration: {0}")]
    Store(#[from] StoreError),
}
