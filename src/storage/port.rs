use async_trait::async_trait;

use super::types::StoreError;
use crate::watcher::FeedState;

/// Persistence port for committed registrations.
///
/// Only committed registrations are ever written; candidates live in memory.
/// `save` inserts or replaces the row for `state.domain`.
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn load(&self) -> Result<Vec<FeedState>, StoreError>;

    async fn save(&self, state: &FeedState) -> Result<(), StoreError>;

    /// Removes the domain's row. Deleting a missing row is not an error.
    async fn delete(&self, domain: &str) -> Result<(), StoreError>;
}
