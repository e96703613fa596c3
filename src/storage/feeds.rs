use async_trait::async_trait;

use super::port::FeedStore;
use super::schema::Database;
use super::types::{StoreError, WatchedFeedRow};
use crate::watcher::FeedState;

impl Database {
    // ========================================================================
    // Watched Feed Operations
    // ========================================================================

    /// Number of committed registrations on disk
    pub async fn watched_feed_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watched_feeds")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(count)
    }

    /// Unix timestamp of the first commit of `domain`, if stored
    pub async fn committed_at(&self, domain: &str) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT committed_at FROM watched_feeds WHERE domain = ?")
                .bind(domain)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        Ok(row.map(|(ts,)| ts))
    }
}

#[async_trait]
impl FeedStore for Database {
    async fn load(&self) -> Result<Vec<FeedState>, StoreError> {
        let rows: Vec<WatchedFeedRow> = sqlx::query_as(
            r#"
                SELECT domain, feed_url, last_seen_id, unread_count
                FROM watched_feeds
                ORDER BY domain
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter().map(WatchedFeedRow::into_state).collect()
    }

    /// Upserts the row; `committed_at` keeps the value of the first save.
    async fn save(&self, state: &FeedState) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let unread = i64::try_from(state.unread_count).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
                INSERT INTO watched_feeds
                    (domain, feed_url, last_seen_id, unread_count, committed_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(domain) DO UPDATE SET
                    feed_url = excluded.feed_url,
                    last_seen_id = excluded.last_seen_id,
                    unread_count = excluded.unread_count,
                    updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.domain)
        .bind(&state.feed_url)
        .bind(state.last_seen_id.as_deref())
        .bind(unread)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        tracing::debug!(domain = %state.domain, unread = state.unread_count, "Saved feed state");
        Ok(())
    }

    async fn delete(&self, domain: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM watched_feeds WHERE domain = ?")
            .bind(domain)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        tracing::debug!(domain = %domain, rows = result.rows_affected(), "Deleted feed state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn state(domain: &str, last_seen: Option<&str>, unread: usize) -> FeedState {
        FeedState {
            domain: domain.to_string(),
            feed_url: format!("https://{}/feed.xml", domain),
            last_seen_id: last_seen.map(str::to_owned),
            unread_count: unread,
        }
    }

    #[tokio::test]
    async fn test_empty_database_loads_nothing() {
        let db = test_db().await;
        assert!(db.load().await.unwrap().is_empty());
        assert_eq!(db.watched_feed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let db = test_db().await;
        db.save(&state("b.example", Some("item-7"), 3)).await.unwrap();
        db.save(&state("a.example", None, 0)).await.unwrap();

        let loaded = db.load().await.unwrap();
        assert_eq!(
            loaded,
            vec![state("a.example", None, 0), state("b.example", Some("item-7"), 3)]
        );
    }

    #[tokio::test]
    async fn test_save_replaces_existing_row() {
        let db = test_db().await;
        db.save(&state("a.example", None, 0)).await.unwrap();
        let first_commit = db.committed_at("a.example").await.unwrap();
        assert!(first_commit.is_some());

        db.save(&state("a.example", Some("x"), 5)).await.unwrap();

        assert_eq!(db.load().await.unwrap(), vec![state("a.example", Some("x"), 5)]);
        assert_eq!(db.committed_at("a.example").await.unwrap(), first_commit);
        assert_eq!(db.watched_feed_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let db = test_db().await;
        db.save(&state("a.example", None, 0)).await.unwrap();
        db.delete("a.example").await.unwrap();
        assert!(db.load().await.unwrap().is_empty());
        assert_eq!(db.committed_at("a.example").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_ok() {
        let db = test_db().await;
        db.delete("never-saved.example").await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_row_reported() {
        let db = test_db().await;
        sqlx::query(
            "INSERT INTO watched_feeds (domain, feed_url, unread_count, committed_at, updated_at)
             VALUES ('bad.example', 'https://bad.example/feed', -4, 0, 0)",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert!(matches!(
            db.load().await,
            Err(StoreError::Corrupt { domain, .. }) if domain == "bad.example"
        ));
    }
}
