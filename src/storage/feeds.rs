use anyhow::Result;

use super::schema::Database;
use super::types::FeedDbRow;
use crate::backend::BackendError;
use crate::model::{Feed, FeedId, NewFeed};

const FEED_COLUMNS: &str = "id, name, url, kind, config, category_id, last_fetched_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a validated feed and return the stored row.
    pub async fn create_feed(&self, feed: &NewFeed) -> Result<Feed> {
        if let Some(category) = feed.category_id {
            if !self.category_exists(category).await? {
                return Err(BackendError::NotFound(format!("Category {category} not found")).into());
            }
        }

        let config = serde_json::to_string(&feed.config)?;
        let row: FeedDbRow = sqlx::query_as(&format!(
            "INSERT INTO feeds (name, url, kind, config, category_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {FEED_COLUMNS}"
        ))
        .bind(&feed.name)
        .bind(feed.wire_url())
        .bind(feed.kind.as_str())
        .bind(config)
        .bind(feed.category_id.map(|c| c.get()))
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        row.into_feed()
    }

    /// All feeds in creation order.
    pub async fn get_feeds(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedDbRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY created_at, id"))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(FeedDbRow::into_feed).collect()
    }

    pub async fn get_feed(&self, id: FeedId) -> Result<Option<Feed>> {
        let row: Option<FeedDbRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;

        row.map(FeedDbRow::into_feed).transpose()
    }

    /// Delete a feed. Its items are kept.
    pub async fn delete_feed(&self, id: FeedId) -> Result<()> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("Feed {id} not found")).into());
        }
        Ok(())
    }

    pub(crate) async fn touch_feed_fetched(&self, id: FeedId) -> Result<()> {
        sqlx::query("UPDATE feeds SET last_fetched_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::BackendError;
    use crate::model::{CategoryId, FeedId, FeedRegistry, NewFeed, SourceConfig, SourceKind};
    use crate::storage::{into_backend_error, Database};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn rss(id: i64) -> NewFeed {
        FeedRegistry::validate(NewFeed::rss(
            format!("Test Feed {id}"),
            format!("https://feed{id}.example.com/rss"),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_list_feeds() {
        let db = test_db().await;

        let first = db.create_feed(&rss(1)).await.unwrap();
        let second = db.create_feed(&rss(2)).await.unwrap();

        let feeds = db.get_feeds().await.unwrap();
        assert_eq!(feeds, vec![first, second]);
        assert_eq!(feeds[0].kind, SourceKind::Rss);
        assert_eq!(feeds[0].config, SourceConfig::default());
    }

    #[tokio::test]
    async fn test_social_feed_round_trips_config() {
        let db = test_db().await;

        let request = FeedRegistry::validate(NewFeed::twitter_hashtag("Rust", "#rustlang")).unwrap();
        let feed = db.create_feed(&request).await.unwrap();

        assert_eq!(feed.kind, SourceKind::TwitterHashtag);
        assert_eq!(feed.config, SourceConfig::hashtag("rustlang"));
        assert_eq!(feed.source_url(), None);

        let loaded = db.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(loaded, feed);
    }

    #[tokio::test]
    async fn test_create_feed_in_missing_category() {
        let db = test_db().await;

        let request = rss(1).in_category(CategoryId(5));
        let err = db.create_feed(&request).await.unwrap_err();
        assert!(matches!(into_backend_error(err), BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_feed() {
        let db = test_db().await;

        let feed = db.create_feed(&rss(1)).await.unwrap();
        db.delete_feed(feed.id).await.unwrap();
        assert!(db.get_feeds().await.unwrap().is_empty());

        let err = db.delete_feed(FeedId(feed.id.get())).await.unwrap_err();
        assert!(matches!(into_backend_error(err), BackendError::NotFound(_)));
    }
}
