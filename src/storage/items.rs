use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{ItemDbRow, NewItem};
use crate::backend::{BackendError, ItemQuery};
use crate::model::{FeedId, Item, ItemId};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of items returned from any single list query
const MAX_ITEMS: i64 = 2000;

const ITEM_COLUMNS: &str = "i.id, i.feed_id, i.title, i.body, i.url, i.published_at, i.fetched_at, i.read_at";

impl Database {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Upsert items for a feed, returning how many were new.
    ///
    /// Items are keyed by URL within the feed. Existing items get their
    /// title, body and publication date refreshed; read state and
    /// `fetched_at` are kept.
    pub async fn upsert_items(&self, feed_id: FeedId, items: &[NewItem]) -> Result<usize> {
        if self.get_feed(feed_id).await?.is_none() {
            return Err(BackendError::NotFound(format!("Feed {feed_id} not found")).into());
        }
        if items.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        // 6 binds per row keeps each statement well under SQLite's limit.
        const BATCH_SIZE: usize = 50;
        for chunk in items.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO items (feed_id, title, body, url, published_at, fetched_at) ",
            );
            builder.push_values(chunk, |mut b, item| {
                b.push_bind(feed_id.get())
                    .push_bind(&item.title)
                    .push_bind(&item.body)
                    .push_bind(&item.url)
                    .push_bind(item.published_at.map(|p| p.timestamp()))
                    .push_bind(now);
            });
            builder.build().execute(&mut *tx).await?;

            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await?;
            inserted += changes.0 as usize;

            for item in chunk {
                sqlx::query(
                    "UPDATE items SET title = ?, body = ?, published_at = ? \
                     WHERE feed_id = ? AND url = ?",
                )
                .bind(&item.title)
                .bind(&item.body)
                .bind(item.published_at.map(|p| p.timestamp()))
                .bind(feed_id.get())
                .bind(&item.url)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        self.touch_feed_fetched(feed_id).await?;
        Ok(inserted)
    }

    // ========================================================================
    // Item Queries
    // ========================================================================

    /// Items matching a structural query, newest first.
    ///
    /// A category matches items of feeds bound to it and items assigned to
    /// it. Undated items sort last and are excluded by `since`.
    pub async fn get_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM items i WHERE 1 = 1"));

        if let Some(category) = query.category_id {
            builder.push(" AND (i.feed_id IN (SELECT id FROM feeds WHERE category_id = ");
            builder.push_bind(category.get());
            builder.push(") OR i.id IN (SELECT item_id FROM category_assignments WHERE category_id = ");
            builder.push_bind(category.get());
            builder.push("))");
        }
        if let Some(feed) = query.feed_id {
            builder.push(" AND i.feed_id = ");
            builder.push_bind(feed.get());
        }
        if query.unread_only {
            builder.push(" AND i.read_at IS NULL");
        }
        if let Some(since) = query.since {
            let bound = since.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
            builder.push(" AND i.published_at >= ");
            builder.push_bind(bound);
        }
        builder.push(" ORDER BY i.published_at IS NULL, i.published_at DESC, i.id DESC LIMIT ");
        builder.push_bind(MAX_ITEMS);

        let rows: Vec<ItemDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }

    pub async fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        let row: Option<ItemDbRow> =
            sqlx::query_as(&format!("SELECT {ITEM_COLUMNS} FROM items i WHERE i.id = ?"))
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(ItemDbRow::into_item))
    }

    /// Mark an item read. An item that is already read keeps its first
    /// `read_at`.
    pub async fn mark_item_read(&self, id: ItemId) -> Result<Item> {
        sqlx::query("UPDATE items SET read_at = COALESCE(read_at, ?) WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        self.require_item(id).await
    }

    pub async fn mark_item_unread(&self, id: ItemId) -> Result<Item> {
        sqlx::query("UPDATE items SET read_at = NULL WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        self.require_item(id).await
    }

    async fn require_item(&self, id: ItemId) -> Result<Item> {
        self.get_item(id)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("Item {id} not found")).into())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::{BackendError, ItemQuery};
    use crate::model::{FeedId, FeedRegistry, ItemId, NewFeed};
    use crate::storage::{into_backend_error, Database, NewItem};
    use chrono::{NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn feed(db: &Database, id: i64) -> FeedId {
        let request = FeedRegistry::validate(NewFeed::rss(
            format!("Feed {id}"),
            format!("https://feed{id}.example.com/rss"),
        ))
        .unwrap();
        db.create_feed(&request).await.unwrap().id
    }

    fn new_item(slug: &str, day: Option<u32>) -> NewItem {
        NewItem {
            title: format!("Item {slug}"),
            url: format!("https://example.com/{slug}"),
            body: None,
            published_at: day.map(|d| Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_upsert_items_insert() {
        let db = test_db().await;
        let feed_id = feed(&db, 1).await;

        let inserted = db
            .upsert_items(feed_id, &[new_item("a", Some(1)), new_item("b", Some(2))])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let items = db.get_items(&ItemQuery::all()).await.unwrap();
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Item b", "Item a"]);
    }

    #[tokio::test]
    async fn test_upsert_items_update_returns_zero_and_keeps_read_state() {
        let db = test_db().await;
        let feed_id = feed(&db, 1).await;

        db.upsert_items(feed_id, &[new_item("a", Some(1))]).await.unwrap();
        let id = db.get_items(&ItemQuery::all()).await.unwrap()[0].id;
        db.mark_item_read(id).await.unwrap();

        let mut changed = new_item("a", Some(1));
        changed.title = "Renamed".to_string();
        let inserted = db.upsert_items(feed_id, &[changed]).await.unwrap();
        assert_eq!(inserted, 0);

        let item = db.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.title, "Renamed");
        assert!(item.is_read());
    }

    #[tokio::test]
    async fn test_upsert_items_unknown_feed() {
        let db = test_db().await;
        let err = db.upsert_items(FeedId(77), &[new_item("a", None)]).await.unwrap_err();
        assert!(matches!(into_backend_error(err), BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_read_keeps_first_timestamp() {
        let db = test_db().await;
        let feed_id = feed(&db, 1).await;
        db.upsert_items(feed_id, &[new_item("a", None)]).await.unwrap();
        let id = db.get_items(&ItemQuery::all()).await.unwrap()[0].id;

        let first = db.mark_item_read(id).await.unwrap().read_at;
        let second = db.mark_item_read(id).await.unwrap().read_at;
        assert!(first.is_some());
        assert_eq!(first, second);

        let unread = db.mark_item_unread(id).await.unwrap();
        assert_eq!(unread.read_at, None);
    }

    #[tokio::test]
    async fn test_mark_missing_item() {
        let db = test_db().await;
        let err = db.mark_item_read(ItemId(5)).await.unwrap_err();
        assert!(matches!(into_backend_error(err), BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let db = test_db().await;
        let one = feed(&db, 1).await;
        let two = feed(&db, 2).await;
        db.upsert_items(one, &[new_item("old", Some(1)), new_item("undated", None)])
            .await
            .unwrap();
        db.upsert_items(two, &[new_item("new", Some(20))]).await.unwrap();

        let by_feed = db
            .get_items(&ItemQuery {
                feed_id: Some(one),
                ..ItemQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(by_feed.len(), 2);
        // Undated items sort last.
        assert_eq!(by_feed[1].title, "Item undated");

        let since = db
            .get_items(&ItemQuery {
                since: NaiveDate::from_ymd_opt(2024, 1, 10),
                ..ItemQuery::default()
            })
            .await
            .unwrap();
        let titles: Vec<&str> = since.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Item new"]);

        db.mark_item_read(since[0].id).await.unwrap();
        let unread = db
            .get_items(&ItemQuery {
                unread_only: true,
                ..ItemQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(unread.len(), 2);
    }
}
