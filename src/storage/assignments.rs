use anyhow::Result;

use super::schema::Database;
use crate::backend::{BackendError, Membership};
use crate::model::{Assignment, AssignmentId, CategoryId, ItemId};

impl Database {
    // ========================================================================
    // Assignment Operations
    // ========================================================================

    /// File an item under a category.
    ///
    /// Assigning a pair that already has a record returns the oldest
    /// existing record instead of adding another.
    pub async fn assign_item(&self, category: CategoryId, item: ItemId) -> Result<Assignment> {
        if !self.category_exists(category).await? {
            return Err(BackendError::NotFound(format!("Category {category} not found")).into());
        }
        if self.get_item(item).await?.is_none() {
            return Err(BackendError::NotFound(format!("Item {item} not found")).into());
        }

        let mut tx = self.pool.begin().await?;
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM category_assignments WHERE category_id = ? AND item_id = ? \
             ORDER BY id LIMIT 1",
        )
        .bind(category.get())
        .bind(item.get())
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some((id,)) => id,
            None => {
                let (id,): (i64,) = sqlx::query_as(
                    "INSERT INTO category_assignments (category_id, item_id, created_at) \
                     VALUES (?, ?, ?) RETURNING id",
                )
                .bind(category.get())
                .bind(item.get())
                .bind(chrono::Utc::now().timestamp())
                .fetch_one(&mut *tx)
                .await?;
                id
            }
        };
        tx.commit().await?;

        Ok(Assignment {
            id: AssignmentId(id),
            category_id: category,
            item_id: item,
        })
    }

    pub async fn remove_assignment(&self, id: AssignmentId) -> Result<()> {
        let result = sqlx::query("DELETE FROM category_assignments WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("Assignment {id} not found")).into());
        }
        Ok(())
    }

    /// Every assignment record of an item, oldest first. Duplicate records
    /// for one pair are all returned.
    pub async fn get_item_memberships(&self, item: ItemId) -> Result<Vec<Membership>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT id, category_id FROM category_assignments WHERE item_id = ? ORDER BY id",
        )
        .bind(item.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, category_id)| Membership {
                category_id: CategoryId(category_id),
                assignment_id: Some(AssignmentId(id)),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::{BackendError, ItemQuery};
    use crate::model::{AssignmentId, CategoryId, FeedRegistry, ItemId, NewFeed};
    use crate::storage::{into_backend_error, Database, NewItem};
    use pretty_assertions::assert_eq;

    async fn seeded() -> (Database, CategoryId, ItemId) {
        let db = Database::open(":memory:").await.unwrap();
        let category = db.create_category("Reading", None).await.unwrap().id;
        let request =
            FeedRegistry::validate(NewFeed::rss("Blog", "https://blog.example.com/rss")).unwrap();
        let feed = db.create_feed(&request).await.unwrap().id;
        db.upsert_items(
            feed,
            &[NewItem {
                title: "Post".to_string(),
                url: "https://blog.example.com/post".to_string(),
                body: None,
                published_at: None,
            }],
        )
        .await
        .unwrap();
        let item = db.get_items(&ItemQuery::all()).await.unwrap()[0].id;
        (db, category, item)
    }

    #[tokio::test]
    async fn test_assign_is_idempotent_per_pair() {
        let (db, category, item) = seeded().await;

        let first = db.assign_item(category, item).await.unwrap();
        let second = db.assign_item(category, item).await.unwrap();
        assert_eq!(first, second);

        let memberships = db.get_item_memberships(item).await.unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].assignment_id, Some(first.id));
    }

    #[tokio::test]
    async fn test_assigned_item_listed_under_category() {
        let (db, _, item) = seeded().await;
        let other = db.create_category("Other", None).await.unwrap().id;
        db.assign_item(other, item).await.unwrap();

        let items = db
            .get_items(&ItemQuery {
                category_id: Some(other),
                ..ItemQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, item);
    }

    #[tokio::test]
    async fn test_remove_assignment() {
        let (db, category, item) = seeded().await;

        let assignment = db.assign_item(category, item).await.unwrap();
        db.remove_assignment(assignment.id).await.unwrap();
        assert!(db.get_item_memberships(item).await.unwrap().is_empty());

        let err = db.remove_assignment(assignment.id).await.unwrap_err();
        assert!(matches!(into_backend_error(err), BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_assign_unknown_targets() {
        let (db, category, item) = seeded().await;

        let err = db.assign_item(CategoryId(99), item).await.unwrap_err();
        assert!(matches!(into_backend_error(err), BackendError::NotFound(_)));
        let err = db.assign_item(category, ItemId(99)).await.unwrap_err();
        assert!(matches!(into_backend_error(err), BackendError::NotFound(_)));
        assert!(db.remove_assignment(AssignmentId(99)).await.is_err());
    }

    #[tokio::test]
    async fn test_deleting_category_drops_assignments() {
        let (db, _, item) = seeded().await;
        let extra = db.create_category("Extra", None).await.unwrap().id;
        db.assign_item(extra, item).await.unwrap();

        db.delete_category(extra).await.unwrap();
        assert!(db.get_item_memberships(item).await.unwrap().is_empty());
    }
}
