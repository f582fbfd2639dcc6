use anyhow::Result;

use super::schema::Database;
use super::types::CategoryDbRow;
use crate::backend::{BackendError, CategoryPatch};
use crate::model::{CategoryId, CategoryRecord, CategoryTree};
use crate::util::normalize_name;

fn rejected(detail: impl Into<String>) -> BackendError {
    BackendError::Rejected {
        status: 400,
        detail: detail.into(),
    }
}

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Sanitize and validate a category name: control characters stripped,
    /// whitespace trimmed, empty rejected.
    fn sanitize_category_name(name: &str) -> Result<String> {
        normalize_name(name)
            .ok_or_else(|| rejected("Category name cannot be empty or whitespace-only").into())
    }

    pub async fn create_category(
        &self,
        name: &str,
        parent_id: Option<CategoryId>,
    ) -> Result<CategoryRecord> {
        let clean_name = Self::sanitize_category_name(name)?;

        if let Some(pid) = parent_id {
            if !self.category_exists(pid).await? {
                return Err(BackendError::NotFound(format!("Parent category {pid} not found")).into());
            }
        }

        let row: CategoryDbRow = sqlx::query_as(
            "INSERT INTO categories (name, parent_id, created_at) VALUES (?, ?, ?) \
             RETURNING id, name, parent_id",
        )
        .bind(&clean_name)
        .bind(parent_id.map(CategoryId::get))
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_record())
    }

    /// Rename and/or move a category.
    ///
    /// Moving under itself or under one of its descendants is rejected.
    pub async fn update_category(
        &self,
        id: CategoryId,
        patch: &CategoryPatch,
    ) -> Result<CategoryRecord> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<CategoryDbRow> =
            sqlx::query_as("SELECT id, name, parent_id FROM categories WHERE id = ?")
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(mut row) = existing else {
            return Err(BackendError::NotFound(format!("Category {id} not found")).into());
        };

        if let Some(name) = &patch.name {
            row.name = Self::sanitize_category_name(name)?;
        }

        if let Some(parent) = patch.parent {
            if let Some(pid) = parent {
                if pid == id {
                    return Err(rejected("Category cannot be its own parent").into());
                }
                let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM categories WHERE id = ?")
                    .bind(pid.get())
                    .fetch_optional(&mut *tx)
                    .await?;
                if found.is_none() {
                    return Err(
                        BackendError::NotFound(format!("Parent category {pid} not found")).into(),
                    );
                }
                // Walk up from the new parent; meeting `id` means a cycle.
                // LIMIT bounds the walk if stored data is already corrupted.
                let (hit,): (i64,) = sqlx::query_as(
                    r#"
                    WITH RECURSIVE ancestors(id, parent_id) AS (
                        SELECT id, parent_id FROM categories WHERE id = ?
                        UNION ALL
                        SELECT c.id, c.parent_id
                        FROM categories c
                        JOIN ancestors a ON c.id = a.parent_id
                        LIMIT 1000
                    )
                    SELECT COUNT(*) FROM ancestors WHERE id = ?
                    "#,
                )
                .bind(pid.get())
                .bind(id.get())
                .fetch_one(&mut *tx)
                .await?;
                if hit > 0 {
                    return Err(rejected("Moving the category there would create a cycle").into());
                }
            }
            row.parent_id = parent.map(CategoryId::get);
        }

        sqlx::query("UPDATE categories SET name = ?, parent_id = ? WHERE id = ?")
            .bind(&row.name)
            .bind(row.parent_id)
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(row.into_record())
    }

    /// Delete a leaf category. Its feeds become uncategorized and its
    /// assignments go with it.
    pub async fn delete_category(&self, id: CategoryId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let (children,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM categories WHERE parent_id = ?")
                .bind(id.get())
                .fetch_one(&mut *tx)
                .await?;
        if children > 0 {
            return Err(rejected(
                "Cannot delete category with children. Delete or move children first.",
            )
            .into());
        }

        sqlx::query("UPDATE feeds SET category_id = NULL WHERE category_id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM category_assignments WHERE category_id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("Category {id} not found")).into());
        }

        tx.commit().await?;
        Ok(())
    }

    /// All categories, parents before children, siblings in creation order.
    pub async fn get_categories(&self) -> Result<Vec<CategoryRecord>> {
        let rows: Vec<CategoryDbRow> =
            sqlx::query_as("SELECT id, name, parent_id FROM categories ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await?;

        let tree = CategoryTree::from_records(rows.into_iter().map(CategoryDbRow::into_record));
        Ok(tree.records())
    }

    pub(crate) async fn category_exists(&self, id: CategoryId) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM categories WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::{BackendError, CategoryPatch};
    use crate::model::CategoryId;
    use crate::storage::{into_backend_error, Database};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_category() {
        let db = test_db().await;

        let record = db.create_category("Tech", None).await.unwrap();
        assert!(record.id.get() > 0);

        let categories = db.get_categories().await.unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Tech");
        assert_eq!(categories[0].parent_id, None);
    }

    #[tokio::test]
    async fn test_create_category_sanitizes_name() {
        let db = test_db().await;

        let record = db.create_category("  \x1b[31mNews\x07 ", None).await.unwrap();
        assert_eq!(record.name, "News");

        let err = db.create_category(" \t ", None).await.unwrap_err();
        assert!(matches!(
            into_backend_error(err),
            BackendError::Rejected { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn test_create_with_missing_parent() {
        let db = test_db().await;
        let err = db.create_category("Orphan", Some(CategoryId(42))).await.unwrap_err();
        assert!(matches!(into_backend_error(err), BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_parents_listed_before_children() {
        let db = test_db().await;

        let a = db.create_category("A", None).await.unwrap();
        let b = db.create_category("B", None).await.unwrap();
        // Move A under B, which was created later.
        db.update_category(a.id, &CategoryPatch::reparent(Some(b.id)))
            .await
            .unwrap();

        let names: Vec<String> = db
            .get_categories()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_update_rejects_cycle() {
        let db = test_db().await;

        let root = db.create_category("Root", None).await.unwrap();
        let child = db.create_category("Child", Some(root.id)).await.unwrap();
        let grandchild = db.create_category("Grandchild", Some(child.id)).await.unwrap();

        let err = db
            .update_category(root.id, &CategoryPatch::reparent(Some(grandchild.id)))
            .await
            .unwrap_err();
        assert!(matches!(
            into_backend_error(err),
            BackendError::Rejected { status: 400, .. }
        ));

        let err = db
            .update_category(root.id, &CategoryPatch::reparent(Some(root.id)))
            .await
            .unwrap_err();
        assert!(matches!(
            into_backend_error(err),
            BackendError::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_rename_and_move_to_root() {
        let db = test_db().await;

        let root = db.create_category("Root", None).await.unwrap();
        let child = db.create_category("Child", Some(root.id)).await.unwrap();

        let patch = CategoryPatch {
            name: Some("Top".to_string()),
            parent: Some(None),
        };
        let updated = db.update_category(child.id, &patch).await.unwrap();
        assert_eq!(updated.name, "Top");
        assert_eq!(updated.parent_id, None);
    }

    #[tokio::test]
    async fn test_delete_category_with_children_rejected() {
        let db = test_db().await;

        let root = db.create_category("Root", None).await.unwrap();
        let child = db.create_category("Child", Some(root.id)).await.unwrap();

        assert!(db.delete_category(root.id).await.is_err());
        db.delete_category(child.id).await.unwrap();
        db.delete_category(root.id).await.unwrap();
        assert!(db.get_categories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_category() {
        let db = test_db().await;
        let err = db.delete_category(CategoryId(9)).await.unwrap_err();
        assert!(matches!(into_backend_error(err), BackendError::NotFound(_)));
    }
}
