//! [`Backend`] over the local store.
//!
//! Inherent methods do the work and report failures through `anyhow`; this
//! layer only maps them into [`BackendError`].

use super::schema::Database;
use super::types::into_backend_error;
use crate::backend::{
    Backend, BackendError, BackendResult, CategoryPatch, FetchOutcome, ItemQuery, Membership,
};
use crate::model::{
    Assignment, AssignmentId, CategoryId, CategoryRecord, Feed, FeedId, Item, ItemId, NewFeed,
};

impl Backend for Database {
    async fn list_feeds(&self) -> BackendResult<Vec<Feed>> {
        self.get_feeds().await.map_err(into_backend_error)
    }

    async fn create_feed(&self, feed: NewFeed) -> BackendResult<Feed> {
        Database::create_feed(self, &feed)
            .await
            .map_err(into_backend_error)
    }

    async fn delete_feed(&self, id: FeedId) -> BackendResult<()> {
        Database::delete_feed(self, id)
            .await
            .map_err(into_backend_error)
    }

    /// The local store has no fetcher; items arrive through ingest.
    async fn trigger_fetch(&self, id: FeedId) -> BackendResult<FetchOutcome> {
        tracing::debug!(feed_id = %id, "Fetch requested from local store");
        Err(BackendError::Unsupported(
            "the local store does not poll sources; use `sift ingest`",
        ))
    }

    async fn list_categories(&self) -> BackendResult<Vec<CategoryRecord>> {
        self.get_categories().await.map_err(into_backend_error)
    }

    async fn create_category(
        &self,
        name: String,
        parent: Option<CategoryId>,
    ) -> BackendResult<CategoryRecord> {
        Database::create_category(self, &name, parent)
            .await
            .map_err(into_backend_error)
    }

    async fn update_category(
        &self,
        id: CategoryId,
        patch: CategoryPatch,
    ) -> BackendResult<CategoryRecord> {
        Database::update_category(self, id, &patch)
            .await
            .map_err(into_backend_error)
    }

    async fn delete_category(&self, id: CategoryId) -> BackendResult<()> {
        Database::delete_category(self, id)
            .await
            .map_err(into_backend_error)
    }

    async fn list_items(&self, query: ItemQuery) -> BackendResult<Vec<Item>> {
        self.get_items(&query).await.map_err(into_backend_error)
    }

    async fn mark_item_read(&self, id: ItemId) -> BackendResult<Item> {
        Database::mark_item_read(self, id)
            .await
            .map_err(into_backend_error)
    }

    async fn mark_item_unread(&self, id: ItemId) -> BackendResult<Item> {
        Database::mark_item_unread(self, id)
            .await
            .map_err(into_backend_error)
    }

    async fn assign_item_to_category(
        &self,
        category: CategoryId,
        item: ItemId,
    ) -> BackendResult<Assignment> {
        self.assign_item(category, item)
            .await
            .map_err(into_backend_error)
    }

    async fn remove_assignment(&self, id: AssignmentId) -> BackendResult<()> {
        Database::remove_assignment(self, id)
            .await
            .map_err(into_backend_error)
    }

    async fn list_item_categories(&self, item: ItemId) -> BackendResult<Vec<Membership>> {
        self.get_item_memberships(item)
            .await
            .map_err(into_backend_error)
    }
}
