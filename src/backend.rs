//! The storage boundary.
//!
//! The core never persists anything itself. Every mutation and every list
//! goes through a [`Backend`], which is either the local SQLite store
//! ([`crate::storage::Database`]) or the remote REST client
//! ([`crate::remote::RemoteClient`]).

use chrono::NaiveDate;
use std::future::Future;
use thiserror::Error;

use crate::engine::{FilterSpec, Selection};
use crate::model::{
    Assignment, AssignmentId, CategoryId, CategoryRecord, Feed, FeedId, Item, ItemId, NewFeed,
};

/// Failures reported by a backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Credentials were rejected. Never retried.
    #[error("Authentication expired; sign in again")]
    AuthExpired,

    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend understood the request and refused it.
    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// Network or server trouble; the same request may succeed later.
    #[error("Temporary failure: {0}")]
    Transient(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The response could not be understood.
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Worth retrying later (by the caller; the core never retries).
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Result of asking a backend to poll a feed now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    pub new_items: usize,
}

/// Partial category update. `parent: Some(None)` moves to the roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub parent: Option<Option<CategoryId>>,
}

impl CategoryPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            parent: None,
        }
    }

    pub fn reparent(parent: Option<CategoryId>) -> Self {
        Self {
            name: None,
            parent: Some(parent),
        }
    }
}

/// Server-side item filter. Text matching is never delegated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub category_id: Option<CategoryId>,
    pub feed_id: Option<FeedId>,
    pub unread_only: bool,
    pub since: Option<NaiveDate>,
}

impl ItemQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_view(selection: Selection, filter: &FilterSpec) -> Self {
        Self {
            category_id: selection.category(),
            feed_id: selection.feed(),
            unread_only: filter.unread_only,
            since: filter.since,
        }
    }
}

/// One category an item is filed under. Some backends do not report the
/// record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub category_id: CategoryId,
    pub assignment_id: Option<AssignmentId>,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Everything the session needs from persistence and transport.
///
/// Lists come back in upstream order: categories flat with parents before
/// children, items in the order the view should show them.
pub trait Backend: Send + Sync {
    fn list_feeds(&self) -> impl Future<Output = BackendResult<Vec<Feed>>> + Send;

    fn create_feed(&self, feed: NewFeed) -> impl Future<Output = BackendResult<Feed>> + Send;

    fn delete_feed(&self, id: FeedId) -> impl Future<Output = BackendResult<()>> + Send;

    /// Poll the feed's source now.
    fn trigger_fetch(&self, id: FeedId) -> impl Future<Output = BackendResult<FetchOutcome>> + Send;

    fn list_categories(&self) -> impl Future<Output = BackendResult<Vec<CategoryRecord>>> + Send;

    fn create_category(
        &self,
        name: String,
        parent: Option<CategoryId>,
    ) -> impl Future<Output = BackendResult<CategoryRecord>> + Send;

    fn update_category(
        &self,
        id: CategoryId,
        patch: CategoryPatch,
    ) -> impl Future<Output = BackendResult<CategoryRecord>> + Send;

    fn delete_category(&self, id: CategoryId) -> impl Future<Output = BackendResult<()>> + Send;

    fn list_items(&self, query: ItemQuery) -> impl Future<Output = BackendResult<Vec<Item>>> + Send;

    fn mark_item_read(&self, id: ItemId) -> impl Future<Output = BackendResult<Item>> + Send;

    fn mark_item_unread(&self, id: ItemId) -> impl Future<Output = BackendResult<Item>> + Send;

    fn assign_item_to_category(
        &self,
        category: CategoryId,
        item: ItemId,
    ) -> impl Future<Output = BackendResult<Assignment>> + Send;

    fn remove_assignment(&self, id: AssignmentId) -> impl Future<Output = BackendResult<()>> + Send;

    fn list_item_categories(
        &self,
        item: ItemId,
    ) -> impl Future<Output = BackendResult<Vec<Membership>>> + Send;
}
