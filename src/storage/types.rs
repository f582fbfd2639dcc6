use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::backend::BackendError;
use crate::model::{
    CategoryId, CategoryRecord, Feed, FeedId, Item, ItemId, SourceConfig, SourceKind,
};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the database
    #[error("Another instance of sift appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// Map a storage helper failure to the backend taxonomy.
///
/// Helpers return `anyhow::Error`; typed [`BackendError`]s raised inside
/// them pass through unchanged.
pub(crate) fn into_backend_error(err: anyhow::Error) -> BackendError {
    match err.downcast::<BackendError>() {
        Ok(backend) => backend,
        Err(err) => match err.downcast::<sqlx::Error>() {
            Ok(sqlx_err) => BackendError::Storage(DatabaseError::from_sqlx(sqlx_err).to_string()),
            Err(other) => BackendError::Storage(format!("{other:#}")),
        },
    }
}

pub(crate) fn from_epoch(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CategoryDbRow {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

impl CategoryDbRow {
    pub(crate) fn into_record(self) -> CategoryRecord {
        CategoryRecord {
            id: CategoryId(self.id),
            name: self.name,
            parent_id: self.parent_id.map(CategoryId),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub kind: String,
    pub config: String,
    pub category_id: Option<i64>,
    pub last_fetched_at: Option<i64>,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> anyhow::Result<Feed> {
        let kind: SourceKind = self
            .kind
            .parse()
            .map_err(|e: String| BackendError::Decode(e))?;
        let config: SourceConfig = serde_json::from_str(&self.config)
            .map_err(|e| BackendError::Decode(format!("feed {} config: {e}", self.id)))?;
        Ok(Feed {
            id: FeedId(self.id),
            name: self.name,
            url: self.url,
            kind,
            config,
            category_id: self.category_id.map(CategoryId),
            last_fetched_at: from_epoch(self.last_fetched_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub body: Option<String>,
    pub url: String,
    pub published_at: Option<i64>,
    pub fetched_at: i64,
    pub read_at: Option<i64>,
}

impl ItemDbRow {
    pub(crate) fn into_item(self) -> Item {
        Item {
            id: ItemId(self.id),
            feed_id: FeedId(self.feed_id),
            title: self.title,
            body: self.body,
            url: self.url,
            published_at: from_epoch(self.published_at),
            read_at: from_epoch(self.read_at),
            fetched_at: from_epoch(Some(self.fetched_at)),
        }
    }
}

// ============================================================================
// Ingest
// ============================================================================

/// An item handed to the local store from outside (e.g. a JSON file).
///
/// Items are keyed by `(feed, url)`; ingesting the same URL again refreshes
/// title, body and publication date but keeps read state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewItem {
    pub title: String,
    pub url: String,
    #[serde(default, alias = "content")]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}
