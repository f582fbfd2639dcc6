//! Items and the in-memory store the aggregation engine reads from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::ids::{FeedId, ItemId};

/// One piece of content pulled from a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub feed_id: FeedId,
    pub title: String,
    /// Opaque markup, passed through untouched.
    pub body: Option<String>,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Present when the item has been read.
    pub read_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Items in upstream order.
///
/// Entries are shared as `Arc<Item>` so aggregate results can hand them out
/// without copying bodies.
#[derive(Debug, Clone, Default)]
pub struct ItemStore {
    items: Vec<Arc<Item>>,
    index: HashMap<ItemId, usize>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole store with a snapshot, keeping its order.
    /// A repeated id keeps its first position and its last contents.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = Item>) {
        self.items.clear();
        self.index.clear();
        for item in items {
            self.upsert(item);
        }
    }

    /// Insert a new item at the end, or refresh an existing one in place.
    /// Returns true when the item was new.
    pub fn upsert(&mut self, item: Item) -> bool {
        match self.index.get(&item.id) {
            Some(&pos) => {
                self.items[pos] = Arc::new(item);
                false
            }
            None => {
                self.index.insert(item.id, self.items.len());
                self.items.push(Arc::new(item));
                true
            }
        }
    }

    /// Rewrite an item's read timestamp. Returns false when the item is
    /// unknown or already carries that value.
    pub fn set_read_at(&mut self, id: ItemId, read_at: Option<DateTime<Utc>>) -> bool {
        let Some(&pos) = self.index.get(&id) else {
            return false;
        };
        if self.items[pos].read_at == read_at {
            return false;
        }
        let mut updated = Item::clone(&self.items[pos]);
        updated.read_at = read_at;
        self.items[pos] = Arc::new(updated);
        true
    }

    pub fn get(&self, id: ItemId) -> Option<&Arc<Item>> {
        self.index.get(&id).map(|&pos| &self.items[pos])
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.index.contains_key(&id)
    }

    /// Position in upstream order, used to sort merged sets.
    pub fn position(&self, id: ItemId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Item>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
