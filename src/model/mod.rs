//! In-memory domain model: categories, feeds, items, assignments and read
//! state, plus the [`Catalog`] that bundles them for the engine.

mod assignment;
mod category;
mod feed;
mod ids;
mod item;
mod read_state;
mod validation;

use chrono::{DateTime, Utc};

pub use assignment::{Assignment, AssignmentIndex};
pub use category::{Category, CategoryRecord, CategoryTree, FlatCategory, TreeAnomaly};
pub use feed::{Feed, FeedRegistry, NewFeed, SourceConfig, SourceKind, NO_SOURCE_URL};
pub use ids::{AssignmentId, CategoryId, FeedId, ItemId};
pub use item::{Item, ItemStore};
pub use read_state::{ReadChange, ReadStateTracker};
pub use validation::ValidationError;

/// Everything the aggregation engine reads.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub categories: CategoryTree,
    pub feeds: FeedRegistry,
    pub items: ItemStore,
    pub assignments: AssignmentIndex,
    pub read_state: ReadStateTracker,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh an item, taking its read state.
    ///
    /// Items of feeds the registry does not know are kept and shown under an
    /// unknown feed.
    pub fn upsert_item(&mut self, item: Item) {
        if !self.feeds.is_empty() && !self.feeds.contains(item.feed_id) {
            tracing::warn!(
                item_id = %item.id,
                feed_id = %item.feed_id,
                "Item references an unknown feed"
            );
        }
        self.read_state.seed(&item);
        self.items.upsert(item);
    }

    /// Replace all items with a snapshot and reseed read state from it.
    pub fn replace_items(&mut self, items: Vec<Item>) {
        self.read_state.clear();
        for item in &items {
            self.read_state.seed(item);
        }
        self.items.replace_all(items);
    }

    /// Mark an item read in the tracker and on its stored record.
    pub fn mark_read(&mut self, item: ItemId, at: DateTime<Utc>) -> ReadChange {
        let change = self.read_state.mark_read(item, at);
        self.items.set_read_at(item, self.read_state.read_at(item));
        change
    }

    pub fn mark_unread(&mut self, item: ItemId) -> ReadChange {
        let change = self.read_state.mark_unread(item);
        self.items.set_read_at(item, None);
        change
    }

    /// Overwrite read state from a known value, keeping the stored record
    /// in step with the tracker.
    pub fn set_read_at(&mut self, item: ItemId, read_at: Option<DateTime<Utc>>) {
        self.read_state.set(item, read_at);
        self.items.set_read_at(item, read_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn unread_item(id: i64) -> Item {
        Item {
            id: ItemId(id),
            feed_id: FeedId(1),
            title: format!("Item {id}"),
            body: None,
            url: format!("https://example.com/{id}"),
            published_at: None,
            read_at: None,
            fetched_at: None,
        }
    }

    #[test]
    fn test_read_toggles_reach_stored_record() {
        let mut catalog = Catalog::new();
        catalog.upsert_item(unread_item(1));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert_eq!(catalog.mark_read(ItemId(1), at), ReadChange::Changed);
        let stored = catalog.items.get(ItemId(1)).unwrap();
        assert_eq!(stored.read_at, Some(at));
        assert!(stored.is_read());

        assert_eq!(catalog.mark_unread(ItemId(1)), ReadChange::Changed);
        assert!(!catalog.items.get(ItemId(1)).unwrap().is_read());
        assert!(!catalog.read_state.is_read(ItemId(1)));
    }

    #[test]
    fn test_second_mark_read_keeps_first_timestamp_on_record() {
        let mut catalog = Catalog::new();
        catalog.upsert_item(unread_item(1));
        let first = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();

        catalog.mark_read(ItemId(1), first);
        assert_eq!(catalog.mark_read(ItemId(1), later), ReadChange::Unchanged);
        assert_eq!(catalog.items.get(ItemId(1)).unwrap().read_at, Some(first));
    }
}
