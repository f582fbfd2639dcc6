//! Per-item read state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::ids::ItemId;
use super::item::Item;

/// Outcome of a read-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadChange {
    Changed,
    Unchanged,
}

impl ReadChange {
    pub fn changed(self) -> bool {
        matches!(self, ReadChange::Changed)
    }
}

/// Last-write-wins read flags keyed by item.
///
/// Items never seen are unread.
#[derive(Debug, Clone, Default)]
pub struct ReadStateTracker {
    read: HashMap<ItemId, DateTime<Utc>>,
}

impl ReadStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the state carried by an item record.
    pub fn seed(&mut self, item: &Item) {
        match item.read_at {
            Some(at) => {
                self.read.insert(item.id, at);
            }
            None => {
                self.read.remove(&item.id);
            }
        }
    }

    /// Mark an item read. Marking a read item again keeps the first
    /// timestamp.
    pub fn mark_read(&mut self, item: ItemId, at: DateTime<Utc>) -> ReadChange {
        if self.read.contains_key(&item) {
            return ReadChange::Unchanged;
        }
        self.read.insert(item, at);
        ReadChange::Changed
    }

    pub fn mark_unread(&mut self, item: ItemId) -> ReadChange {
        match self.read.remove(&item) {
            Some(_) => ReadChange::Changed,
            None => ReadChange::Unchanged,
        }
    }

    /// Overwrite with an authoritative value from the backend.
    pub fn set(&mut self, item: ItemId, read_at: Option<DateTime<Utc>>) {
        match read_at {
            Some(at) => {
                self.read.insert(item, at);
            }
            None => {
                self.read.remove(&item);
            }
        }
    }

    pub fn is_read(&self, item: ItemId) -> bool {
        self.read.contains_key(&item)
    }

    pub fn read_at(&self, item: ItemId) -> Option<DateTime<Utc>> {
        self.read.get(&item).copied()
    }

    pub fn clear(&mut self) {
        self.read.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut tracker = ReadStateTracker::new();
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();

        assert_eq!(tracker.mark_read(ItemId(1), first), ReadChange::Changed);
        assert_eq!(tracker.mark_read(ItemId(1), later), ReadChange::Unchanged);
        assert_eq!(tracker.read_at(ItemId(1)), Some(first));
    }

    #[test]
    fn test_toggle_sequence_ends_read() {
        let mut tracker = ReadStateTracker::new();
        let now = Utc::now();
        tracker.mark_read(ItemId(7), now);
        tracker.mark_unread(ItemId(7));
        tracker.mark_read(ItemId(7), now);
        assert!(tracker.is_read(ItemId(7)));
    }

    #[test]
    fn test_unknown_items_are_unread() {
        let mut tracker = ReadStateTracker::new();
        assert!(!tracker.is_read(ItemId(99)));
        assert_eq!(tracker.mark_unread(ItemId(99)), ReadChange::Unchanged);
    }
}
