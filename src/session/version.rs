//! Request stamps used to discard out-of-order responses.
//!
//! Every request the session issues gets a [`Stamp`] from a single counter.
//! A mutation also *claims* the entity it touches at that stamp. A response
//! for an entity is applied only if its stamp is at least the entity's last
//! claim, so once everything has settled the last mutation issued wins.

use std::collections::HashMap;

use crate::model::{CategoryId, FeedId, ItemId};

/// Monotonic request version. Later requests compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp(u64);

impl Stamp {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// The unit a stamp claim covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Category(CategoryId),
    Feed(FeedId),
    /// An item's record and read state.
    Item(ItemId),
    /// The set of categories an item is assigned to.
    Memberships(ItemId),
}

#[derive(Debug, Default)]
pub struct VersionBook {
    last_issued: u64,
    claims: HashMap<EntityKey, Stamp>,
}

impl VersionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh stamp without claiming anything; used for list snapshots.
    pub fn issue(&mut self) -> Stamp {
        self.last_issued += 1;
        Stamp(self.last_issued)
    }

    /// A fresh stamp that becomes the entity's latest claim.
    pub fn claim(&mut self, key: EntityKey) -> Stamp {
        let stamp = self.issue();
        self.claims.insert(key, stamp);
        stamp
    }

    /// Whether a response issued at `stamp` may still be applied to `key`.
    pub fn is_current(&self, key: EntityKey, stamp: Stamp) -> bool {
        self.claims.get(&key).map_or(true, |latest| stamp >= *latest)
    }

    pub fn last_claim(&self, key: EntityKey) -> Option<Stamp> {
        self.claims.get(&key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamps_increase() {
        let mut book = VersionBook::new();
        let a = book.issue();
        let b = book.claim(EntityKey::Item(ItemId(1)));
        assert!(b > a);
    }

    #[test]
    fn test_older_claim_is_stale() {
        let mut book = VersionBook::new();
        let key = EntityKey::Item(ItemId(1));
        let first = book.claim(key);
        let second = book.claim(key);

        assert!(!book.is_current(key, first));
        assert!(book.is_current(key, second));
    }

    #[test]
    fn test_snapshot_before_claim_is_stale() {
        let mut book = VersionBook::new();
        let key = EntityKey::Category(CategoryId(3));
        let snapshot = book.issue();
        book.claim(key);

        assert!(!book.is_current(key, snapshot));
        assert!(book.is_current(EntityKey::Category(CategoryId(4)), snapshot));
    }
}
