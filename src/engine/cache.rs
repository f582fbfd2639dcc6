//! Memoized aggregation results.
//!
//! Results are keyed by `(Selection, FilterSpec)` and dropped by explicit
//! [`Invalidation`] events. Nothing expires on its own: every mutation of the
//! catalog must be followed by the matching event.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::pipeline::{aggregate, Aggregate};
use super::query::{FilterSpec, Selection};
use crate::model::Catalog;

/// Which part of the catalog changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invalidation {
    /// Items were added, refreshed or replaced.
    Items,
    /// An item's read state changed.
    ReadState,
    /// Feeds were added, removed or moved between categories.
    Feeds,
    /// The category tree changed.
    Categories,
    /// Item-to-category assignments changed.
    Assignments,
}

pub const DEFAULT_CACHE_CAPACITY: usize = 32;

type CacheKey = (Selection, FilterSpec);

#[derive(Debug)]
pub struct AggregateCache {
    entries: LruCache<CacheKey, Arc<Aggregate>>,
    hits: u64,
    misses: u64,
}

impl Default for AggregateCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl AggregateCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached result for the key, computing and storing it on a miss.
    pub fn get_or_compute(
        &mut self,
        catalog: &Catalog,
        selection: Selection,
        filter: &FilterSpec,
    ) -> Arc<Aggregate> {
        let key = (selection, filter.clone());
        if let Some(hit) = self.entries.get(&key) {
            self.hits += 1;
            return Arc::clone(hit);
        }
        self.misses += 1;
        let result = Arc::new(aggregate(catalog, selection, filter));
        self.entries.put(key, Arc::clone(&result));
        result
    }

    pub fn invalidate(&mut self, event: Invalidation) {
        match event {
            Invalidation::Items | Invalidation::ReadState | Invalidation::Feeds => {
                self.entries.clear();
            }
            Invalidation::Categories | Invalidation::Assignments => {
                let stale: Vec<CacheKey> = self
                    .entries
                    .iter()
                    .filter(|(key, _)| matches!(key.0, Selection::Category(_)))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in stale {
                    self.entries.pop(&key);
                }
            }
        }
        tracing::trace!(?event, remaining = self.entries.len(), "Aggregate cache invalidated");
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
