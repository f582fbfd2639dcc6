//! The aggregation pipeline.
//!
//! Every stage is a pure function over item sequences. Stages only drop
//! items; none of them reorders, so output order is always store order.

use chrono::{DateTime, NaiveDate, Utc};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::query::{start_of_day, FilterSpec, Selection};
use crate::model::{Catalog, CategoryId, Item, ItemId, ReadStateTracker};
use crate::util::contains_folded;

/// The display set for one selection and filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub items: Vec<Arc<Item>>,
    /// Number of items in the view.
    pub total: usize,
    /// Items in the view that are unread.
    pub unread: usize,
}

impl Aggregate {
    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|i| i.id).collect()
    }
}

/// Items belonging to a category: those of feeds bound to it plus those
/// assigned to it, each once, in store order.
fn category_items(catalog: &Catalog, category: CategoryId) -> Vec<Arc<Item>> {
    let feeds = catalog.feeds.ids_in_category(category);
    let assigned: HashSet<ItemId> = catalog.assignments.items_in(category).collect();
    catalog
        .items
        .iter()
        .filter(|item| feeds.contains(&item.feed_id) || assigned.contains(&item.id))
        .cloned()
        .collect()
}

/// Stage 1: the unfiltered set for a selection.
///
/// Unknown category or feed ids yield an empty set.
pub fn base_set(catalog: &Catalog, selection: Selection) -> Vec<Arc<Item>> {
    match selection {
        Selection::None => catalog.items.iter().cloned().collect(),
        Selection::Category(id) => {
            if !catalog.categories.contains(id) {
                tracing::debug!(category_id = %id, "Selected category is unknown, empty view");
                return Vec::new();
            }
            category_items(catalog, id)
        }
        Selection::Feed(id) => {
            if !catalog.feeds.contains(id) {
                tracing::debug!(feed_id = %id, "Selected feed is unknown, empty view");
                return Vec::new();
            }
            catalog
                .items
                .iter()
                .filter(|item| item.feed_id == id)
                .cloned()
                .collect()
        }
    }
}

fn as_item<T: Borrow<Item>>(value: &T) -> &Item {
    value.borrow()
}

/// Stage 2: keep items published on or after the start of `since` (UTC).
/// Undated items are dropped while the filter is active.
pub fn apply_since<T: Borrow<Item>>(items: Vec<T>, since: Option<NaiveDate>) -> Vec<T> {
    let Some(date) = since else {
        return items;
    };
    let bound: DateTime<Utc> = start_of_day(date);
    items
        .into_iter()
        .filter(|item| as_item(item).published_at.is_some_and(|p| p >= bound))
        .collect()
}

/// Stage 3: keep unread items.
pub fn apply_unread<T: Borrow<Item>>(
    items: Vec<T>,
    unread_only: bool,
    read_state: &ReadStateTracker,
) -> Vec<T> {
    if !unread_only {
        return items;
    }
    items
        .into_iter()
        .filter(|item| !read_state.is_read(as_item(item).id))
        .collect()
}

/// Stage 4: case-insensitive substring match on title or body.
///
/// `query` must already be lowercased (see [`FilterSpec::text_query`]).
/// Usable on its own for item lists that were filtered elsewhere.
pub fn apply_text<T: Borrow<Item>>(items: Vec<T>, query: Option<&str>) -> Vec<T> {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return items;
    };
    items
        .into_iter()
        .filter(|item| {
            let item = as_item(item);
            contains_folded(&item.title, query)
                || item
                    .body
                    .as_deref()
                    .is_some_and(|body| contains_folded(body, query))
        })
        .collect()
}

/// Run the whole pipeline. Reads the catalog only.
pub fn aggregate(catalog: &Catalog, selection: Selection, filter: &FilterSpec) -> Aggregate {
    let items = base_set(catalog, selection);
    let items = apply_since(items, filter.since);
    let items = apply_unread(items, filter.unread_only, &catalog.read_state);
    let items = apply_text(items, filter.text_query());

    let unread = items
        .iter()
        .filter(|item| !catalog.read_state.is_read(item.id))
        .count();
    Aggregate {
        total: items.len(),
        unread,
        items,
    }
}

/// Per-category totals for an unfiltered view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    /// Feeds bound to the category.
    pub feeds: usize,
    /// Distinct items in the category view.
    pub items: usize,
    pub unread: usize,
}

/// Counts for every category in the tree.
pub fn category_counts(catalog: &Catalog) -> HashMap<CategoryId, CategoryCounts> {
    catalog
        .categories
        .flatten()
        .iter()
        .map(|flat| {
            let id = flat.category.id;
            let items = category_items(catalog, id);
            let unread = items
                .iter()
                .filter(|item| !catalog.read_state.is_read(item.id))
                .count();
            let counts = CategoryCounts {
                feeds: catalog.feeds.ids_in_category(id).len(),
                items: items.len(),
                unread,
            };
            (id, counts)
        })
        .collect()
}

/// A flattened tree row with its counts, ready for a sidebar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
    pub id: CategoryId,
    pub name: String,
    pub depth: usize,
    pub has_children: bool,
    pub counts: CategoryCounts,
}

pub fn category_rows(catalog: &Catalog) -> Vec<CategoryRow> {
    let mut counts = category_counts(catalog);
    catalog
        .categories
        .flatten()
        .into_iter()
        .map(|flat| CategoryRow {
            id: flat.category.id,
            name: flat.category.name.clone(),
            depth: flat.depth,
            has_children: !flat.category.children().is_empty(),
            counts: counts.remove(&flat.category.id).unwrap_or_default(),
        })
        .collect()
}
