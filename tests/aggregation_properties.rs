//! Property-based tests for the category tree and the filter pipeline.
//!
//! - flatten lists every node once, parents first, with consistent depths
//! - no sequence of moves can make the parent relation cyclic
//! - each filter stage is idempotent and stages commute
//! - category views list an item at most once however it got there

use chrono::{NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

use sift::engine::{aggregate, apply_since, apply_text, apply_unread, FilterSpec, Selection};
use sift::model::{
    Assignment, AssignmentId, Catalog, CategoryId, CategoryRecord, CategoryTree, Feed, FeedId,
    Item, ItemId, ReadStateTracker, SourceConfig, SourceKind,
};

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

/// Flat records with arbitrary parent links, including dangling ones and
/// cycles, as a misbehaving backend might send them.
fn records_strategy() -> impl Strategy<Value = Vec<CategoryRecord>> {
    (1usize..24).prop_flat_map(|n| {
        prop::collection::vec(prop::option::of(0i64..(n as i64 + 3)), n).prop_map(|parents| {
            parents
                .into_iter()
                .enumerate()
                .map(|(i, parent)| CategoryRecord {
                    id: CategoryId(i as i64),
                    name: format!("cat-{i}"),
                    parent_id: parent.map(CategoryId),
                })
                .collect()
        })
    })
}

fn moves_strategy() -> impl Strategy<Value = Vec<(i64, Option<i64>)>> {
    prop::collection::vec((0i64..24, prop::option::of(0i64..24)), 0..40)
}

fn word_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["rust", "Tokio", "async", "SQLite", "feeds", "news"])
        .prop_map(str::to_string)
}

/// (title word, optional day of May 2024, read)
fn items_strategy() -> impl Strategy<Value = Vec<(String, Option<u32>, bool)>> {
    prop::collection::vec(
        (word_strategy(), prop::option::of(1u32..29), any::<bool>()),
        0..30,
    )
}

fn build_items(specs: &[(String, Option<u32>, bool)]) -> Vec<Item> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (word, day, read))| Item {
            id: ItemId(i as i64),
            feed_id: FeedId((i % 3) as i64),
            title: format!("About {word}"),
            body: None,
            url: format!("https://example.com/{i}"),
            published_at: day.map(|d| Utc.with_ymd_and_hms(2024, 5, d, 6, 0, 0).unwrap()),
            read_at: read.then(|| Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            fetched_at: None,
        })
        .collect()
}

fn tracker_for(items: &[Item]) -> ReadStateTracker {
    let mut tracker = ReadStateTracker::new();
    for item in items {
        tracker.seed(item);
    }
    tracker
}

fn ids(items: &[Item]) -> Vec<ItemId> {
    items.iter().map(|i| i.id).collect()
}

/// Check the tree is a forest whose flattening is consistent.
fn assert_well_formed(tree: &CategoryTree) -> Result<(), TestCaseError> {
    let flat = tree.flatten();
    prop_assert_eq!(flat.len(), tree.len());

    let mut position = HashMap::new();
    for (index, row) in flat.iter().enumerate() {
        prop_assert!(
            position.insert(row.category.id, (index, row.depth)).is_none(),
            "node listed twice"
        );
    }

    for row in &flat {
        let id = row.category.id;
        prop_assert!(!tree.is_descendant(id, id));
        match row.category.parent_id {
            None => prop_assert_eq!(row.depth, 0),
            Some(parent) => {
                let (parent_index, parent_depth) = position[&parent];
                let (index, depth) = position[&id];
                prop_assert!(parent_index < index, "parent listed after child");
                prop_assert_eq!(depth, parent_depth + 1);
                prop_assert!(tree.is_descendant(id, parent));
                prop_assert!(!tree.is_descendant(parent, id));
            }
        }
    }
    Ok(())
}

// =============================================================================
// TREE PROPERTIES
// =============================================================================

mod tree_properties {
    use super::*;

    proptest! {
        /// Whatever the backend sends, the built tree is a forest.
        #[test]
        fn built_tree_is_well_formed(records in records_strategy()) {
            let tree = CategoryTree::from_records(records.clone());
            prop_assert_eq!(tree.len(), records.len());
            assert_well_formed(&tree)?;
        }

        /// Moves either succeed or are rejected; the tree stays a forest.
        #[test]
        fn reparent_never_creates_cycle(
            records in records_strategy(),
            moves in moves_strategy(),
        ) {
            let mut tree = CategoryTree::from_records(records);
            for (id, parent) in moves {
                let id = CategoryId(id);
                let parent = parent.map(CategoryId);
                let allowed = tree.check_reparent(id, parent).is_ok();
                prop_assert_eq!(tree.reparent(id, parent).is_ok(), allowed);
                if allowed {
                    prop_assert_eq!(tree.get(id).unwrap().parent_id, parent);
                }
            }
            assert_well_formed(&tree)?;
        }

        /// Records round-trip through the tree without changing it.
        #[test]
        fn records_rebuild_same_tree(records in records_strategy()) {
            let tree = CategoryTree::from_records(records);
            let rebuilt = CategoryTree::from_records(tree.records());
            prop_assert_eq!(tree.records(), rebuilt.records());
            prop_assert!(rebuilt.anomalies().is_empty());
        }
    }
}

// =============================================================================
// FILTER PROPERTIES
// =============================================================================

mod filter_properties {
    use super::*;

    proptest! {
        #[test]
        fn filters_are_idempotent(
            specs in items_strategy(),
            day in 1u32..29,
            word in word_strategy(),
        ) {
            let items = build_items(&specs);
            let tracker = tracker_for(&items);
            let since = NaiveDate::from_ymd_opt(2024, 5, day);
            let spec = FilterSpec::new().text(&word);
            let query = spec.text_query();

            let once = apply_since(items.clone(), since);
            prop_assert_eq!(ids(&apply_since(once.clone(), since)), ids(&once));

            let once = apply_unread(items.clone(), true, &tracker);
            prop_assert_eq!(ids(&apply_unread(once.clone(), true, &tracker)), ids(&once));

            let once = apply_text(items.clone(), query);
            prop_assert_eq!(ids(&apply_text(once.clone(), query)), ids(&once));
        }

        #[test]
        fn filter_stages_commute(
            specs in items_strategy(),
            day in 1u32..29,
            word in word_strategy(),
        ) {
            let items = build_items(&specs);
            let tracker = tracker_for(&items);
            let since = NaiveDate::from_ymd_opt(2024, 5, day);
            let spec = FilterSpec::new().text(&word);

            let forward = apply_text(
                apply_unread(apply_since(items.clone(), since), true, &tracker),
                spec.text_query(),
            );
            let backward = apply_since(
                apply_unread(apply_text(items, spec.text_query()), true, &tracker),
                since,
            );
            prop_assert_eq!(ids(&forward), ids(&backward));
        }

        /// An active date filter never keeps an undated item, and keeps
        /// every dated item on or after the day.
        #[test]
        fn since_excludes_undated(specs in items_strategy(), day in 1u32..29) {
            let items = build_items(&specs);
            let kept = apply_since(items.clone(), NaiveDate::from_ymd_opt(2024, 5, day));

            prop_assert!(kept.iter().all(|i| i.published_at.is_some()));
            let expected = specs
                .iter()
                .filter(|(_, d, _)| d.is_some_and(|d| d >= day))
                .count();
            prop_assert_eq!(kept.len(), expected);
        }

        /// Items reached through their feed and through any number of
        /// assignment records show once, in store order.
        #[test]
        fn category_view_has_no_duplicates(
            specs in items_strategy(),
            assigned in prop::collection::vec((0i64..30, 1usize..4), 0..20),
        ) {
            let items = build_items(&specs);
            let mut catalog = Catalog::new();
            catalog.categories = CategoryTree::from_records(vec![CategoryRecord {
                id: CategoryId(1),
                name: "Saved".to_string(),
                parent_id: None,
            }]);
            catalog.feeds.insert(Feed {
                id: FeedId(0),
                name: "Bound".to_string(),
                url: "https://example.com/rss".to_string(),
                kind: SourceKind::Rss,
                config: SourceConfig::default(),
                category_id: Some(CategoryId(1)),
                last_fetched_at: None,
            });
            catalog.replace_items(items.clone());

            let mut next_id = 0;
            let mut expected: HashSet<ItemId> = items
                .iter()
                .filter(|i| i.feed_id == FeedId(0))
                .map(|i| i.id)
                .collect();
            for (item, copies) in assigned {
                for _ in 0..copies {
                    next_id += 1;
                    catalog.assignments.assign(Assignment {
                        id: AssignmentId(next_id),
                        category_id: CategoryId(1),
                        item_id: ItemId(item),
                    });
                }
                if (item as usize) < items.len() {
                    expected.insert(ItemId(item));
                }
            }

            let view = aggregate(&catalog, Selection::Category(CategoryId(1)), &FilterSpec::new());
            let listed = view.ids();
            let unique: HashSet<ItemId> = listed.iter().copied().collect();
            prop_assert_eq!(unique.len(), listed.len());
            prop_assert_eq!(unique, expected);

            let mut sorted = listed.clone();
            sorted.sort();
            prop_assert_eq!(listed, sorted, "store order is id order here");
        }
    }
}
