//! Many-to-many index between items and categories.
//!
//! An item can be filed under any number of categories independently of its
//! feed's category. The backend may hold several assignment records for the
//! same (category, item) pair; the index keeps every record id it learns
//! about but views always report the pair once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::ids::{AssignmentId, CategoryId, ItemId};

/// One item-to-category assignment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub category_id: CategoryId,
    pub item_id: ItemId,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentIndex {
    /// item -> category -> known record ids (may be empty when the backend
    /// reported the membership without ids).
    by_item: HashMap<ItemId, BTreeMap<CategoryId, BTreeSet<AssignmentId>>>,
    by_category: HashMap<CategoryId, BTreeSet<ItemId>>,
    records: HashMap<AssignmentId, Assignment>,
}

impl AssignmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an assignment record. Returns true when the pair was not
    /// assigned before.
    pub fn assign(&mut self, assignment: Assignment) -> bool {
        let fresh = !self.is_assigned(assignment.category_id, assignment.item_id);
        let ids = self.link(assignment.category_id, assignment.item_id);
        ids.insert(assignment.id);
        if ids.len() > 1 {
            tracing::warn!(
                category_id = %assignment.category_id,
                item_id = %assignment.item_id,
                records = ids.len(),
                "Duplicate assignment records for the same pair"
            );
        }
        self.records.insert(assignment.id, assignment);
        fresh
    }

    /// Record that `item` is filed under `category`, with the record id when
    /// the backend provided one.
    pub fn record_membership(
        &mut self,
        item: ItemId,
        category: CategoryId,
        assignment_id: Option<AssignmentId>,
    ) {
        match assignment_id {
            Some(id) => {
                self.assign(Assignment {
                    id,
                    category_id: category,
                    item_id: item,
                });
            }
            None => {
                self.link(category, item);
            }
        }
    }

    /// Replace everything known about `item` with a fresh membership list.
    pub fn replace_item_memberships(
        &mut self,
        item: ItemId,
        memberships: impl IntoIterator<Item = (CategoryId, Option<AssignmentId>)>,
    ) {
        self.forget_item(item);
        for (category, assignment_id) in memberships {
            self.record_membership(item, category, assignment_id);
        }
    }

    fn link(&mut self, category: CategoryId, item: ItemId) -> &mut BTreeSet<AssignmentId> {
        self.by_category.entry(category).or_default().insert(item);
        self.by_item
            .entry(item)
            .or_default()
            .entry(category)
            .or_default()
    }

    fn unlink(&mut self, category: CategoryId, item: ItemId) -> BTreeSet<AssignmentId> {
        let ids = match self.by_item.get_mut(&item) {
            Some(categories) => {
                let ids = categories.remove(&category).unwrap_or_default();
                if categories.is_empty() {
                    self.by_item.remove(&item);
                }
                ids
            }
            None => BTreeSet::new(),
        };
        if let Some(items) = self.by_category.get_mut(&category) {
            items.remove(&item);
            if items.is_empty() {
                self.by_category.remove(&category);
            }
        }
        for id in &ids {
            self.records.remove(id);
        }
        ids
    }

    fn forget_item(&mut self, item: ItemId) {
        let categories: Vec<CategoryId> = self
            .by_item
            .get(&item)
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default();
        for category in categories {
            self.unlink(category, item);
        }
    }

    pub fn is_assigned(&self, category: CategoryId, item: ItemId) -> bool {
        self.by_item
            .get(&item)
            .is_some_and(|c| c.contains_key(&category))
    }

    /// Distinct categories an item is filed under.
    pub fn categories_of(&self, item: ItemId) -> BTreeSet<CategoryId> {
        self.by_item
            .get(&item)
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Distinct items filed under a category.
    pub fn items_of(&self, category: CategoryId) -> BTreeSet<ItemId> {
        self.by_category.get(&category).cloned().unwrap_or_default()
    }

    /// Borrowing form of [`Self::items_of`].
    pub fn items_in(&self, category: CategoryId) -> impl Iterator<Item = ItemId> + '_ {
        self.by_category
            .get(&category)
            .into_iter()
            .flat_map(|items| items.iter().copied())
    }

    /// Known record ids for a pair.
    ///
    /// `None` when the pair is not assigned at all; an empty list when it is
    /// assigned but no record id has been reported.
    pub fn assignment_ids_for(&self, category: CategoryId, item: ItemId) -> Option<Vec<AssignmentId>> {
        self.by_item
            .get(&item)
            .and_then(|c| c.get(&category))
            .map(|ids| ids.iter().copied().collect())
    }

    /// Drop a pair and every record behind it. Returns the dropped ids.
    pub fn remove_pair(&mut self, category: CategoryId, item: ItemId) -> Vec<AssignmentId> {
        self.unlink(category, item).into_iter().collect()
    }

    /// Drop one record. The pair stays assigned while other records for it
    /// remain.
    pub fn remove_assignment(&mut self, id: AssignmentId) -> Option<Assignment> {
        let record = self.records.remove(&id)?;
        let now_empty = match self
            .by_item
            .get_mut(&record.item_id)
            .and_then(|c| c.get_mut(&record.category_id))
        {
            Some(ids) => {
                ids.remove(&id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.unlink(record.category_id, record.item_id);
        }
        Some(record)
    }

    /// Drop every assignment to a category, e.g. after it was deleted.
    pub fn remove_category(&mut self, category: CategoryId) {
        let items: Vec<ItemId> = self.items_in(category).collect();
        for item in items {
            self.unlink(category, item);
        }
    }

    pub fn get(&self, id: AssignmentId) -> Option<&Assignment> {
        self.records.get(&id)
    }

    pub fn clear(&mut self) {
        self.by_item.clear();
        self.by_category.clear();
        self.records.clear();
    }
}
