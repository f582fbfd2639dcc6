//! Category hierarchy held as an arena.
//!
//! Nodes live in a flat map keyed by id; parent links are plain ids and each
//! node keeps an ordered list of child ids. Nothing owns anything else, so
//! reparenting is a pair of vector edits and lookups are O(1).
//!
//! # Invariants
//! - The effective parent relation is a forest: a node never appears among
//!   its own ancestors.
//! - `roots` plus every node's `children` list each node exactly once.
//! - Children are kept in insertion (creation) order.
//!
//! Data received from a backend is not trusted to satisfy these. A node whose
//! parent is missing, or whose parent chain loops back to it, is attached as a
//! root and recorded in [`CategoryTree::anomalies`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::CategoryId;
use super::validation::ValidationError;
use crate::util::normalize_name;

/// Flat category row as exchanged with a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: CategoryId,
    pub name: String,
    pub parent_id: Option<CategoryId>,
}

/// A node in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    /// Effective parent. `None` for roots, including detached nodes.
    pub parent_id: Option<CategoryId>,
    children: Vec<CategoryId>,
}

impl Category {
    /// Child ids in creation order.
    pub fn children(&self) -> &[CategoryId] {
        &self.children
    }

    pub fn record(&self) -> CategoryRecord {
        CategoryRecord {
            id: self.id,
            name: self.name.clone(),
            parent_id: self.parent_id,
        }
    }
}

/// One row of a flattened tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatCategory<'a> {
    pub category: &'a Category,
    /// 0 for roots.
    pub depth: usize,
}

/// A data-integrity problem found while building or updating the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeAnomaly {
    /// The declared parent is not in the tree; the node is shown as a root.
    DanglingParent {
        category: CategoryId,
        parent: CategoryId,
    },
    /// The declared parent chain leads back to the node; shown as a root.
    Cycle {
        category: CategoryId,
        parent: CategoryId,
    },
}

#[derive(Debug, Clone, Default)]
pub struct CategoryTree {
    nodes: HashMap<CategoryId, Category>,
    roots: Vec<CategoryId>,
    anomalies: Vec<TreeAnomaly>,
}

impl CategoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from flat records, in the order given.
    ///
    /// Records may arrive in any order; a child listed before its parent is
    /// still attached to it. Duplicate ids keep the last record.
    pub fn from_records(records: impl IntoIterator<Item = CategoryRecord>) -> Self {
        let mut tree = Self::new();
        let mut order = Vec::new();

        for record in records {
            if !tree.nodes.contains_key(&record.id) {
                order.push(record.id);
            }
            tree.nodes.insert(
                record.id,
                Category {
                    id: record.id,
                    name: record.name,
                    parent_id: record.parent_id,
                    children: Vec::new(),
                },
            );
        }

        for id in order {
            let declared = tree.nodes[&id].parent_id;
            tree.attach(id, declared);
        }

        for anomaly in &tree.anomalies {
            tracing::warn!(?anomaly, "Category tree integrity problem, showing node as root");
        }

        tree
    }

    /// Link `id` under `declared` (or the roots), detaching it to the roots
    /// when the parent is unknown or would close a cycle.
    fn attach(&mut self, id: CategoryId, declared: Option<CategoryId>) {
        let effective = match declared {
            None => None,
            Some(parent) if !self.nodes.contains_key(&parent) => {
                self.anomalies.push(TreeAnomaly::DanglingParent {
                    category: id,
                    parent,
                });
                None
            }
            Some(parent) if parent == id || self.is_descendant(parent, id) => {
                self.anomalies.push(TreeAnomaly::Cycle {
                    category: id,
                    parent,
                });
                None
            }
            Some(parent) => Some(parent),
        };

        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_id = effective;
        }
        match effective {
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
    }

    fn detach(&mut self, id: CategoryId) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent_id);
        match parent {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
    }

    /// Insert a new node or refresh an existing one from a backend record.
    ///
    /// A new node becomes the last child of its parent, and nodes that were
    /// shown as roots because it was missing move under it. An existing node
    /// keeps its children; if its parent changed it is moved.
    pub fn upsert(&mut self, record: CategoryRecord) {
        if let Some(existing) = self.nodes.get_mut(&record.id) {
            existing.name = record.name;
            if existing.parent_id == record.parent_id {
                return;
            }
            self.forget_anomalies(record.id);
            self.detach(record.id);
            self.attach(record.id, record.parent_id);
            return;
        }

        self.nodes.insert(
            record.id,
            Category {
                id: record.id,
                name: record.name,
                parent_id: record.parent_id,
                children: Vec::new(),
            },
        );
        self.attach(record.id, record.parent_id);
        self.adopt_dangling(record.id);
    }

    /// Move nodes whose declared parent was missing under `parent`, now that
    /// it exists.
    fn adopt_dangling(&mut self, parent: CategoryId) {
        let orphans: Vec<CategoryId> = self
            .anomalies
            .iter()
            .filter_map(|a| match a {
                TreeAnomaly::DanglingParent { category, parent: p } if *p == parent => {
                    Some(*category)
                }
                _ => None,
            })
            .collect();

        for orphan in orphans {
            self.forget_anomalies(orphan);
            self.detach(orphan);
            self.attach(orphan, Some(parent));
            tracing::debug!(category_id = %orphan, parent_id = %parent, "Reattached category to its parent");
        }
    }

    fn forget_anomalies(&mut self, id: CategoryId) {
        self.anomalies.retain(|a| match a {
            TreeAnomaly::DanglingParent { category, .. } | TreeAnomaly::Cycle { category, .. } => {
                *category != id
            }
        });
    }

    /// Remove a leaf category.
    pub fn remove(&mut self, id: CategoryId) -> Result<Category, ValidationError> {
        let node = self
            .nodes
            .get(&id)
            .ok_or(ValidationError::UnknownCategory(id))?;
        if !node.children.is_empty() {
            return Err(ValidationError::HasChildren(id));
        }
        self.detach(id);
        self.forget_anomalies(id);
        self.nodes
            .remove(&id)
            .ok_or(ValidationError::UnknownCategory(id))
    }

    /// Rename a category, applying the usual name sanitization.
    pub fn rename(&mut self, id: CategoryId, name: &str) -> Result<(), ValidationError> {
        let clean = normalize_name(name).ok_or(ValidationError::EmptyName)?;
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(ValidationError::UnknownCategory(id))?;
        node.name = clean;
        Ok(())
    }

    /// Check that moving `id` under `new_parent` keeps the tree a forest.
    pub fn check_reparent(
        &self,
        id: CategoryId,
        new_parent: Option<CategoryId>,
    ) -> Result<(), ValidationError> {
        if !self.nodes.contains_key(&id) {
            return Err(ValidationError::UnknownCategory(id));
        }
        let Some(parent) = new_parent else {
            return Ok(());
        };
        if !self.nodes.contains_key(&parent) {
            return Err(ValidationError::ParentNotFound(parent));
        }
        if parent == id || self.is_descendant(parent, id) {
            return Err(ValidationError::CycleDetected {
                category: id,
                parent,
            });
        }
        Ok(())
    }

    /// Move a category (with its subtree) under a new parent, or to the roots.
    ///
    /// The node is appended after the new parent's existing children.
    pub fn reparent(
        &mut self,
        id: CategoryId,
        new_parent: Option<CategoryId>,
    ) -> Result<(), ValidationError> {
        self.check_reparent(id, new_parent)?;
        if self.nodes[&id].parent_id == new_parent {
            return Ok(());
        }
        self.detach(id);
        self.attach(id, new_parent);
        Ok(())
    }

    pub fn get(&self, id: CategoryId) -> Option<&Category> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: CategoryId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[CategoryId] {
        &self.roots
    }

    /// Structural count of direct children. Unknown ids count zero.
    pub fn children_count(&self, id: CategoryId) -> usize {
        self.nodes.get(&id).map_or(0, |n| n.children.len())
    }

    /// True when `candidate` sits strictly below `ancestor`.
    ///
    /// Walks the candidate's parent chain. The walk is capped at the node
    /// count so corrupted links cannot loop forever.
    pub fn is_descendant(&self, candidate: CategoryId, ancestor: CategoryId) -> bool {
        let mut current = self.nodes.get(&candidate).and_then(|n| n.parent_id);
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent_id);
        }
        false
    }

    /// Names from the root down to `id`, for breadcrumb display.
    pub fn path(&self, id: CategoryId) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = self.nodes.get(&id);
        while let Some(node) = current {
            names.push(node.name.as_str());
            if names.len() > self.nodes.len() {
                break;
            }
            current = node.parent_id.and_then(|p| self.nodes.get(&p));
        }
        names.reverse();
        names
    }

    /// Depth-first pre-order listing with depths.
    ///
    /// A node is always emitted before its children, children in stored
    /// order, every node exactly once.
    pub fn flatten(&self) -> Vec<FlatCategory<'_>> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(CategoryId, usize)> =
            self.roots.iter().rev().map(|id| (*id, 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            let Some(category) = self.nodes.get(&id) else {
                continue;
            };
            out.push(FlatCategory { category, depth });
            for child in category.children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }

        out
    }

    /// Records in flatten order; parents always precede children.
    pub fn records(&self) -> Vec<CategoryRecord> {
        self.flatten().iter().map(|f| f.category.record()).collect()
    }

    pub fn anomalies(&self) -> &[TreeAnomaly] {
        &self.anomalies
    }
}
