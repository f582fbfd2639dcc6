//! The session: the single actor that owns the catalog.
//!
//! Mutations validate locally, stamp the entity they touch, apply optimistic
//! state, call the backend and then settle the response under the version
//! rule (see [`version`]). Every change to the catalog is followed by the
//! matching [`Invalidation`] so cached views are recomputed on next read.
//!
//! Failed requests are surfaced to the caller as they are. Nothing is
//! retried and optimistic state is not rolled back; callers that want the
//! backend's view again call [`Session::sync`].

mod error;
mod events;
mod version;

pub use error::SessionError;
pub use events::{spawn_read, PendingMemberships, PendingRead, SessionEvent, Settled};
pub use version::{EntityKey, Stamp, VersionBook};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::backend::{
    Backend, BackendError, BackendResult, CategoryPatch, FetchOutcome, ItemQuery, Membership,
};
use crate::engine::{
    apply_text, apply_unread, category_rows, Aggregate, AggregateCache, CategoryRow, FilterSpec,
    Invalidation, Selection, DEFAULT_CACHE_CAPACITY,
};
use crate::model::{
    Assignment, Catalog, CategoryId, CategoryRecord, CategoryTree, Feed, FeedId, FeedRegistry,
    Item, ItemId, NewFeed, ValidationError,
};
use crate::util::normalize_name;

pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Number of cached aggregate results.
    pub cache_capacity: usize,
    /// Concurrent membership lookups during [`Session::sync`].
    pub fetch_concurrency: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

/// What a [`Session::sync`] loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub categories: usize,
    pub feeds: usize,
    pub items: usize,
    /// Items whose membership list was applied.
    pub memberships: usize,
    /// Snapshot entries dropped because a newer local change exists.
    pub stale: usize,
}

pub struct Session<B> {
    backend: Arc<B>,
    catalog: Catalog,
    cache: AggregateCache,
    versions: VersionBook,
    /// Newest unsettled read-state request per item.
    pending_reads: HashMap<ItemId, PendingRead>,
    fetch_concurrency: usize,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B, options: SessionOptions) -> Self {
        Self::with_shared(Arc::new(backend), options)
    }

    pub fn with_shared(backend: Arc<B>, options: SessionOptions) -> Self {
        Self {
            backend,
            catalog: Catalog::new(),
            cache: AggregateCache::new(options.cache_capacity),
            versions: VersionBook::new(),
            pending_reads: HashMap::new(),
            fetch_concurrency: options.fetch_concurrency.max(1),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &AggregateCache {
        &self.cache
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Items for a selection and filter, served from the cache when possible.
    ///
    /// Never waits on pending requests; it reflects optimistic state.
    pub fn view(&mut self, selection: Selection, filter: &FilterSpec) -> Arc<Aggregate> {
        self.cache.get_or_compute(&self.catalog, selection, filter)
    }

    /// Flattened category tree with per-category counts.
    pub fn category_rows(&self) -> Vec<CategoryRow> {
        category_rows(&self.catalog)
    }

    /// Ask the backend for a view instead of computing it locally.
    ///
    /// Returned items are merged into the catalog. The text filter is applied
    /// here since backends only filter structurally; the unread filter is
    /// re-applied against local read state so pending toggles are honored.
    ///
    /// A category or feed that is unknown locally, or that the backend
    /// reports as gone, yields an empty view.
    pub async fn fetch_view(
        &mut self,
        selection: Selection,
        filter: &FilterSpec,
    ) -> Result<Aggregate, SessionError> {
        if !self.selection_known(selection) {
            tracing::debug!(?selection, "Selection is unknown, empty view");
            return Ok(Aggregate::default());
        }

        let stamp = self.snapshot_stamp();
        let served = match self
            .backend
            .list_items(ItemQuery::for_view(selection, filter))
            .await
        {
            Ok(served) => served,
            Err(BackendError::NotFound(detail)) if selection != Selection::None => {
                tracing::debug!(?selection, %detail, "Backend no longer has the selection, empty view");
                return Ok(Aggregate::default());
            }
            Err(e) => return Err(e.into()),
        };
        let order: Vec<ItemId> = served.iter().map(|item| item.id).collect();
        self.merge_items(served, stamp);

        let items: Vec<Arc<Item>> = order
            .iter()
            .filter_map(|id| self.catalog.items.get(*id).cloned())
            .collect();
        let items = apply_text(items, filter.text_query());
        let items = apply_unread(items, filter.unread_only, &self.catalog.read_state);
        let unread = items
            .iter()
            .filter(|item| !self.catalog.read_state.is_read(item.id))
            .count();

        Ok(Aggregate {
            total: items.len(),
            unread,
            items,
        })
    }

    fn selection_known(&self, selection: Selection) -> bool {
        match selection {
            Selection::None => true,
            Selection::Category(id) => self.catalog.categories.contains(id),
            Selection::Feed(id) => self.catalog.feeds.contains(id),
        }
    }

    fn invalidate(&mut self, event: Invalidation) {
        self.cache.invalidate(event);
    }

    /// Drop every cached view.
    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Stamp for a list request about to be issued.
    pub fn snapshot_stamp(&mut self) -> Stamp {
        self.versions.issue()
    }

    /// Load everything from the backend.
    ///
    /// Entities changed locally after the sync was issued keep their local
    /// state. Membership lookups run with bounded concurrency; successful
    /// ones are applied even when others fail, and the first failure is
    /// returned.
    pub async fn sync(&mut self) -> Result<SyncSummary, SessionError> {
        let stamp = self.snapshot_stamp();
        let backend = Arc::clone(&self.backend);

        let (categories, feeds, items) = tokio::try_join!(
            backend.list_categories(),
            backend.list_feeds(),
            backend.list_items(ItemQuery::all()),
        )?;

        let mut summary = SyncSummary {
            categories: categories.len(),
            feeds: feeds.len(),
            items: items.len(),
            ..SyncSummary::default()
        };
        summary.stale += self.apply_category_snapshot(categories, stamp);
        summary.stale += self.apply_feed_snapshot(feeds, stamp);
        summary.stale += self.apply_item_snapshot(items, stamp);

        let lookups: Vec<PendingMemberships> = self
            .catalog
            .items
            .iter()
            .map(|item| PendingMemberships {
                item: item.id,
                stamp,
            })
            .collect();

        let events: Vec<SessionEvent> = stream::iter(lookups)
            .map(|pending| pending.run(&*backend))
            .buffer_unordered(self.fetch_concurrency)
            .collect()
            .await;

        let mut first_error = None;
        for event in events {
            match self.settle(event) {
                Ok(Settled::Applied) => summary.memberships += 1,
                Ok(Settled::Stale) => summary.stale += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Membership lookup failed during sync");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        for anomaly in self.catalog.categories.anomalies() {
            tracing::warn!(?anomaly, "Category data needs attention");
        }
        tracing::info!(
            categories = summary.categories,
            feeds = summary.feeds,
            items = summary.items,
            stale = summary.stale,
            "Sync complete"
        );
        Ok(summary)
    }

    /// Replace the category tree with a snapshot taken at `stamp`.
    /// Returns the number of snapshot entries superseded by local changes.
    pub fn apply_category_snapshot(&mut self, records: Vec<CategoryRecord>, stamp: Stamp) -> usize {
        let mut stale = 0;
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(records.len());

        for record in records {
            seen.insert(record.id);
            if self.versions.is_current(EntityKey::Category(record.id), stamp) {
                merged.push(record);
            } else {
                stale += 1;
                if let Some(local) = self.catalog.categories.get(record.id) {
                    merged.push(local.record());
                }
            }
        }
        // Created locally after the snapshot was issued.
        for local in self.catalog.categories.records() {
            if !seen.contains(&local.id)
                && !self.versions.is_current(EntityKey::Category(local.id), stamp)
            {
                merged.push(local);
            }
        }

        self.catalog.categories = CategoryTree::from_records(merged);
        self.invalidate(Invalidation::Categories);
        stale
    }

    /// Replace the feed registry with a snapshot taken at `stamp`.
    pub fn apply_feed_snapshot(&mut self, feeds: Vec<Feed>, stamp: Stamp) -> usize {
        let mut stale = 0;
        let mut seen = HashSet::new();
        let mut registry = FeedRegistry::new();

        for feed in feeds {
            seen.insert(feed.id);
            if self.versions.is_current(EntityKey::Feed(feed.id), stamp) {
                registry.insert(feed);
            } else {
                stale += 1;
                if let Some(local) = self.catalog.feeds.get(feed.id) {
                    registry.insert(local.clone());
                }
            }
        }
        for local in self.catalog.feeds.iter() {
            if !seen.contains(&local.id) && !self.versions.is_current(EntityKey::Feed(local.id), stamp) {
                registry.insert(local.clone());
            }
        }

        self.catalog.feeds = registry;
        self.invalidate(Invalidation::Feeds);
        stale
    }

    /// An item record from a snapshot may be applied only if nothing newer
    /// touched it locally and no read change for it is still in flight.
    fn item_snapshot_applies(&self, id: ItemId, stamp: Stamp) -> bool {
        self.versions.is_current(EntityKey::Item(id), stamp) && !self.pending_reads.contains_key(&id)
    }

    /// Replace all items with a snapshot taken at `stamp`, keeping local
    /// records and read state for items changed since.
    pub fn apply_item_snapshot(&mut self, items: Vec<Item>, stamp: Stamp) -> usize {
        let mut stale = 0;
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(items.len());
        let mut kept_state = Vec::new();

        for item in items {
            seen.insert(item.id);
            if self.item_snapshot_applies(item.id, stamp) {
                merged.push(item);
            } else {
                stale += 1;
                if let Some(local) = self.catalog.items.get(item.id) {
                    kept_state.push((item.id, self.catalog.read_state.read_at(item.id)));
                    merged.push(Item::clone(local));
                }
            }
        }
        for local in self.catalog.items.iter() {
            if !seen.contains(&local.id) && !self.item_snapshot_applies(local.id, stamp) {
                kept_state.push((local.id, self.catalog.read_state.read_at(local.id)));
                merged.push(Item::clone(local));
            }
        }

        self.catalog.replace_items(merged);
        for (id, read_at) in kept_state {
            self.catalog.set_read_at(id, read_at);
        }
        self.invalidate(Invalidation::Items);
        stale
    }

    /// Upsert items from a partial list taken at `stamp`.
    fn merge_items(&mut self, items: Vec<Item>, stamp: Stamp) -> usize {
        let mut stale = 0;
        for item in items {
            if self.item_snapshot_applies(item.id, stamp) {
                self.catalog.upsert_item(item);
            } else {
                tracing::debug!(item_id = %item.id, "Keeping local item over older list entry");
                stale += 1;
            }
        }
        self.invalidate(Invalidation::Items);
        stale
    }

    // ========================================================================
    // Settling
    // ========================================================================

    /// Apply a completed request if it is still current.
    ///
    /// Superseded responses, successful or not, are dropped and reported as
    /// [`Settled::Stale`].
    pub fn settle(&mut self, event: SessionEvent) -> Result<Settled, SessionError> {
        match event {
            SessionEvent::ReadState { pending, result } => self.settle_read(pending, result),
            SessionEvent::Memberships { pending, result } => {
                self.settle_memberships(pending, result)
            }
        }
    }

    fn settle_read(
        &mut self,
        pending: PendingRead,
        result: BackendResult<Item>,
    ) -> Result<Settled, SessionError> {
        if self
            .pending_reads
            .get(&pending.item)
            .is_some_and(|newest| newest.stamp == pending.stamp)
        {
            self.pending_reads.remove(&pending.item);
        }

        if !self
            .versions
            .is_current(EntityKey::Item(pending.item), pending.stamp)
        {
            tracing::debug!(
                item_id = %pending.item,
                stamp = pending.stamp.get(),
                read = pending.read,
                "Discarding superseded read-state response"
            );
            return Ok(Settled::Stale);
        }

        let item = result?;
        if item.id != pending.item {
            return Err(BackendError::Decode(format!(
                "expected item {}, backend returned item {}",
                pending.item, item.id
            ))
            .into());
        }
        self.catalog.upsert_item(item);
        self.invalidate(Invalidation::ReadState);
        Ok(Settled::Applied)
    }

    fn settle_memberships(
        &mut self,
        pending: PendingMemberships,
        result: BackendResult<Vec<Membership>>,
    ) -> Result<Settled, SessionError> {
        if !self
            .versions
            .is_current(EntityKey::Memberships(pending.item), pending.stamp)
        {
            tracing::debug!(
                item_id = %pending.item,
                stamp = pending.stamp.get(),
                "Discarding superseded membership list"
            );
            return Ok(Settled::Stale);
        }

        let memberships = result?;
        self.catalog.assignments.replace_item_memberships(
            pending.item,
            memberships
                .into_iter()
                .map(|m| (m.category_id, m.assignment_id)),
        );
        self.invalidate(Invalidation::Assignments);
        Ok(Settled::Applied)
    }

    // ========================================================================
    // Read State
    // ========================================================================

    fn begin_read_change(&mut self, item: ItemId, read: bool) -> Option<PendingRead> {
        if self
            .pending_reads
            .get(&item)
            .is_some_and(|newest| newest.read == read)
        {
            tracing::debug!(item_id = %item, read, "Same read-state change already pending");
            return None;
        }

        let stamp = self.versions.claim(EntityKey::Item(item));
        let change = if read {
            self.catalog.mark_read(item, Utc::now())
        } else {
            self.catalog.mark_unread(item)
        };
        if change.changed() {
            self.invalidate(Invalidation::ReadState);
        }

        let pending = PendingRead { item, read, stamp };
        self.pending_reads.insert(item, pending);
        Some(pending)
    }

    /// Mark read locally and return the request to send, or `None` when an
    /// identical change is already in flight.
    pub fn begin_mark_read(&mut self, item: ItemId) -> Option<PendingRead> {
        self.begin_read_change(item, true)
    }

    pub fn begin_mark_unread(&mut self, item: ItemId) -> Option<PendingRead> {
        self.begin_read_change(item, false)
    }

    async fn change_read(&mut self, item: ItemId, read: bool) -> Result<(), SessionError> {
        let Some(pending) = self.begin_read_change(item, read) else {
            return Ok(());
        };
        let backend = Arc::clone(&self.backend);
        let event = pending.run(&*backend).await;
        self.settle(event).map(|_| ())
    }

    pub async fn mark_read(&mut self, item: ItemId) -> Result<(), SessionError> {
        self.change_read(item, true).await
    }

    pub async fn mark_unread(&mut self, item: ItemId) -> Result<(), SessionError> {
        self.change_read(item, false).await
    }

    pub fn is_read(&self, item: ItemId) -> bool {
        self.catalog.read_state.is_read(item)
    }

    // ========================================================================
    // Categories
    // ========================================================================

    fn apply_category_record(&mut self, record: CategoryRecord, stamp: Stamp) {
        if self.versions.is_current(EntityKey::Category(record.id), stamp) {
            self.catalog.categories.upsert(record);
            self.invalidate(Invalidation::Categories);
        } else {
            tracing::debug!(category_id = %record.id, "Discarding superseded category response");
        }
    }

    pub async fn create_category(
        &mut self,
        name: &str,
        parent: Option<CategoryId>,
    ) -> Result<CategoryId, SessionError> {
        let name = normalize_name(name).ok_or(ValidationError::EmptyName)?;
        if let Some(parent) = parent {
            if !self.catalog.categories.contains(parent) {
                return Err(ValidationError::ParentNotFound(parent).into());
            }
        }

        let record = self.backend.create_category(name, parent).await?;
        let id = record.id;
        let stamp = self.versions.claim(EntityKey::Category(id));
        self.apply_category_record(record, stamp);
        tracing::info!(category_id = %id, "Category created");
        Ok(id)
    }

    pub async fn rename_category(&mut self, id: CategoryId, name: &str) -> Result<(), SessionError> {
        let name = normalize_name(name).ok_or(ValidationError::EmptyName)?;
        if !self.catalog.categories.contains(id) {
            return Err(ValidationError::UnknownCategory(id).into());
        }

        let stamp = self.versions.claim(EntityKey::Category(id));
        self.catalog.categories.rename(id, &name)?;
        self.invalidate(Invalidation::Categories);

        let record = self
            .backend
            .update_category(id, CategoryPatch::rename(name))
            .await?;
        self.apply_category_record(record, stamp);
        Ok(())
    }

    /// Move a category and its subtree. `None` moves it to the roots.
    pub async fn move_category(
        &mut self,
        id: CategoryId,
        parent: Option<CategoryId>,
    ) -> Result<(), SessionError> {
        self.catalog.categories.check_reparent(id, parent)?;

        let stamp = self.versions.claim(EntityKey::Category(id));
        self.catalog.categories.reparent(id, parent)?;
        self.invalidate(Invalidation::Categories);

        let record = self
            .backend
            .update_category(id, CategoryPatch::reparent(parent))
            .await?;
        self.apply_category_record(record, stamp);
        Ok(())
    }

    /// Delete a leaf category. Its feeds become uncategorized and its
    /// assignments are dropped; items are untouched.
    pub async fn delete_category(&mut self, id: CategoryId) -> Result<(), SessionError> {
        if !self.catalog.categories.contains(id) {
            return Err(ValidationError::UnknownCategory(id).into());
        }
        if self.catalog.categories.children_count(id) > 0 {
            return Err(ValidationError::HasChildren(id).into());
        }

        self.backend.delete_category(id).await?;
        self.versions.claim(EntityKey::Category(id));
        self.catalog.categories.remove(id)?;
        self.catalog.assignments.remove_category(id);
        let unbound = self.catalog.feeds.unbind_category(id);
        self.invalidate(Invalidation::Categories);
        self.invalidate(Invalidation::Feeds);
        tracing::info!(category_id = %id, feeds_unbound = unbound, "Category deleted");
        Ok(())
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    pub async fn create_feed(&mut self, request: NewFeed) -> Result<Feed, SessionError> {
        let request = FeedRegistry::validate(request)?;
        if let Some(category) = request.category_id {
            if !self.catalog.categories.contains(category) {
                return Err(ValidationError::UnknownCategory(category).into());
            }
        }

        let feed = self.backend.create_feed(request).await?;
        self.versions.claim(EntityKey::Feed(feed.id));
        self.catalog.feeds.insert(feed.clone());
        self.invalidate(Invalidation::Feeds);
        tracing::info!(feed_id = %feed.id, kind = %feed.kind, "Feed created");
        Ok(feed)
    }

    /// Delete a feed. Its items stay and show under an unknown feed.
    pub async fn delete_feed(&mut self, id: FeedId) -> Result<(), SessionError> {
        self.backend.delete_feed(id).await?;
        self.versions.claim(EntityKey::Feed(id));
        if self.catalog.feeds.delete(id).is_none() {
            tracing::debug!(feed_id = %id, "Deleted feed was not known locally");
        }
        self.invalidate(Invalidation::Feeds);
        Ok(())
    }

    /// Have the backend poll a feed, then load that feed's items.
    pub async fn fetch_feed(&mut self, id: FeedId) -> Result<FetchOutcome, SessionError> {
        let outcome = self.backend.trigger_fetch(id).await?;
        let stamp = self.snapshot_stamp();
        let items = self
            .backend
            .list_items(ItemQuery {
                feed_id: Some(id),
                ..ItemQuery::default()
            })
            .await?;
        self.merge_items(items, stamp);
        tracing::info!(feed_id = %id, new_items = outcome.new_items, "Feed fetched");
        Ok(outcome)
    }

    // ========================================================================
    // Assignments
    // ========================================================================

    /// File an item under a category in addition to wherever it already is.
    pub async fn assign(
        &mut self,
        category: CategoryId,
        item: ItemId,
    ) -> Result<Assignment, SessionError> {
        if !self.catalog.categories.contains(category) {
            return Err(ValidationError::UnknownCategory(category).into());
        }

        let stamp = self.versions.claim(EntityKey::Memberships(item));
        self.catalog.assignments.record_membership(item, category, None);
        self.invalidate(Invalidation::Assignments);

        let assignment = self.backend.assign_item_to_category(category, item).await?;
        if self
            .versions
            .is_current(EntityKey::Memberships(item), stamp)
        {
            self.catalog.assignments.assign(assignment);
            self.invalidate(Invalidation::Assignments);
        }
        Ok(assignment)
    }

    /// Remove an item from a category by deleting every known assignment
    /// record for the pair. Returns how many records were removed.
    ///
    /// Fails with [`SessionError::AssignmentIdUnknown`] when the pair is
    /// known only from a membership list without record ids.
    pub async fn unassign(
        &mut self,
        category: CategoryId,
        item: ItemId,
    ) -> Result<usize, SessionError> {
        let Some(ids) = self.catalog.assignments.assignment_ids_for(category, item) else {
            tracing::debug!(category_id = %category, item_id = %item, "Pair not assigned, nothing to remove");
            return Ok(0);
        };
        if ids.is_empty() {
            return Err(SessionError::AssignmentIdUnknown { category, item });
        }

        self.versions.claim(EntityKey::Memberships(item));
        self.catalog.assignments.remove_pair(category, item);
        self.invalidate(Invalidation::Assignments);

        for id in &ids {
            match self.backend.remove_assignment(*id).await {
                Ok(()) => {}
                Err(BackendError::NotFound(_)) => {
                    tracing::debug!(assignment_id = %id, "Assignment already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ids.len())
    }

    /// Request for an item's membership list, stamped now.
    pub fn begin_load_memberships(&mut self, item: ItemId) -> PendingMemberships {
        PendingMemberships {
            item,
            stamp: self.snapshot_stamp(),
        }
    }
}

impl<B: Backend + 'static> Session<B> {
    /// Start a read-state change on a background task. The result arrives on
    /// `tx` and must be passed to [`Session::settle`].
    pub fn spawn_read_change(
        &mut self,
        item: ItemId,
        read: bool,
        tx: &mpsc::Sender<SessionEvent>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let pending = self.begin_read_change(item, read)?;
        Some(spawn_read(Arc::clone(&self.backend), pending, tx.clone()))
    }
}
