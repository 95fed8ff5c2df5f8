//! Staylens Storage - Ledger, Insight Cache and Feedback Readers
//!
//! Defines the persistence seams of the insight core:
//!
//! - [`FeedbackSource`] reads the host's live reviews and messages.
//! - [`InsightStore`] owns the processed-item ledger and the cached insight
//!   record of every listing.
//!
//! Backends: [`MockStorage`] (in-memory), [`SqliteStore`] and
//! [`PostgresStore`]. [`open_store`] picks one from a [`PersistenceBackend`].

pub mod postgres;
pub mod sqlite;

pub use postgres::{PostgresStore, PostgresStoreError};
pub use sqlite::{SqliteStore, SqliteStoreError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use staylens_core::{
    FeedbackItem, InsightRecord, ItemId, ItemKind, ListingId, PersistenceBackend,
    StaylensError, StaylensResult, StorageError, Timestamp,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, warn};

// ============================================================================
// WRITE / STATS TYPES
// ============================================================================

/// Every durable mutation of one `get_insights` call.
///
/// Applied by [`InsightStore::commit`] in a single transaction, in this
/// order: invalidation, record replacement, ledger inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightWrite {
    pub listing_id: ListingId,
    /// Clear the listing's ledger and record first.
    pub invalidate: bool,
    /// Replaces the cached record when present.
    pub record: Option<InsightRecord>,
    /// Ledger entries to insert (duplicates are ignored).
    pub processed: Vec<(ItemKind, ItemId)>,
    pub analyzed_at: Timestamp,
}

impl InsightWrite {
    pub fn new(listing_id: ListingId, analyzed_at: Timestamp) -> Self {
        Self {
            listing_id,
            invalidate: false,
            record: None,
            processed: Vec::new(),
            analyzed_at,
        }
    }

    pub fn with_invalidation(mut self, invalidate: bool) -> Self {
        self.invalidate = invalidate;
        self
    }

    pub fn with_record(mut self, record: InsightRecord) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_processed(mut self, processed: Vec<(ItemKind, ItemId)>) -> Self {
        self.processed = processed;
        self
    }

    /// True when committing this write would change nothing.
    pub fn is_noop(&self) -> bool {
        !self.invalidate && self.record.is_none() && self.processed.is_empty()
    }

    /// Ledger ids of one kind, in insertion order.
    pub fn processed_of(&self, kind: ItemKind) -> Vec<ItemId> {
        self.processed
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }
}

/// Outcome of an explicit invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub processed_removed: u64,
    pub record_removed: bool,
}

/// Row counts of the two tables the insight core owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub processed_items: u64,
    pub listing_insights: u64,
}

// ============================================================================
// TRAITS
// ============================================================================

/// Read access to the host's feedback dataset.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    /// Items of `kind` for `listing_id` created at or after `since`,
    /// newest first, at most `limit` of them.
    async fn list_items(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
        since: Timestamp,
        limit: usize,
    ) -> StaylensResult<Vec<FeedbackItem>>;
}

/// Durable ledger plus insight cache.
#[async_trait]
pub trait InsightStore: Send + Sync {
    /// Create tables if missing. Safe to call on every start-up.
    async fn init_schema(&self) -> StaylensResult<()>;

    /// Ledger ids for one listing and kind, one entry per stored row.
    async fn processed_ids(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
    ) -> StaylensResult<Vec<ItemId>>;

    /// Cached insight record, if any.
    async fn insight_get(&self, listing_id: &ListingId) -> StaylensResult<Option<InsightRecord>>;

    /// Insert ledger entries, ignoring ones already present. Returns the
    /// number of rows actually inserted.
    async fn mark_processed(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
        item_ids: &[ItemId],
        analyzed_at: Timestamp,
    ) -> StaylensResult<u64>;

    /// Delete the listing's ledger entries and cached record.
    async fn invalidate(&self, listing_id: &ListingId) -> StaylensResult<Invalidation>;

    /// Apply `write` atomically: either all of it lands or none of it does.
    async fn commit(&self, write: &InsightWrite) -> StaylensResult<()>;

    async fn stats(&self) -> StaylensResult<StoreStats>;
}

// ============================================================================
// RETRY
// ============================================================================

/// Run a persistence call, retrying exactly once on a retryable error.
///
/// The second failure is returned to the caller unchanged.
pub async fn retry_once<T, F, Fut>(operation: &str, mut call: F) -> StaylensResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StaylensResult<T>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(err) if err.is_retryable() => {
            warn!(operation, error = %err, "persistence call failed, retrying once");
            call().await.map_err(|err| {
                error!(operation, error = %err, "persistence call failed after retry");
                err
            })
        }
        Err(err) => Err(err),
    }
}

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// A store and the feedback reader living in the same database.
#[derive(Clone)]
pub struct OpenedStore {
    pub store: Arc<dyn InsightStore>,
    pub source: Arc<dyn FeedbackSource>,
}

/// Build the store for `backend`. Does not touch the schema; call
/// [`InsightStore::init_schema`] once afterwards.
pub fn open_store(backend: &PersistenceBackend) -> StaylensResult<OpenedStore> {
    match backend {
        PersistenceBackend::Memory => {
            let storage = Arc::new(MockStorage::new());
            Ok(OpenedStore {
                store: storage.clone(),
                source: storage,
            })
        }
        PersistenceBackend::Sqlite { path } => {
            let storage = Arc::new(SqliteStore::open(path)?);
            Ok(OpenedStore {
                store: storage.clone(),
                source: storage,
            })
        }
        PersistenceBackend::Postgres(config) => {
            let storage = Arc::new(PostgresStore::from_config(config)?);
            Ok(OpenedStore {
                store: storage.clone(),
                source: storage,
            })
        }
    }
}

// ============================================================================
// MOCK STORAGE
// ============================================================================

type Ledger = HashMap<ListingId, BTreeMap<(ItemKind, ItemId), Timestamp>>;

fn poisoned<T>(_: T) -> StaylensError {
    StaylensError::Storage(StorageError::LockPoisoned)
}

/// In-memory storage for tests and the `memory` backend.
///
/// Serves both as the feedback dataset and as the insight store. Writes can
/// be made to fail on demand to exercise retry paths.
#[derive(Debug, Default)]
pub struct MockStorage {
    items: Arc<RwLock<Vec<FeedbackItem>>>,
    processed: Arc<RwLock<Ledger>>,
    insights: Arc<RwLock<HashMap<ListingId, InsightRecord>>>,
    failing_commits: AtomicU32,
    commits: AtomicU64,
}

impl MockStorage {
    /// Create an empty mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a live feedback item.
    pub fn add_item(&self, item: FeedbackItem) -> StaylensResult<()> {
        self.items.write().map_err(poisoned)?.push(item);
        Ok(())
    }

    /// Remove a live feedback item. Returns true if it existed.
    pub fn remove_item(&self, kind: ItemKind, item_id: &str) -> StaylensResult<bool> {
        let mut items = self.items.write().map_err(poisoned)?;
        let before = items.len();
        items.retain(|item| !(item.kind == kind && item.item_id == item_id));
        Ok(items.len() != before)
    }

    /// Make the next `n` commits fail with a transaction error.
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Ledger size for one listing.
    pub fn processed_count(&self, listing_id: &ListingId) -> StaylensResult<usize> {
        let processed = self.processed.read().map_err(poisoned)?;
        Ok(processed.get(listing_id).map_or(0, BTreeMap::len))
    }

    /// Drop everything: items, ledger and records.
    pub fn clear(&self) -> StaylensResult<()> {
        self.items.write().map_err(poisoned)?.clear();
        self.processed.write().map_err(poisoned)?.clear();
        self.insights.write().map_err(poisoned)?.clear();
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl FeedbackSource for MockStorage {
    async fn list_items(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
        since: Timestamp,
        limit: usize,
    ) -> StaylensResult<Vec<FeedbackItem>> {
        let items = self.items.read().map_err(poisoned)?;
        let mut matching: Vec<FeedbackItem> = items
            .iter()
            .filter(|item| {
                &item.listing_id == listing_id && item.kind == kind && item.created_at >= since
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

#[async_trait]
impl InsightStore for MockStorage {
    async fn init_schema(&self) -> StaylensResult<()> {
        Ok(())
    }

    async fn processed_ids(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
    ) -> StaylensResult<Vec<ItemId>> {
        let processed = self.processed.read().map_err(poisoned)?;
        Ok(processed
            .get(listing_id)
            .map(|ledger| {
                ledger
                    .keys()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, id)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insight_get(&self, listing_id: &ListingId) -> StaylensResult<Option<InsightRecord>> {
        let insights = self.insights.read().map_err(poisoned)?;
        Ok(insights.get(listing_id).cloned())
    }

    async fn mark_processed(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
        item_ids: &[ItemId],
        analyzed_at: Timestamp,
    ) -> StaylensResult<u64> {
        let mut processed = self.processed.write().map_err(poisoned)?;
        let ledger = processed.entry(listing_id.clone()).or_default();
        let mut inserted = 0;
        for item_id in item_ids {
            if let std::collections::btree_map::Entry::Vacant(slot) =
                ledger.entry((kind, item_id.clone()))
            {
                slot.insert(analyzed_at);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn invalidate(&self, listing_id: &ListingId) -> StaylensResult<Invalidation> {
        let mut processed = self.processed.write().map_err(poisoned)?;
        let mut insights = self.insights.write().map_err(poisoned)?;
        Ok(Invalidation {
            processed_removed: processed.remove(listing_id).map_or(0, |l| l.len() as u64),
            record_removed: insights.remove(listing_id).is_some(),
        })
    }

    async fn commit(&self, write: &InsightWrite) -> StaylensResult<()> {
        if self.take_injected_failure() {
            return Err(StaylensError::Storage(StorageError::TransactionFailed {
                reason: "injected commit failure".to_string(),
            }));
        }

        let mut processed = self.processed.write().map_err(poisoned)?;
        let mut insights = self.insights.write().map_err(poisoned)?;

        if write.invalidate {
            processed.remove(&write.listing_id);
            insights.remove(&write.listing_id);
        }
        if let Some(record) = &write.record {
            insights.insert(write.listing_id.clone(), record.clone());
        }
        if !write.processed.is_empty() {
            let ledger = processed.entry(write.listing_id.clone()).or_default();
            for (kind, item_id) in &write.processed {
                ledger
                    .entry((*kind, item_id.clone()))
                    .or_insert(write.analyzed_at);
            }
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stats(&self) -> StaylensResult<StoreStats> {
        let processed = self.processed.read().map_err(poisoned)?;
        let insights = self.insights.read().map_err(poisoned)?;
        Ok(StoreStats {
            processed_items: processed.values().map(|l| l.len() as u64).sum(),
            listing_insights: insights.len() as u64,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
