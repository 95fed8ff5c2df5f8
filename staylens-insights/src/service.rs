//! The `get_insights` orchestrator.

use crate::change::{ChangeDetector, LedgerSnapshot};
use chrono::Utc;
use staylens_core::{
    merge_analysis, AnalysisBatch, FeedbackItem, InsightConfig, InsightRecord, InsightResult,
    ItemCounts, ItemId, ItemKind, ListingId, StaylensResult, Timestamp, ValidationError,
};
use staylens_llm::InsightAnalyzer;
use staylens_storage::{
    retry_once, FeedbackSource, InsightStore, InsightWrite, Invalidation, StoreStats,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Serves per-listing insights, re-analyzing only when the dataset changed
/// and sending only unseen items to the analysis service.
///
/// Concurrent calls for the same listing are not serialized: both may
/// analyze, and the last commit wins. Calls for different listings are
/// independent.
#[derive(Clone)]
pub struct InsightService {
    source: Arc<dyn FeedbackSource>,
    store: Arc<dyn InsightStore>,
    analyzer: InsightAnalyzer,
    config: InsightConfig,
}

impl InsightService {
    pub fn new(
        source: Arc<dyn FeedbackSource>,
        store: Arc<dyn InsightStore>,
        analyzer: InsightAnalyzer,
        config: InsightConfig,
    ) -> Self {
        Self {
            source,
            store,
            analyzer,
            config,
        }
    }

    pub fn config(&self) -> &InsightConfig {
        &self.config
    }

    /// A detector bound to this service's store.
    pub fn change_detector(&self) -> ChangeDetector {
        ChangeDetector::new(self.store.clone())
    }

    /// Return the insights for `listing_id`, refreshing them if needed.
    ///
    /// Analysis failures never fail this call; they yield a degraded
    /// result which is cached like any other. Persistence failures are
    /// retried once and then returned.
    #[tracing::instrument(skip_all, fields(listing_id = %listing_id, force_refresh = force_refresh))]
    pub async fn get_insights(
        &self,
        listing_id: &ListingId,
        force_refresh: bool,
    ) -> StaylensResult<InsightResult> {
        let now = Utc::now();
        let live = self.fetch_live(listing_id, now).await?;
        let counts = live_counts(&live);

        let (ledger, cached) = if force_refresh {
            info!("forced refresh, discarding ledger and cached record");
            (LedgerSnapshot::default(), None)
        } else {
            let ledger = LedgerSnapshot::load(self.store.as_ref(), listing_id).await?;
            let cached =
                retry_once("insight_get", || self.store.insight_get(listing_id)).await?;
            (ledger, cached)
        };

        let report = ChangeDetector::compare(&live, &ledger);
        if let Some(record) = &cached {
            if !report.has_changed() {
                debug!("dataset unchanged, serving cached insights");
                return Ok(record.to_result(counts));
            }
        }

        // A change against a cached record, or ledger rows that no longer
        // match the dataset, restart the listing from scratch.
        let invalidate = force_refresh || cached.is_some() || report.has_stale_entries();
        let (ledger, previous) = if invalidate {
            if !force_refresh {
                info!(
                    had_record = cached.is_some(),
                    stale_ledger = report.has_stale_entries(),
                    "dataset changed, invalidating cached insights"
                );
            }
            (LedgerSnapshot::default(), None)
        } else {
            (ledger, cached)
        };

        // A surviving cached record implies an unchanged dataset, which
        // returned above, so reaching here with nothing unseen means the
        // ledger already covers every live item and no record exists.
        let unseen = unseen_items(&live, &ledger);
        let mut write = InsightWrite::new(listing_id.clone(), now).with_invalidation(invalidate);

        let result = if !unseen.is_empty() {
            info!(
                unseen_reviews = unseen.reviews.len(),
                unseen_messages = unseen.messages.len(),
                provider = self.analyzer.provider_name(),
                "analyzing unseen items"
            );
            let fresh = self.analyzer.analyze(listing_id, &unseen).await;
            let merged = merge_analysis(previous.as_ref().map(|r| &r.analysis), fresh);
            let record = InsightRecord::new(listing_id.clone(), merged, counts, now);
            let result = record.to_result(counts);
            write = write.with_record(record).with_processed(processed_entries(&live));
            result
        } else {
            debug!("nothing to analyze");
            InsightResult::placeholder(counts)
        };

        if !write.is_noop() {
            retry_once("commit", || self.store.commit(&write)).await?;
        }
        Ok(result)
    }

    /// Whether the live dataset of `listing_id` differs from its ledger.
    /// Read-only.
    pub async fn has_changed(&self, listing_id: &ListingId) -> StaylensResult<bool> {
        let live = self.fetch_live(listing_id, Utc::now()).await?;
        Ok(self.change_detector().has_changed(listing_id, &live).await)
    }

    /// Drop the ledger and cached record of `listing_id`.
    pub async fn invalidate(&self, listing_id: &ListingId) -> StaylensResult<Invalidation> {
        let outcome = retry_once("invalidate", || self.store.invalidate(listing_id)).await?;
        info!(
            listing_id = %listing_id,
            processed_removed = outcome.processed_removed,
            record_removed = outcome.record_removed,
            "insights invalidated"
        );
        Ok(outcome)
    }

    /// Create the store's tables if missing.
    pub async fn init_schema(&self) -> StaylensResult<()> {
        retry_once("init_schema", || self.store.init_schema()).await
    }

    pub async fn stats(&self) -> StaylensResult<StoreStats> {
        retry_once("stats", || self.store.stats()).await
    }

    /// Live items of both kinds within their recency windows.
    async fn fetch_live(&self, listing_id: &ListingId, now: Timestamp) -> StaylensResult<AnalysisBatch> {
        let mut batch = AnalysisBatch::default();
        for kind in ItemKind::ALL {
            let since = self.config.cutoff_for(kind, now);
            let limit = self.config.limit_for(kind);
            let items = retry_once("list_items", || {
                self.source.list_items(listing_id, kind, since, limit)
            })
            .await?;
            let items = sanitize_items(listing_id, kind, items);
            match kind {
                ItemKind::Review => batch.reviews = items,
                ItemKind::Message => batch.messages = items,
            }
        }
        Ok(batch)
    }
}

impl std::fmt::Debug for InsightService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightService")
            .field("analyzer", &self.analyzer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Check that `item` belongs to `listing_id` and has an id.
pub fn validate_item(listing_id: &ListingId, item: &FeedbackItem) -> Result<(), ValidationError> {
    if item.item_id.trim().is_empty() {
        return Err(ValidationError::EmptyItemId {
            kind: item.kind,
            listing_id: listing_id.clone(),
        });
    }
    if &item.listing_id != listing_id {
        return Err(ValidationError::ListingMismatch {
            kind: item.kind,
            item_id: item.item_id.clone(),
            expected: listing_id.clone(),
            found: item.listing_id.clone(),
        });
    }
    Ok(())
}

/// Drop invalid items and repeated ids, keeping the first occurrence.
fn sanitize_items(listing_id: &ListingId, kind: ItemKind, items: Vec<FeedbackItem>) -> Vec<FeedbackItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            if item.kind != kind {
                warn!(item_id = %item.item_id, expected = %kind, found = %item.kind, "dropping item of wrong kind");
                return false;
            }
            if let Err(err) = validate_item(listing_id, item) {
                warn!(error = %err, "dropping invalid feedback item");
                return false;
            }
            if !seen.insert(item.item_id.clone()) {
                debug!(item_id = %item.item_id, kind = %kind, "dropping repeated item id");
                return false;
            }
            true
        })
        .collect()
}

fn live_counts(live: &AnalysisBatch) -> ItemCounts {
    ItemCounts {
        reviews: live.reviews.len() as u64,
        messages: live.messages.len() as u64,
    }
}

/// Live items whose ids are not in the ledger.
fn unseen_items(live: &AnalysisBatch, ledger: &LedgerSnapshot) -> AnalysisBatch {
    let pick = |kind: ItemKind| -> Vec<FeedbackItem> {
        live.of_kind(kind)
            .iter()
            .filter(|item| !ledger.contains(kind, &item.item_id))
            .cloned()
            .collect()
    };
    AnalysisBatch::new(pick(ItemKind::Review), pick(ItemKind::Message))
}

/// Ledger entries for every live item.
fn processed_entries(live: &AnalysisBatch) -> Vec<(ItemKind, ItemId)> {
    ItemKind::ALL
        .iter()
        .flat_map(|kind| {
            live.of_kind(*kind)
                .iter()
                .map(move |item| (*kind, item.item_id.clone()))
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
