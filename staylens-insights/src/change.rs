//! Change detection between the live dataset and the processed-item ledger.

use staylens_core::{AnalysisBatch, ItemId, ItemKind, ListingId, StaylensResult};
use staylens_storage::{retry_once, InsightStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Ledger contents for one listing, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub reviews: Vec<ItemId>,
    pub messages: Vec<ItemId>,
}

impl LedgerSnapshot {
    /// Read the ledger of `listing_id`, retrying each read once.
    pub async fn load(store: &dyn InsightStore, listing_id: &ListingId) -> StaylensResult<Self> {
        let reviews = retry_once("processed_ids", || {
            store.processed_ids(listing_id, ItemKind::Review)
        })
        .await?;
        let messages = retry_once("processed_ids", || {
            store.processed_ids(listing_id, ItemKind::Message)
        })
        .await?;
        Ok(Self { reviews, messages })
    }

    pub fn of_kind(&self, kind: ItemKind) -> &[ItemId] {
        match kind {
            ItemKind::Review => &self.reviews,
            ItemKind::Message => &self.messages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty() && self.messages.is_empty()
    }

    pub fn contains(&self, kind: ItemKind, item_id: &str) -> bool {
        self.of_kind(kind).iter().any(|id| id == item_id)
    }
}

/// Difference between live and stored ids for one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindChange {
    pub kind: ItemKind,
    /// Live ids missing from the ledger.
    pub added: Vec<ItemId>,
    /// Ledger ids no longer live (deleted or aged out of the window).
    pub removed: Vec<ItemId>,
    /// Either side listed the same id twice, so the counts cannot be trusted.
    pub duplicate_rows: bool,
}

impl KindChange {
    pub fn is_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || self.duplicate_rows
    }
}

/// Per-kind comparison result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    pub reviews: KindChange,
    pub messages: KindChange,
}

impl ChangeReport {
    /// True if any kind changed.
    pub fn has_changed(&self) -> bool {
        self.reviews.is_changed() || self.messages.is_changed()
    }

    /// True if the ledger holds ids that are not live, or cannot be trusted.
    pub fn has_stale_entries(&self) -> bool {
        [&self.reviews, &self.messages]
            .iter()
            .any(|change| !change.removed.is_empty() || change.duplicate_rows)
    }

    pub fn of_kind(&self, kind: ItemKind) -> &KindChange {
        match kind {
            ItemKind::Review => &self.reviews,
            ItemKind::Message => &self.messages,
        }
    }
}

/// Decides whether a listing's cached analysis still reflects its dataset.
///
/// Comparison is by set equality per kind, so additions, deletions and items
/// ageing out of the recency window all count as change.
#[derive(Clone)]
pub struct ChangeDetector {
    store: Arc<dyn InsightStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn InsightStore>) -> Self {
        Self { store }
    }

    /// Compare the live snapshot with the listing's ledger.
    ///
    /// A ledger that cannot be read counts as changed.
    pub async fn has_changed(&self, listing_id: &ListingId, live: &AnalysisBatch) -> bool {
        match LedgerSnapshot::load(self.store.as_ref(), listing_id).await {
            Ok(ledger) => Self::compare(live, &ledger).has_changed(),
            Err(err) => {
                warn!(listing_id = %listing_id, error = %err, "ledger unreadable, treating as changed");
                true
            }
        }
    }

    /// Compare both kinds.
    pub fn compare(live: &AnalysisBatch, ledger: &LedgerSnapshot) -> ChangeReport {
        let kind_change = |kind| {
            let live_ids: Vec<&str> = live.of_kind(kind).iter().map(|i| i.item_id.as_str()).collect();
            let stored: Vec<&str> = ledger.of_kind(kind).iter().map(String::as_str).collect();
            Self::compare_kind(kind, &live_ids, &stored)
        };
        let report = ChangeReport {
            reviews: kind_change(ItemKind::Review),
            messages: kind_change(ItemKind::Message),
        };
        debug!(
            reviews_added = report.reviews.added.len(),
            reviews_removed = report.reviews.removed.len(),
            messages_added = report.messages.added.len(),
            messages_removed = report.messages.removed.len(),
            changed = report.has_changed(),
            "change detection"
        );
        report
    }

    /// Compare the id lists of one kind.
    pub fn compare_kind(kind: ItemKind, live_ids: &[&str], stored_ids: &[&str]) -> KindChange {
        let live: BTreeSet<&str> = live_ids.iter().copied().collect();
        let stored: BTreeSet<&str> = stored_ids.iter().copied().collect();

        KindChange {
            kind,
            added: live.difference(&stored).map(|id| id.to_string()).collect(),
            removed: stored.difference(&live).map(|id| id.to_string()).collect(),
            duplicate_rows: live.len() != live_ids.len() || stored.len() != stored_ids.len(),
        }
    }
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use staylens_core::FeedbackItem;
    use staylens_storage::MockStorage;

    fn live(reviews: &[&str], messages: &[&str]) -> AnalysisBatch {
        let now = Utc::now();
        AnalysisBatch::new(
            reviews
                .iter()
                .map(|id| FeedbackItem::review(*id, "L-1", "text", Some(4.0), now))
                .collect(),
            messages
                .iter()
                .map(|id| FeedbackItem::message(*id, "L-1", "text", None, now))
                .collect(),
        )
    }

    fn ledger(reviews: &[&str], messages: &[&str]) -> LedgerSnapshot {
        LedgerSnapshot {
            reviews: reviews.iter().map(|s| s.to_string()).collect(),
            messages: messages.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_equal_sets_are_unchanged() {
        let report = ChangeDetector::compare(&live(&["1", "2"], &["m"]), &ledger(&["2", "1"], &["m"]));
        assert!(!report.has_changed());
        assert!(!report.has_stale_entries());
    }

    #[test]
    fn test_addition_is_a_change() {
        let report = ChangeDetector::compare(&live(&["1", "2", "3"], &[]), &ledger(&["1", "2"], &[]));
        assert!(report.has_changed());
        assert_eq!(report.reviews.added, vec!["3".to_string()]);
        assert!(!report.has_stale_entries());
    }

    #[test]
    fn test_removal_is_a_change() {
        let report = ChangeDetector::compare(&live(&["1", "2"], &[]), &ledger(&["1", "2", "3"], &[]));
        assert!(report.has_changed());
        assert_eq!(report.reviews.removed, vec!["3".to_string()]);
        assert!(report.has_stale_entries());
    }

    #[test]
    fn test_kinds_are_compared_independently() {
        // Same id under the other kind does not count.
        let report = ChangeDetector::compare(&live(&["1"], &[]), &ledger(&[], &["1"]));
        assert!(report.reviews.is_changed());
        assert!(report.messages.is_changed());
    }

    #[test]
    fn test_duplicate_ledger_rows_count_as_change() {
        let change = ChangeDetector::compare_kind(ItemKind::Review, &["1", "2"], &["1", "2", "2"]);
        assert!(change.added.is_empty());
        assert!(change.removed.is_empty());
        assert!(change.duplicate_rows);
        assert!(change.is_changed());
    }

    #[tokio::test]
    async fn test_has_changed_reads_ledger() {
        let storage = Arc::new(MockStorage::new());
        let listing = ListingId::new("L-1");
        storage
            .mark_processed(&listing, ItemKind::Review, &["1".to_string()], Utc::now())
            .await
            .unwrap();

        let detector = ChangeDetector::new(storage.clone());
        assert!(!detector.has_changed(&listing, &live(&["1"], &[])).await);
        assert!(detector.has_changed(&listing, &live(&["1", "2"], &[])).await);
        assert!(detector.has_changed(&listing, &live(&[], &[])).await);
    }
}
