//! Staylens Test Utilities
//!
//! Shared test infrastructure for the Staylens workspace:
//! - Scripted and failing analysis providers
//! - Proptest generators for feedback items and analyses
//! - Fixtures for common listing scenarios
//! - Assertions for Staylens-specific results

// Re-export in-memory backends from their source crates
pub use staylens_llm::MockAnalysisProvider;
pub use staylens_storage::MockStorage;

pub use staylens_core::{
    Analysis, AnalysisBatch, AnalysisError, FeedbackItem, InsightConfig, InsightResult, Issue,
    ItemKind, ListingId, QualityRating, StaylensError, StaylensResult, StorageError, Timestamp,
};
pub use staylens_llm::AnalysisProvider;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// ANALYSIS PROVIDERS
// ============================================================================

/// Provider that replays queued responses and records every batch it sees.
///
/// Once the queue is drained it answers with the fallback analysis.
#[derive(Debug)]
pub struct ScriptedAnalysisProvider {
    script: Mutex<VecDeque<StaylensResult<Analysis>>>,
    fallback: Analysis,
    batches: Mutex<Vec<AnalysisBatch>>,
}

impl ScriptedAnalysisProvider {
    pub fn new(fallback: Analysis) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response.
    pub fn push_ok(&self, analysis: Analysis) -> &Self {
        lock(&self.script).push_back(Ok(analysis));
        self
    }

    /// Queue a failure.
    pub fn push_err(&self, error: impl Into<StaylensError>) -> &Self {
        lock(&self.script).push_back(Err(error.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.batches).len()
    }

    /// Every batch received, oldest first.
    pub fn batches(&self) -> Vec<AnalysisBatch> {
        lock(&self.batches).clone()
    }

    pub fn last_batch(&self) -> Option<AnalysisBatch> {
        lock(&self.batches).last().cloned()
    }

    /// Ids of the last batch, per kind, sorted.
    pub fn last_ids(&self, kind: ItemKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .last_batch()
            .map(|batch| batch.of_kind(kind).iter().map(|i| i.item_id.clone()).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl Default for ScriptedAnalysisProvider {
    fn default() -> Self {
        Self::new(fixtures::good_analysis())
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedAnalysisProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, _listing_id: &ListingId, batch: &AnalysisBatch) -> StaylensResult<Analysis> {
        lock(&self.batches).push(batch.clone());
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Provider that always fails with the same error.
#[derive(Debug, Clone)]
pub struct FailingAnalysisProvider {
    error: AnalysisError,
}

impl FailingAnalysisProvider {
    /// Fails like an unreachable service.
    pub fn unavailable() -> Self {
        Self {
            error: AnalysisError::ExternalService {
                provider: "failing".to_string(),
                message: "connection refused".to_string(),
            },
        }
    }

    /// Fails like a service that answered with garbage.
    pub fn malformed() -> Self {
        Self {
            error: AnalysisError::MalformedResponse {
                provider: "failing".to_string(),
                reason: "expected a JSON object".to_string(),
            },
        }
    }
}

#[async_trait]
impl AnalysisProvider for FailingAnalysisProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn analyze(&self, _: &ListingId, _: &AnalysisBatch) -> StaylensResult<Analysis> {
        Err(self.error.clone().into())
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Staylens types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a listing id.
    pub fn arb_listing_id() -> impl Strategy<Value = ListingId> {
        "L-[0-9]{1,4}".prop_map(ListingId::new)
    }

    /// Generate an item id.
    pub fn arb_item_id() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}"
    }

    /// Generate a Timestamp within the last 30 days.
    pub fn arb_recent_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..30 * 24 * 3600).prop_map(|secs| Utc::now() - Duration::seconds(secs))
    }

    /// Generate a QualityRating.
    pub fn arb_quality_rating() -> impl Strategy<Value = QualityRating> {
        prop_oneof![
            Just(QualityRating::Poor),
            Just(QualityRating::Fair),
            Just(QualityRating::Good),
        ]
    }

    /// Generate an Issue from a small title vocabulary so titles collide.
    pub fn arb_issue() -> impl Strategy<Value = Issue> {
        (
            prop::sample::select(vec!["Noise", "Cleanliness", "Wi-Fi", "Parking", "Check-in"]),
            "[a-z ]{0,24}",
        )
            .prop_map(|(title, details)| Issue::new(title, details))
    }

    /// Generate an Analysis.
    pub fn arb_analysis() -> impl Strategy<Value = Analysis> {
        (
            prop::option::of(arb_quality_rating()),
            prop::collection::vec(arb_issue(), 0..6),
            prop::collection::vec("[a-z]{1,10}", 0..6),
        )
            .prop_map(|(quality_rating, issues, action_items)| Analysis {
                quality_rating,
                issues,
                action_items,
            })
    }

    /// Generate a review for `listing_id` inside the default review window.
    pub fn arb_review(listing_id: ListingId) -> impl Strategy<Value = FeedbackItem> {
        (
            arb_item_id(),
            "[a-zA-Z ]{1,60}",
            prop::option::of(1u8..=5),
            arb_recent_timestamp(),
        )
            .prop_map(move |(id, content, stars, created_at)| {
                FeedbackItem::review(id, listing_id.clone(), content, stars.map(f32::from), created_at)
            })
    }

    /// Generate a message for `listing_id` inside the default message window.
    pub fn arb_message(listing_id: ListingId) -> impl Strategy<Value = FeedbackItem> {
        (arb_item_id(), "[a-zA-Z ]{1,60}", (0i64..20 * 24 * 3600))
            .prop_map(move |(id, content, age)| {
                FeedbackItem::message(
                    id,
                    listing_id.clone(),
                    content,
                    Some("guest".to_string()),
                    Utc::now() - Duration::seconds(age),
                )
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// Default insight config with a short analysis timeout.
    pub fn insight_config() -> InsightConfig {
        InsightConfig::new().with_analysis_timeout(std::time::Duration::from_secs(5))
    }

    /// A review created `days_ago` days ago.
    pub fn review(listing: &str, id: &str, content: &str, stars: f32, days_ago: i64) -> FeedbackItem {
        FeedbackItem::review(id, listing, content, Some(stars), Utc::now() - Duration::days(days_ago))
    }

    /// A guest message created `days_ago` days ago.
    pub fn message(listing: &str, id: &str, content: &str, days_ago: i64) -> FeedbackItem {
        FeedbackItem::message(
            id,
            listing,
            content,
            Some("guest".to_string()),
            Utc::now() - Duration::days(days_ago),
        )
    }

    /// Storage seeded with reviews `ids` for `listing`, one day old.
    pub fn storage_with_reviews(listing: &str, ids: &[&str]) -> StaylensResult<MockStorage> {
        let storage = MockStorage::new();
        for id in ids {
            storage.add_item(review(listing, id, "Lovely place", 5.0, 1))?;
        }
        Ok(storage)
    }

    pub fn good_analysis() -> Analysis {
        Analysis {
            quality_rating: Some(QualityRating::Good),
            issues: vec![Issue::new("Wi-Fi", "Occasionally slow")],
            action_items: vec!["Restart the router weekly".to_string()],
        }
    }

    pub fn poor_analysis() -> Analysis {
        Analysis {
            quality_rating: Some(QualityRating::Poor),
            issues: vec![Issue::new("Cleanliness", "Hair in the shower")],
            action_items: vec!["Schedule a deep clean".to_string()],
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for Staylens results.

    use super::*;

    /// Assert that `result` is the degraded placeholder.
    #[track_caller]
    pub fn assert_degraded(result: &InsightResult) {
        assert!(result.is_degraded(), "Expected degraded result, got: {:?}", result);
        assert_eq!(result.analysis.quality_rating, Some(QualityRating::Fair));
        assert_eq!(result.analysis.issues.len(), 1);
        assert_eq!(result.analysis.action_items.len(), 1);
    }

    /// Assert that `result` is the empty placeholder.
    #[track_caller]
    pub fn assert_placeholder(result: &InsightResult) {
        assert!(result.analysis.is_empty(), "Expected empty placeholder, got: {:?}", result);
        assert!(result.last_analyzed.is_none());
    }

    /// Assert that issue titles are unique.
    #[track_caller]
    pub fn assert_unique_titles(analysis: &Analysis) {
        let mut titles: Vec<&str> = analysis.issues.iter().map(|i| i.title.as_str()).collect();
        let total = titles.len();
        titles.sort_unstable();
        titles.dedup();
        assert_eq!(titles.len(), total, "Duplicate issue titles in {:?}", analysis.issues);
    }

    /// Assert that a result is a storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &StaylensResult<T>) {
        match result {
            Err(StaylensError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
