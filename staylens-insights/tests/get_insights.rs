//! End-to-end behavior of `InsightService::get_insights`.

use async_trait::async_trait;
use staylens_core::{merge_analysis, merge_rating, Timestamp};
use staylens_insights::InsightService;
use staylens_llm::InsightAnalyzer;
use staylens_storage::{FeedbackSource, InsightStore, SqliteStore};
use staylens_test_utils::{
    assertions, fixtures, Analysis, FailingAnalysisProvider, FeedbackItem, InsightConfig, Issue,
    ItemKind, ListingId, MockAnalysisProvider, MockStorage, QualityRating,
    ScriptedAnalysisProvider, StaylensResult,
};
use std::sync::Arc;
use std::time::Duration;

const LISTING: &str = "L-100";

fn service_with(
    storage: &Arc<MockStorage>,
    provider: Arc<dyn staylens_test_utils::AnalysisProvider>,
    config: InsightConfig,
) -> InsightService {
    let analyzer = InsightAnalyzer::new(provider, config.analysis_timeout);
    InsightService::new(storage.clone(), storage.clone(), analyzer, config)
}

fn service(storage: &Arc<MockStorage>, provider: &Arc<ScriptedAnalysisProvider>) -> InsightService {
    service_with(storage, provider.clone(), fixtures::insight_config())
}

fn listing() -> ListingId {
    ListingId::new(LISTING)
}

#[tokio::test]
async fn test_first_call_analyzes_everything_and_marks_it() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1", "2"]).unwrap());
    storage
        .add_item(fixtures::message(LISTING, "m1", "Is parking free?", 2))
        .unwrap();
    let provider = Arc::new(ScriptedAnalysisProvider::default());

    let result = service(&storage, &provider)
        .get_insights(&listing(), false)
        .await
        .unwrap();

    assert_eq!(result.analysis, fixtures::good_analysis());
    assert!(result.last_analyzed.is_some());
    assert_eq!(result.total_reviews_analyzed, 2);
    assert_eq!(result.total_messages_analyzed, 1);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(provider.last_ids(ItemKind::Review), vec!["1", "2"]);
    assert_eq!(provider.last_ids(ItemKind::Message), vec!["m1"]);
    assert_eq!(storage.processed_count(&listing()).unwrap(), 3);
    assert_eq!(storage.commit_count(), 1);
}

#[tokio::test]
async fn test_marking_is_idempotent() {
    let storage = Arc::new(MockStorage::new());
    let ids = vec!["1".to_string(), "2".to_string()];
    let now = chrono::Utc::now();

    assert_eq!(
        storage.mark_processed(&listing(), ItemKind::Review, &ids, now).await.unwrap(),
        2
    );
    assert_eq!(
        storage.mark_processed(&listing(), ItemKind::Review, &ids, now).await.unwrap(),
        0
    );
    assert_eq!(storage.processed_count(&listing()).unwrap(), 2);
}

#[tokio::test]
async fn test_unchanged_dataset_is_served_from_cache() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1", "2"]).unwrap());
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    let service = service(&storage, &provider);

    let first = service.get_insights(&listing(), false).await.unwrap();
    let second = service.get_insights(&listing(), false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(storage.commit_count(), 1);
    assert_eq!(storage.processed_count(&listing()).unwrap(), 2);
}

#[tokio::test]
async fn test_removed_item_triggers_full_reanalysis() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1", "2", "3"]).unwrap());
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    let service = service(&storage, &provider);

    service.get_insights(&listing(), false).await.unwrap();
    assert!(storage.remove_item(ItemKind::Review, "3").unwrap());

    let result = service.get_insights(&listing(), false).await.unwrap();

    assert_eq!(provider.call_count(), 2);
    assert_eq!(provider.last_ids(ItemKind::Review), vec!["1", "2"]);
    assert_eq!(result.total_reviews_analyzed, 2);
    assert_eq!(storage.processed_count(&listing()).unwrap(), 2);
}

#[tokio::test]
async fn test_added_item_invalidates_cached_record() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1", "2"]).unwrap());
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    provider
        .push_ok(fixtures::good_analysis())
        .push_ok(fixtures::poor_analysis());
    let service = service(&storage, &provider);

    service.get_insights(&listing(), false).await.unwrap();
    storage
        .add_item(fixtures::review(LISTING, "3", "Dirty bathroom", 2.0, 0))
        .unwrap();
    let result = service.get_insights(&listing(), false).await.unwrap();

    // The cached record is discarded, so every live item is analyzed again
    // and the previous Good rating does not carry over.
    assert_eq!(provider.last_ids(ItemKind::Review), vec!["1", "2", "3"]);
    assert_eq!(result.analysis, fixtures::poor_analysis());
    assert_eq!(result.total_reviews_analyzed, 3);
    assert_eq!(storage.processed_count(&listing()).unwrap(), 3);
}

#[tokio::test]
async fn test_item_ageing_out_of_window_is_a_change() {
    let storage = Arc::new(MockStorage::new());
    storage.add_item(fixtures::message(LISTING, "m-old", "Hi", 10)).unwrap();
    storage.add_item(fixtures::message(LISTING, "m-new", "Thanks", 1)).unwrap();
    let provider = Arc::new(ScriptedAnalysisProvider::default());

    let wide = service_with(&storage, provider.clone(), fixtures::insight_config());
    let first = wide.get_insights(&listing(), false).await.unwrap();
    assert_eq!(first.total_messages_analyzed, 2);

    let narrow = service_with(
        &storage,
        provider.clone(),
        fixtures::insight_config().with_message_window(Duration::from_secs(5 * 24 * 3600)),
    );
    let second = narrow.get_insights(&listing(), false).await.unwrap();

    assert_eq!(provider.call_count(), 2);
    assert_eq!(provider.last_ids(ItemKind::Message), vec!["m-new"]);
    assert_eq!(second.total_messages_analyzed, 1);
}

#[tokio::test]
async fn test_recency_windows_and_caps_apply() {
    let storage = Arc::new(MockStorage::new());
    storage.add_item(fixtures::review(LISTING, "ancient", "Old news", 3.0, 400)).unwrap();
    for i in 0..5 {
        storage
            .add_item(fixtures::review(LISTING, &format!("r{}", i), "Fine", 4.0, i))
            .unwrap();
    }
    storage.add_item(fixtures::message(LISTING, "m-stale", "Hello", 45)).unwrap();
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    let service = service_with(
        &storage,
        provider.clone(),
        fixtures::insight_config().with_max_reviews(3),
    );

    let result = service.get_insights(&listing(), false).await.unwrap();

    // Newest three reviews, no messages.
    assert_eq!(provider.last_ids(ItemKind::Review), vec!["r0", "r1", "r2"]);
    assert_eq!(result.total_reviews_analyzed, 3);
    assert_eq!(result.total_messages_analyzed, 0);
}

#[tokio::test]
async fn test_force_refresh_clears_state() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1", "2"]).unwrap());
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    provider
        .push_ok(fixtures::good_analysis())
        .push_ok(fixtures::poor_analysis());
    let service = service(&storage, &provider);

    service.get_insights(&listing(), false).await.unwrap();
    let forced = service.get_insights(&listing(), true).await.unwrap();

    assert_eq!(provider.call_count(), 2);
    assert_eq!(provider.last_ids(ItemKind::Review), vec!["1", "2"]);
    // No merge with the discarded record.
    assert_eq!(forced.analysis, fixtures::poor_analysis());
    assert_eq!(storage.processed_count(&listing()).unwrap(), 2);
}

#[tokio::test]
async fn test_force_refresh_on_emptied_dataset_drops_record() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1"]).unwrap());
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    let service = service(&storage, &provider);

    service.get_insights(&listing(), false).await.unwrap();
    storage.remove_item(ItemKind::Review, "1").unwrap();
    let result = service.get_insights(&listing(), true).await.unwrap();

    assertions::assert_placeholder(&result);
    assert_eq!(storage.processed_count(&listing()).unwrap(), 0);
    assert!(storage.insight_get(&listing()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_dataset_writes_nothing() {
    let storage = Arc::new(MockStorage::new());
    let provider = Arc::new(ScriptedAnalysisProvider::default());

    let result = service(&storage, &provider)
        .get_insights(&listing(), false)
        .await
        .unwrap();

    assertions::assert_placeholder(&result);
    assert_eq!(result.total_reviews_analyzed, 0);
    assert_eq!(provider.call_count(), 0);
    assert_eq!(storage.commit_count(), 0);
    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.processed_items, 0);
    assert_eq!(stats.listing_insights, 0);
}

#[tokio::test]
async fn test_partial_ledger_without_record_sends_only_new_items() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1", "2"]).unwrap());
    storage
        .mark_processed(&listing(), ItemKind::Review, &["1".to_string()], chrono::Utc::now())
        .await
        .unwrap();
    let provider = Arc::new(ScriptedAnalysisProvider::default());

    let result = service(&storage, &provider)
        .get_insights(&listing(), false)
        .await
        .unwrap();

    assert_eq!(provider.call_count(), 1);
    assert_eq!(provider.last_ids(ItemKind::Review), vec!["2"]);
    assert_eq!(result.analysis, fixtures::good_analysis());
    assert_eq!(result.total_reviews_analyzed, 2);
    assert_eq!(storage.processed_count(&listing()).unwrap(), 2);
    assert_eq!(storage.commit_count(), 1);
    assert!(storage.insight_get(&listing()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_complete_ledger_without_record_serves_placeholder() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1", "2"]).unwrap());
    storage
        .mark_processed(
            &listing(),
            ItemKind::Review,
            &["1".to_string(), "2".to_string()],
            chrono::Utc::now(),
        )
        .await
        .unwrap();
    let provider = Arc::new(ScriptedAnalysisProvider::default());

    let result = service(&storage, &provider)
        .get_insights(&listing(), false)
        .await
        .unwrap();

    assertions::assert_placeholder(&result);
    assert_eq!(result.total_reviews_analyzed, 2);
    assert_eq!(provider.call_count(), 0);
    assert_eq!(storage.commit_count(), 0);
    assert_eq!(storage.processed_count(&listing()).unwrap(), 2);
}

#[tokio::test]
async fn test_analysis_failure_degrades_and_is_cached() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1", "2"]).unwrap());
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    provider.push_err(staylens_core::AnalysisError::ExternalService {
        provider: "scripted".to_string(),
        message: "503 Service Unavailable".to_string(),
    });
    let service = service(&storage, &provider);

    let degraded = service.get_insights(&listing(), false).await.unwrap();
    assertions::assert_degraded(&degraded);
    assert_eq!(degraded.total_reviews_analyzed, 2);

    // Cached: no second call to the failing service.
    let again = service.get_insights(&listing(), false).await.unwrap();
    assertions::assert_degraded(&again);
    assert_eq!(provider.call_count(), 1);

    // Forced refresh retries and recovers.
    let recovered = service.get_insights(&listing(), true).await.unwrap();
    assert!(!recovered.is_degraded());
    assert_eq!(recovered.analysis, fixtures::good_analysis());
}

#[tokio::test]
async fn test_malformed_response_degrades() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1"]).unwrap());
    let service = service_with(
        &storage,
        Arc::new(FailingAnalysisProvider::malformed()),
        fixtures::insight_config(),
    );

    let result = service.get_insights(&listing(), false).await.unwrap();
    assertions::assert_degraded(&result);
}

#[tokio::test]
async fn test_commit_failure_is_retried_once() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1"]).unwrap());
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    let service = service(&storage, &provider);

    storage.fail_next_commits(1);
    let result = service.get_insights(&listing(), false).await;
    assert!(result.is_ok());
    assert_eq!(storage.commit_count(), 1);

    storage.fail_next_commits(2);
    let result = service.get_insights(&listing(), true).await;
    assertions::assert_storage_error(&result);
    // The failed forced refresh left the earlier state untouched.
    assert_eq!(storage.commit_count(), 1);
    assert_eq!(storage.processed_count(&listing()).unwrap(), 1);
}

/// Source that leaks an item of another listing into every answer.
struct LeakySource {
    inner: Arc<MockStorage>,
}

#[async_trait]
impl FeedbackSource for LeakySource {
    async fn list_items(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
        since: Timestamp,
        limit: usize,
    ) -> StaylensResult<Vec<FeedbackItem>> {
        let mut items = self.inner.list_items(listing_id, kind, since, limit).await?;
        if kind == ItemKind::Review {
            items.push(fixtures::review("L-other", "foreign", "Not ours", 1.0, 0));
        }
        Ok(items)
    }
}

#[tokio::test]
async fn test_items_of_other_listings_are_dropped() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1"]).unwrap());
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    let analyzer = InsightAnalyzer::new(provider.clone(), Duration::from_secs(5));
    let service = InsightService::new(
        Arc::new(LeakySource {
            inner: storage.clone(),
        }),
        storage.clone(),
        analyzer,
        fixtures::insight_config(),
    );

    let result = service.get_insights(&listing(), false).await.unwrap();

    assert_eq!(provider.last_ids(ItemKind::Review), vec!["1"]);
    assert_eq!(result.total_reviews_analyzed, 1);
    assert_eq!(storage.processed_count(&listing()).unwrap(), 1);
}

#[tokio::test]
async fn test_has_changed_and_invalidate() {
    let storage = Arc::new(fixtures::storage_with_reviews(LISTING, &["1"]).unwrap());
    let provider = Arc::new(ScriptedAnalysisProvider::default());
    let service = service(&storage, &provider);

    assert!(service.has_changed(&listing()).await.unwrap());
    service.get_insights(&listing(), false).await.unwrap();
    assert!(!service.has_changed(&listing()).await.unwrap());

    let outcome = service.invalidate(&listing()).await.unwrap();
    assert_eq!(outcome.processed_removed, 1);
    assert!(outcome.record_removed);
    assert!(service.has_changed(&listing()).await.unwrap());
    assert_eq!(service.stats().await.unwrap().listing_insights, 0);
}

#[tokio::test]
async fn test_mock_provider_titles_are_unique() {
    let storage = Arc::new(MockStorage::new());
    storage
        .add_item(fixtures::review(LISTING, "1", "Noisy street and noise at night", 2.0, 1))
        .unwrap();
    storage
        .add_item(fixtures::message(LISTING, "m1", "It is so noisy", 1))
        .unwrap();
    let service = service_with(
        &storage,
        Arc::new(MockAnalysisProvider::new()),
        fixtures::insight_config(),
    );

    let result = service.get_insights(&listing(), false).await.unwrap();
    assertions::assert_unique_titles(&result.analysis);
    assert_eq!(result.analysis.issues.len(), 1);
    assert_eq!(result.analysis.quality_rating, Some(QualityRating::Poor));
}

#[test]
fn test_merge_keeps_worse_rating_and_unique_titles() {
    assert_eq!(
        merge_rating(Some(QualityRating::Good), Some(QualityRating::Poor)),
        Some(QualityRating::Poor)
    );
    assert_eq!(
        merge_rating(Some(QualityRating::Poor), Some(QualityRating::Fair)),
        Some(QualityRating::Poor)
    );

    let previous = Analysis {
        quality_rating: Some(QualityRating::Good),
        issues: vec![Issue::new("Noise", "Street noise"), Issue::new("Wi-Fi", "Slow")],
        action_items: vec!["Add curtains".to_string()],
    };
    let fresh = Analysis {
        quality_rating: Some(QualityRating::Fair),
        issues: vec![Issue::new("Noise", "Loud neighbours"), Issue::new("Parking", "Tight")],
        action_items: vec!["Add curtains".to_string(), "Mark parking bay".to_string()],
    };
    let merged = merge_analysis(Some(&previous), fresh);

    assertions::assert_unique_titles(&merged);
    assert_eq!(merged.quality_rating, Some(QualityRating::Good));
    assert_eq!(merged.issues[0], Issue::new("Noise", "Loud neighbours"));
    assert_eq!(merged.issues.len(), 3);
    assert_eq!(merged.action_items.len(), 2);
}

#[tokio::test]
async fn test_sqlite_backend_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("staylens.db")).unwrap());
    store.init_schema().await.unwrap();
    store
        .upsert_item(&fixtures::review(LISTING, "1", "Spotless", 5.0, 1))
        .unwrap();
    store
        .upsert_item(&fixtures::review(LISTING, "2", "Great host", 4.0, 3))
        .unwrap();

    let provider = Arc::new(ScriptedAnalysisProvider::default());
    let analyzer = InsightAnalyzer::new(provider.clone(), Duration::from_secs(5));
    let service = InsightService::new(store.clone(), store.clone(), analyzer, fixtures::insight_config());

    let first = service.get_insights(&listing(), false).await.unwrap();
    let second = service.get_insights(&listing(), false).await.unwrap();
    assert_eq!(first.analysis, second.analysis);
    assert_eq!(provider.call_count(), 1);

    store.delete_item(ItemKind::Review, "2").unwrap();
    let third = service.get_insights(&listing(), false).await.unwrap();
    assert_eq!(provider.call_count(), 2);
    assert_eq!(provider.last_ids(ItemKind::Review), vec!["1"]);
    assert_eq!(third.total_reviews_analyzed, 1);

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.processed_items, 1);
    assert_eq!(stats.listing_insights, 1);
}
