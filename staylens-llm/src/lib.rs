//! Staylens LLM - Analysis Providers
//!
//! The external analysis service is the only network-bound step of the
//! insight pipeline. This crate hides it behind [`AnalysisProvider`] and
//! wraps every provider in [`InsightAnalyzer`], which applies the timeout
//! and turns any failure into the degraded placeholder analysis.
//!
//! Providers are constructed explicitly (see [`build_provider`]) and handed
//! to the insight service; there is no process-wide client.

pub mod normalize;
pub mod prompt;
pub mod providers;

pub use normalize::{parse_analysis, strip_code_fence};
pub use prompt::{build_prompt, Prompt};
pub use providers::{
    AnthropicAnalysisProvider, AnthropicClient, OpenAIAnalysisProvider, OpenAIClient, RateLimiter,
};

use async_trait::async_trait;
use staylens_core::{
    Analysis, AnalysisBatch, AnalysisError, ConfigError, Issue, ItemKind, ListingId,
    ProviderConfig, ProviderKind, QualityRating, StaylensError, StaylensResult,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Turns a batch of feedback items into a structured analysis.
///
/// Implementations return errors as-is; degradation is the job of
/// [`InsightAnalyzer`].
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Short provider name used in logs and error messages.
    fn name(&self) -> &str;

    async fn analyze(&self, listing_id: &ListingId, batch: &AnalysisBatch) -> StaylensResult<Analysis>;
}

/// Build the provider selected by `config`.
pub fn build_provider(
    config: &ProviderConfig,
    timeout: Duration,
) -> StaylensResult<Arc<dyn AnalysisProvider>> {
    let api_key = || {
        config
            .api_key
            .clone()
            .ok_or_else(|| {
                StaylensError::Config(ConfigError::MissingRequired {
                    field: "STAYLENS_API_KEY".to_string(),
                })
            })
    };

    Ok(match config.kind {
        ProviderKind::OpenAi => {
            let mut client = OpenAIClient::new(api_key()?, config.requests_per_minute)
                .with_timeout(timeout);
            if let Some(url) = &config.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(OpenAIAnalysisProvider::new(client, &config.model))
        }
        ProviderKind::Anthropic => {
            let mut client = AnthropicClient::new(api_key()?, config.requests_per_minute)
                .with_timeout(timeout);
            if let Some(url) = &config.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(AnthropicAnalysisProvider::new(client, &config.model))
        }
        ProviderKind::Mock => Arc::new(MockAnalysisProvider::new()),
    })
}

// ============================================================================
// ANALYZER (timeout + degradation)
// ============================================================================

/// Wraps a provider with a timeout and graceful degradation.
#[derive(Clone)]
pub struct InsightAnalyzer {
    provider: Arc<dyn AnalysisProvider>,
    timeout: Duration,
}

impl InsightAnalyzer {
    pub fn new(provider: Arc<dyn AnalysisProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Call the provider, bounded by the configured timeout.
    pub async fn try_analyze(
        &self,
        listing_id: &ListingId,
        batch: &AnalysisBatch,
    ) -> StaylensResult<Analysis> {
        match tokio::time::timeout(self.timeout, self.provider.analyze(listing_id, batch)).await {
            Ok(result) => result,
            Err(_) => Err(StaylensError::Analysis(AnalysisError::Timeout {
                provider: self.provider.name().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })),
        }
    }

    /// Analyze `batch`; never fails. Any provider error or timeout yields
    /// [`Analysis::degraded`].
    pub async fn analyze(&self, listing_id: &ListingId, batch: &AnalysisBatch) -> Analysis {
        match self.try_analyze(listing_id, batch).await {
            Ok(analysis) => {
                debug!(
                    listing_id = %listing_id,
                    provider = self.provider.name(),
                    issues = analysis.issues.len(),
                    "analysis completed"
                );
                analysis
            }
            Err(err) => {
                warn!(
                    listing_id = %listing_id,
                    provider = self.provider.name(),
                    error = %err,
                    "analysis failed, returning degraded placeholder"
                );
                Analysis::degraded(err)
            }
        }
    }
}

impl std::fmt::Debug for InsightAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightAnalyzer")
            .field("provider", &self.provider.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================================
// MOCK PROVIDER
// ============================================================================

/// Keyword table: (needle, issue title, action item).
const MOCK_KEYWORDS: [(&str, &str, &str); 6] = [
    ("dirty", "Cleanliness", "Schedule a deep clean between stays"),
    ("noise", "Noise", "Provide earplugs and note quiet hours"),
    ("noisy", "Noise", "Provide earplugs and note quiet hours"),
    ("wifi", "Wi-Fi", "Check the router and post the network details"),
    ("check-in", "Check-in", "Send check-in instructions a day ahead"),
    ("broken", "Maintenance", "Inspect and repair reported fixtures"),
];

/// Deterministic offline provider.
///
/// Rating follows the mean review score (>= 4.5 Good, >= 3.0 Fair, else
/// Poor; Fair without scores). Issues come from a small keyword table.
#[derive(Debug, Default)]
pub struct MockAnalysisProvider {
    calls: AtomicU64,
}

impl MockAnalysisProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `analyze` calls so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for MockAnalysisProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn analyze(&self, _listing_id: &ListingId, batch: &AnalysisBatch) -> StaylensResult<Analysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scores: Vec<f32> = batch.reviews.iter().filter_map(|r| r.rating).collect();
        let quality_rating = if scores.is_empty() {
            QualityRating::Fair
        } else {
            let mean = scores.iter().sum::<f32>() / scores.len() as f32;
            if mean >= 4.5 {
                QualityRating::Good
            } else if mean >= 3.0 {
                QualityRating::Fair
            } else {
                QualityRating::Poor
            }
        };

        let mut analysis = Analysis {
            quality_rating: Some(quality_rating),
            ..Analysis::default()
        };
        for kind in ItemKind::ALL {
            for item in batch.of_kind(kind) {
                let text = item.content.to_lowercase();
                for (needle, title, action) in MOCK_KEYWORDS {
                    if !text.contains(needle) {
                        continue;
                    }
                    if !analysis.issues.iter().any(|i| i.title == title) {
                        analysis
                            .issues
                            .push(Issue::new(title, format!("Mentioned in {} {}", kind, item.item_id)));
                    }
                    if !analysis.action_items.iter().any(|a| a == action) {
                        analysis.action_items.push(action.to_string());
                    }
                }
            }
        }
        Ok(analysis)
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

    struct FailingProvider;

    #[async_trait]
    impl AnalysisProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn analyze(&self, _: &ListingId, _: &AnalysisBatch) -> StaylensResult<Analysis> {
            Err(StaylensError::Analysis(AnalysisError::ExternalService {
                provider: "failing".to_string(),
                message: "connection refused".to_string(),
            }))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl AnalysisProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn analyze(&self, _: &ListingId, _: &AnalysisBatch) -> StaylensResult<Analysis> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Analysis::empty())
        }
    }

    fn batch() -> AnalysisBatch {
        let now = Utc::now();
        AnalysisBatch::new(
            vec![
                FeedbackItem::review("r1", "L-1", "Room was dirty", Some(2.0), now),
                FeedbackItem::review("r2", "L-1", "Noisy street, dirty sheets", Some(3.0), now),
            ],
            vec![FeedbackItem::message("m1", "L-1", "The wifi is down", None, now)],
        )
    }

    #[tokio::test]
    async fn test_mock_provider_is_deterministic() {
        let provider = MockAnalysisProvider::new();
        let listing = ListingId::new("L-1");
        let first = provider.analyze(&listing, &batch()).await.unwrap();
        let second = provider.analyze(&listing, &batch()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.quality_rating, Some(QualityRating::Poor));
        let titles: Vec<&str> = first.issues.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Cleanliness", "Noise", "Wi-Fi"]);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_analyzer_degrades_on_error() {
        let analyzer = InsightAnalyzer::new(Arc::new(FailingProvider), Duration::from_secs(5));
        let analysis = analyzer.analyze(&ListingId::new("L-1"), &batch()).await;

        assert!(analysis.is_degraded());
        assert_eq!(analysis.quality_rating, Some(QualityRating::Fair));
        assert_eq!(analysis.action_items.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyzer_times_out() {
        let analyzer = InsightAnalyzer::new(Arc::new(SlowProvider), Duration::from_millis(50));
        let err = analyzer
            .try_analyze(&ListingId::new("L-1"), &batch())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StaylensError::Analysis(AnalysisError::Timeout { timeout_ms: 50, .. })
        ));

        let degraded = analyzer.analyze(&ListingId::new("L-1"), &batch()).await;
        assert!(degraded.is_degraded());
    }

    #[test]
    fn test_build_provider_requires_key() {
        let config = ProviderConfig::new(ProviderKind::OpenAi);
        let err = build_provider(&config, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(
            err,
            StaylensError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_build_provider_by_kind() {
        let timeout = Duration::from_secs(1);
        let openai = build_provider(
            &ProviderConfig::new(ProviderKind::OpenAi).with_api_key("sk-test"),
            timeout,
        )
        .unwrap();
        assert_eq!(openai.name(), "openai");

        let anthropic = build_provider(
            &ProviderConfig::new(ProviderKind::Anthropic)
                .with_api_key("sk-ant")
                .with_base_url("http://localhost:9999/v1"),
            timeout,
        )
        .unwrap();
        assert_eq!(anthropic.name(), "anthropic");

        let mock = build_provider(&ProviderConfig::mock(), timeout).unwrap();
        assert_eq!(mock.name(), "mock");
    }
}
