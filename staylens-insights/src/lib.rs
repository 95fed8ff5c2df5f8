//! Staylens Insights - Incremental Insight Orchestration
//!
//! Composes the feedback reader, the processed-item ledger, the insight
//! cache and the analysis provider into [`InsightService::get_insights`]:
//!
//! 1. read the live reviews and messages of a listing
//! 2. compare their ids with the ledger ([`ChangeDetector`])
//! 3. serve the cached record when nothing changed
//! 4. otherwise analyze the unseen items and commit record and ledger in
//!    one transaction

pub mod change;
pub mod service;
pub mod telemetry;

pub use change::{ChangeDetector, ChangeReport, KindChange, LedgerSnapshot};
pub use service::{validate_item, InsightService};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

use staylens_core::{StaylensConfig, StaylensResult};
use staylens_llm::{build_provider, InsightAnalyzer};
use staylens_storage::open_store;
use tracing::info;

/// Build a service from configuration and make sure the schema exists.
pub async fn connect(config: &StaylensConfig) -> StaylensResult<InsightService> {
    config.validate()?;

    let opened = open_store(&config.persistence)?;
    let provider = build_provider(&config.provider, config.insights.analysis_timeout)?;
    let analyzer = InsightAnalyzer::new(provider, config.insights.analysis_timeout);

    let service = InsightService::new(opened.source, opened.store, analyzer, config.insights.clone());
    service.init_schema().await?;

    info!(
        backend = config.persistence.name(),
        provider = config.provider.kind.as_str(),
        model = %config.provider.model,
        "insight service ready"
    );
    Ok(service)
}
