//! PostgreSQL-backed insight store and feedback reader (deadpool pool).

use crate::{FeedbackSource, InsightStore, InsightWrite, Invalidation, StoreStats};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::Value as JsonValue;
use staylens_core::{
    Analysis, FeedbackItem, InsightRecord, Issue, ItemId, ItemKind, ListingId, PostgresConfig,
    QualityRating, StaylensError, StaylensResult, StorageError, Timestamp,
};
use thiserror::Error;
use tokio_postgres::{GenericClient, NoTls};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS processed_items (
    id           BIGSERIAL PRIMARY KEY,
    listing_id   TEXT NOT NULL,
    kind         TEXT NOT NULL,
    item_id      TEXT NOT NULL,
    analyzed_at  TIMESTAMPTZ NOT NULL,
    UNIQUE (listing_id, kind, item_id)
);
CREATE INDEX IF NOT EXISTS idx_processed_items_listing
    ON processed_items (listing_id, kind);

CREATE TABLE IF NOT EXISTS listing_insights (
    listing_id               TEXT PRIMARY KEY,
    quality_rating           TEXT,
    issues                   JSONB NOT NULL DEFAULT '[]'::jsonb,
    action_items             JSONB NOT NULL DEFAULT '[]'::jsonb,
    last_updated             TIMESTAMPTZ NOT NULL,
    total_reviews_analyzed   BIGINT NOT NULL DEFAULT 0,
    total_messages_analyzed  BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS reviews (
    id          TEXT PRIMARY KEY,
    listing_id  TEXT NOT NULL,
    content     TEXT NOT NULL,
    rating      DOUBLE PRECISION,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY,
    listing_id  TEXT NOT NULL,
    sender      TEXT,
    content     TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
);
"#;

/// Errors raised by the Postgres backend.
#[derive(Debug, Error)]
pub enum PostgresStoreError {
    #[error("Failed to create pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Invalid JSON column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown quality rating {0:?}")]
    Rating(String),
}

impl PostgresStoreError {
    fn during(self, operation: &str) -> StaylensError {
        let reason = self.to_string();
        StaylensError::Storage(match self {
            PostgresStoreError::CreatePool(_) | PostgresStoreError::Pool(_) => {
                StorageError::ConnectionFailed { reason }
            }
            _ => StorageError::QueryFailed {
                operation: operation.to_string(),
                reason,
            },
        })
    }
}

impl From<PostgresStoreError> for StaylensError {
    fn from(e: PostgresStoreError) -> Self {
        e.during("postgres")
    }
}

/// Postgres insight store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a connection pool from configuration. No connection is made
    /// until the first query.
    pub fn from_config(config: &PostgresConfig) -> StaylensResult<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = PoolConfig::new(config.max_size);
        pool_cfg.timeouts.wait = Some(config.timeout);
        pool_cfg.timeouts.create = Some(config.timeout);
        pool_cfg.timeouts.recycle = Some(config.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| PostgresStoreError::from(e).during("create_pool"))?;
        Ok(Self::new(pool))
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, PostgresStoreError> {
        Ok(self.pool.get().await?)
    }

    async fn delete_listing<C: GenericClient + Sync>(
        client: &C,
        listing_id: &ListingId,
    ) -> Result<Invalidation, PostgresStoreError> {
        let processed_removed = client
            .execute(
                "DELETE FROM processed_items WHERE listing_id = $1",
                &[&listing_id.as_str()],
            )
            .await?;
        let records_removed = client
            .execute(
                "DELETE FROM listing_insights WHERE listing_id = $1",
                &[&listing_id.as_str()],
            )
            .await?;
        Ok(Invalidation {
            processed_removed,
            record_removed: records_removed > 0,
        })
    }

    async fn insert_processed<C: GenericClient + Sync>(
        client: &C,
        listing_id: &ListingId,
        kind: ItemKind,
        item_ids: &[ItemId],
        analyzed_at: &Timestamp,
    ) -> Result<u64, PostgresStoreError> {
        if item_ids.is_empty() {
            return Ok(0);
        }
        let inserted = client
            .execute(
                "INSERT INTO processed_items (listing_id, kind, item_id, analyzed_at)
                 SELECT $1::text, $2::text, ids.item_id, $4::timestamptz
                 FROM UNNEST($3::text[]) AS ids(item_id)
                 ON CONFLICT (listing_id, kind, item_id) DO NOTHING",
                &[&listing_id.as_str(), &kind.as_str(), &item_ids, analyzed_at],
            )
            .await?;
        Ok(inserted)
    }

    async fn write_record<C: GenericClient + Sync>(
        client: &C,
        record: &InsightRecord,
    ) -> Result<(), PostgresStoreError> {
        let issues = serde_json::to_value(&record.analysis.issues)?;
        let action_items = serde_json::to_value(&record.analysis.action_items)?;
        let rating = record.analysis.quality_rating.map(|r| r.as_str());
        let reviews = i64::try_from(record.total_reviews_analyzed).unwrap_or(i64::MAX);
        let messages = i64::try_from(record.total_messages_analyzed).unwrap_or(i64::MAX);

        client
            .execute(
                "INSERT INTO listing_insights (
                     listing_id, quality_rating, issues, action_items, last_updated,
                     total_reviews_analyzed, total_messages_analyzed)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (listing_id) DO UPDATE SET
                     quality_rating = EXCLUDED.quality_rating,
                     issues = EXCLUDED.issues,
                     action_items = EXCLUDED.action_items,
                     last_updated = EXCLUDED.last_updated,
                     total_reviews_analyzed = EXCLUDED.total_reviews_analyzed,
                     total_messages_analyzed = EXCLUDED.total_messages_analyzed",
                &[
                    &record.listing_id.as_str(),
                    &rating,
                    &issues,
                    &action_items,
                    &record.last_updated,
                    &reviews,
                    &messages,
                ],
            )
            .await?;
        Ok(())
    }

    async fn apply(&self, write: &InsightWrite) -> Result<(), PostgresStoreError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        if write.invalidate {
            Self::delete_listing(&*tx, &write.listing_id).await?;
        }
        if let Some(record) = &write.record {
            Self::write_record(&*tx, record).await?;
        }
        for kind in ItemKind::ALL {
            let ids = write.processed_of(kind);
            Self::insert_processed(&*tx, &write.listing_id, kind, &ids, &write.analyzed_at).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read_record(
        &self,
        listing_id: &ListingId,
    ) -> Result<Option<InsightRecord>, PostgresStoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT quality_rating, issues, action_items, last_updated,
                        total_reviews_analyzed, total_messages_analyzed
                 FROM listing_insights WHERE listing_id = $1",
                &[&listing_id.as_str()],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rating: Option<String> = row.try_get(0)?;
        let quality_rating = match rating {
            None => None,
            Some(raw) => Some(
                QualityRating::parse_lenient(&raw).ok_or(PostgresStoreError::Rating(raw))?,
            ),
        };
        let issues: Vec<Issue> = serde_json::from_value(row.try_get::<_, JsonValue>(1)?)?;
        let action_items: Vec<String> = serde_json::from_value(row.try_get::<_, JsonValue>(2)?)?;
        let reviews: i64 = row.try_get(4)?;
        let messages: i64 = row.try_get(5)?;

        Ok(Some(InsightRecord {
            listing_id: listing_id.clone(),
            analysis: Analysis {
                quality_rating,
                issues,
                action_items,
            },
            last_updated: row.try_get(3)?,
            total_reviews_analyzed: u64::try_from(reviews).unwrap_or(0),
            total_messages_analyzed: u64::try_from(messages).unwrap_or(0),
        }))
    }
}

#[async_trait]
impl FeedbackSource for PostgresStore {
    async fn list_items(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
        since: Timestamp,
        limit: usize,
    ) -> StaylensResult<Vec<FeedbackItem>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = match kind {
            ItemKind::Review => {
                "SELECT id::text, listing_id::text, content, rating::float8, NULL::text, created_at
                 FROM reviews
                 WHERE listing_id::text = $1 AND created_at >= $2
                 ORDER BY created_at DESC LIMIT $3"
            }
            ItemKind::Message => {
                "SELECT id::text, listing_id::text, content, NULL::float8, sender, created_at
                 FROM messages
                 WHERE listing_id::text = $1 AND created_at >= $2
                 ORDER BY created_at DESC LIMIT $3"
            }
        };

        let read = async {
            let client = self.client().await?;
            let rows = client
                .query(sql, &[&listing_id.as_str(), &since, &limit])
                .await?;
            rows.iter()
                .map(|row| -> Result<FeedbackItem, PostgresStoreError> {
                    let rating: Option<f64> = row.try_get(3)?;
                    Ok(FeedbackItem {
                        item_id: row.try_get(0)?,
                        kind,
                        listing_id: ListingId::new(row.try_get::<_, String>(1)?),
                        content: row.try_get(2)?,
                        rating: rating.map(|r| r as f32),
                        sender: row.try_get(4)?,
                        created_at: row.try_get(5)?,
                    })
                })
                .collect::<Result<Vec<FeedbackItem>, PostgresStoreError>>()
        };

        read.await.map_err(|e| e.during("list_items"))
    }
}

#[async_trait]
impl InsightStore for PostgresStore {
    async fn init_schema(&self) -> StaylensResult<()> {
        let client = self.client().await.map_err(|e| e.during("init_schema"))?;
        client.batch_execute(SCHEMA).await.map_err(|e| {
            StaylensError::Storage(StorageError::SchemaInitFailed {
                reason: e.to_string(),
            })
        })?;
        debug!("postgres schema ready");
        Ok(())
    }

    async fn processed_ids(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
    ) -> StaylensResult<Vec<ItemId>> {
        let read = async {
            let client = self.client().await?;
            let rows = client
                .query(
                    "SELECT item_id FROM processed_items WHERE listing_id = $1 AND kind = $2",
                    &[&listing_id.as_str(), &kind.as_str()],
                )
                .await?;
            rows.iter()
                .map(|row| row.try_get::<_, String>(0).map_err(PostgresStoreError::from))
                .collect::<Result<Vec<ItemId>, PostgresStoreError>>()
        };
        read.await.map_err(|e| e.during("processed_ids"))
    }

    async fn insight_get(&self, listing_id: &ListingId) -> StaylensResult<Option<InsightRecord>> {
        self.read_record(listing_id).await.map_err(|e| match e {
            PostgresStoreError::Json(_) | PostgresStoreError::Rating(_) => {
                StaylensError::Storage(StorageError::CorruptedRecord {
                    listing_id: listing_id.clone(),
                    reason: e.to_string(),
                })
            }
            other => other.during("insight_get"),
        })
    }

    async fn mark_processed(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
        item_ids: &[ItemId],
        analyzed_at: Timestamp,
    ) -> StaylensResult<u64> {
        let run = async {
            let client = self.client().await?;
            Self::insert_processed(&**client, listing_id, kind, item_ids, &analyzed_at).await
        };
        run.await.map_err(|e| e.during("mark_processed"))
    }

    async fn invalidate(&self, listing_id: &ListingId) -> StaylensResult<Invalidation> {
        let run = async {
            let mut client = self.client().await?;
            let tx = client.transaction().await?;
            let outcome = Self::delete_listing(&*tx, listing_id).await?;
            tx.commit().await?;
            Ok::<_, PostgresStoreError>(outcome)
        };
        run.await.map_err(|e| e.during("invalidate"))
    }

    async fn commit(&self, write: &InsightWrite) -> StaylensResult<()> {
        self.apply(write).await.map_err(|e| {
            StaylensError::Storage(StorageError::TransactionFailed {
                reason: e.to_string(),
            })
        })
    }

    async fn stats(&self) -> StaylensResult<StoreStats> {
        let read = async {
            let client = self.client().await?;
            let row = client
                .query_one(
                    "SELECT (SELECT COUNT(*) FROM processed_items),
                            (SELECT COUNT(*) FROM listing_insights)",
                    &[],
                )
                .await?;
            let processed: i64 = row.try_get(0)?;
            let insights: i64 = row.try_get(1)?;
            Ok::<_, PostgresStoreError>(StoreStats {
                processed_items: u64::try_from(processed).unwrap_or(0),
                listing_insights: u64::try_from(insights).unwrap_or(0),
            })
        };
        read.await.map_err(|e| e.during("stats"))
    }
}

// ============================================================================
// TESTS
// ============================================================================
