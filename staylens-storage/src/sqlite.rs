//! SQLite-backed insight store and feedback reader.
//!
//! One connection behind a mutex, WAL journal. Timestamps are stored as
//! RFC 3339 text in UTC with microsecond precision so that lexical order
//! matches chronological order.

use crate::{FeedbackSource, InsightStore, InsightWrite, Invalidation, StoreStats};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use staylens_core::{
    Analysis, FeedbackItem, InsightRecord, Issue, ItemId, ItemKind, ListingId, QualityRating,
    StaylensError, StaylensResult, StorageError, Timestamp,
};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS processed_items (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_id   TEXT NOT NULL,
    kind         TEXT NOT NULL,
    item_id      TEXT NOT NULL,
    analyzed_at  TEXT NOT NULL,
    UNIQUE (listing_id, kind, item_id)
);
CREATE INDEX IF NOT EXISTS idx_processed_items_listing
    ON processed_items (listing_id, kind);

CREATE TABLE IF NOT EXISTS listing_insights (
    listing_id               TEXT PRIMARY KEY,
    quality_rating           TEXT,
    issues                   TEXT NOT NULL DEFAULT '[]',
    action_items             TEXT NOT NULL DEFAULT '[]',
    last_updated             TEXT NOT NULL,
    total_reviews_analyzed   INTEGER NOT NULL DEFAULT 0,
    total_messages_analyzed  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS reviews (
    id          TEXT PRIMARY KEY,
    listing_id  TEXT NOT NULL,
    content     TEXT NOT NULL,
    rating      REAL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reviews_listing ON reviews (listing_id, created_at);

CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY,
    listing_id  TEXT NOT NULL,
    sender      TEXT,
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_listing ON messages (listing_id, created_at);
"#;

/// Errors raised by the SQLite backend.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Invalid JSON column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid timestamp {value:?}: {reason}")]
    Timestamp { value: String, reason: String },

    #[error("Unknown quality rating {0:?}")]
    Rating(String),
}

impl SqliteStoreError {
    fn during(self, operation: &str) -> StaylensError {
        StaylensError::Storage(StorageError::QueryFailed {
            operation: operation.to_string(),
            reason: self.to_string(),
        })
    }
}

impl From<SqliteStoreError> for StaylensError {
    fn from(e: SqliteStoreError) -> Self {
        e.during("sqlite")
    }
}

fn format_ts(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: String) -> Result<Timestamp, SqliteStoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SqliteStoreError::Timestamp {
            reason: e.to_string(),
            value,
        })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Host tables may use integer or text keys; both become text ids.
fn id_text(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get::<_, Value>(idx)? {
        Value::Integer(n) => n.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
        Value::Null => String::new(),
    })
}

/// SQLite insight store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StaylensResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StaylensError::Storage(StorageError::ConnectionFailed {
                        reason: SqliteStoreError::CreateDir(e).to_string(),
                    })
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            StaylensError::Storage(StorageError::ConnectionFailed {
                reason: e.to_string(),
            })
        })?;
        Self::with_connection(conn)
    }

    /// In-memory database, gone when the store is dropped.
    pub fn open_in_memory() -> StaylensResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StaylensError::Storage(StorageError::ConnectionFailed {
                reason: e.to_string(),
            })
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StaylensResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| SqliteStoreError::from(e).during("open"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StaylensResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StaylensError::Storage(StorageError::LockPoisoned))
    }

    /// Insert or replace a row in the host `reviews`/`messages` table.
    /// Used to seed datasets; the insight core itself never writes there.
    pub fn upsert_item(&self, item: &FeedbackItem) -> StaylensResult<()> {
        let conn = self.lock()?;
        let created_at = format_ts(&item.created_at);
        let result = match item.kind {
            ItemKind::Review => conn.execute(
                "INSERT OR REPLACE INTO reviews (id, listing_id, content, rating, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.item_id,
                    item.listing_id.as_str(),
                    item.content,
                    item.rating.map(f64::from),
                    created_at
                ],
            ),
            ItemKind::Message => conn.execute(
                "INSERT OR REPLACE INTO messages (id, listing_id, sender, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.item_id,
                    item.listing_id.as_str(),
                    item.sender,
                    item.content,
                    created_at
                ],
            ),
        };
        result.map_err(|e| SqliteStoreError::from(e).during("upsert_item"))?;
        Ok(())
    }

    /// Delete a row from the host table. Returns true if it existed.
    pub fn delete_item(&self, kind: ItemKind, item_id: &str) -> StaylensResult<bool> {
        let conn = self.lock()?;
        let sql = match kind {
            ItemKind::Review => "DELETE FROM reviews WHERE id = ?1",
            ItemKind::Message => "DELETE FROM messages WHERE id = ?1",
        };
        let removed = conn
            .execute(sql, params![item_id])
            .map_err(|e| SqliteStoreError::from(e).during("delete_item"))?;
        Ok(removed > 0)
    }

    fn read_record(
        conn: &Connection,
        listing_id: &ListingId,
    ) -> Result<Option<InsightRecord>, SqliteStoreError> {
        let row = conn
            .query_row(
                "SELECT quality_rating, issues, action_items, last_updated,
                        total_reviews_analyzed, total_messages_analyzed
                 FROM listing_insights WHERE listing_id = ?1",
                params![listing_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((rating, issues, action_items, last_updated, reviews, messages)) = row else {
            return Ok(None);
        };

        let quality_rating = match rating {
            None => None,
            Some(raw) => Some(
                QualityRating::parse_lenient(&raw).ok_or(SqliteStoreError::Rating(raw))?,
            ),
        };
        let issues: Vec<Issue> = serde_json::from_str(&issues)?;
        let action_items: Vec<String> = serde_json::from_str(&action_items)?;

        Ok(Some(InsightRecord {
            listing_id: listing_id.clone(),
            analysis: Analysis {
                quality_rating,
                issues,
                action_items,
            },
            last_updated: parse_ts(last_updated)?,
            total_reviews_analyzed: u64::try_from(reviews).unwrap_or(0),
            total_messages_analyzed: u64::try_from(messages).unwrap_or(0),
        }))
    }

    fn write_record(conn: &Connection, record: &InsightRecord) -> Result<(), SqliteStoreError> {
        conn.execute(
            "INSERT INTO listing_insights (
                 listing_id, quality_rating, issues, action_items, last_updated,
                 total_reviews_analyzed, total_messages_analyzed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(listing_id) DO UPDATE SET
                 quality_rating = excluded.quality_rating,
                 issues = excluded.issues,
                 action_items = excluded.action_items,
                 last_updated = excluded.last_updated,
                 total_reviews_analyzed = excluded.total_reviews_analyzed,
                 total_messages_analyzed = excluded.total_messages_analyzed",
            params![
                record.listing_id.as_str(),
                record.analysis.quality_rating.map(|r| r.as_str()),
                serde_json::to_string(&record.analysis.issues)?,
                serde_json::to_string(&record.analysis.action_items)?,
                format_ts(&record.last_updated),
                to_i64(record.total_reviews_analyzed),
                to_i64(record.total_messages_analyzed),
            ],
        )?;
        Ok(())
    }

    fn insert_processed(
        conn: &Connection,
        listing_id: &ListingId,
        kind: ItemKind,
        item_ids: &[ItemId],
        analyzed_at: &Timestamp,
    ) -> Result<u64, SqliteStoreError> {
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO processed_items (listing_id, kind, item_id, analyzed_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        let analyzed_at = format_ts(analyzed_at);
        let mut inserted = 0u64;
        for item_id in item_ids {
            inserted += stmt.execute(params![
                listing_id.as_str(),
                kind.as_str(),
                item_id,
                analyzed_at
            ])? as u64;
        }
        Ok(inserted)
    }

    fn delete_listing(
        conn: &Connection,
        listing_id: &ListingId,
    ) -> Result<Invalidation, SqliteStoreError> {
        let processed_removed = conn.execute(
            "DELETE FROM processed_items WHERE listing_id = ?1",
            params![listing_id.as_str()],
        )?;
        let records_removed = conn.execute(
            "DELETE FROM listing_insights WHERE listing_id = ?1",
            params![listing_id.as_str()],
        )?;
        Ok(Invalidation {
            processed_removed: processed_removed as u64,
            record_removed: records_removed > 0,
        })
    }

    fn apply(conn: &mut Connection, write: &InsightWrite) -> Result<(), SqliteStoreError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if write.invalidate {
            Self::delete_listing(&tx, &write.listing_id)?;
        }
        if let Some(record) = &write.record {
            Self::write_record(&tx, record)?;
        }
        for kind in ItemKind::ALL {
            let ids = write.processed_of(kind);
            if !ids.is_empty() {
                Self::insert_processed(&tx, &write.listing_id, kind, &ids, &write.analyzed_at)?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl FeedbackSource for SqliteStore {
    async fn list_items(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
        since: Timestamp,
        limit: usize,
    ) -> StaylensResult<Vec<FeedbackItem>> {
        let conn = self.lock()?;
        let since = format_ts(&since);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let sql = match kind {
            ItemKind::Review => {
                "SELECT id, listing_id, content, rating, NULL, created_at FROM reviews
                 WHERE listing_id = ?1 AND created_at >= ?2
                 ORDER BY created_at DESC LIMIT ?3"
            }
            ItemKind::Message => {
                "SELECT id, listing_id, content, NULL, sender, created_at FROM messages
                 WHERE listing_id = ?1 AND created_at >= ?2
                 ORDER BY created_at DESC LIMIT ?3"
            }
        };

        let read = || -> Result<Vec<FeedbackItem>, SqliteStoreError> {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt
                .query_map(params![listing_id.as_str(), since, limit], |row| {
                    Ok((
                        id_text(row, 0)?,
                        id_text(row, 1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(item_id, listing, content, rating, sender, created_at)| {
                    Ok(FeedbackItem {
                        item_id,
                        kind,
                        listing_id: ListingId::new(listing),
                        content,
                        rating: rating.map(|r| r as f32),
                        sender,
                        created_at: parse_ts(created_at)?,
                    })
                })
                .collect()
        };

        read().map_err(|e| e.during("list_items"))
    }
}

#[async_trait]
impl InsightStore for SqliteStore {
    async fn init_schema(&self) -> StaylensResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA).map_err(|e| {
            StaylensError::Storage(StorageError::SchemaInitFailed {
                reason: e.to_string(),
            })
        })?;
        debug!("sqlite schema ready");
        Ok(())
    }

    async fn processed_ids(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
    ) -> StaylensResult<Vec<ItemId>> {
        let conn = self.lock()?;
        let read = || -> Result<Vec<ItemId>, SqliteStoreError> {
            let mut stmt = conn.prepare_cached(
                "SELECT item_id FROM processed_items WHERE listing_id = ?1 AND kind = ?2",
            )?;
            let ids = stmt
                .query_map(params![listing_id.as_str(), kind.as_str()], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        };
        read().map_err(|e| e.during("processed_ids"))
    }

    async fn insight_get(&self, listing_id: &ListingId) -> StaylensResult<Option<InsightRecord>> {
        let conn = self.lock()?;
        Self::read_record(&conn, listing_id).map_err(|e| match e {
            SqliteStoreError::Sqlite(_) => e.during("insight_get"),
            other => StaylensError::Storage(StorageError::CorruptedRecord {
                listing_id: listing_id.clone(),
                reason: other.to_string(),
            }),
        })
    }

    async fn mark_processed(
        &self,
        listing_id: &ListingId,
        kind: ItemKind,
        item_ids: &[ItemId],
        analyzed_at: Timestamp,
    ) -> StaylensResult<u64> {
        let conn = self.lock()?;
        Self::insert_processed(&conn, listing_id, kind, item_ids, &analyzed_at)
            .map_err(|e| e.during("mark_processed"))
    }

    async fn invalidate(&self, listing_id: &ListingId) -> StaylensResult<Invalidation> {
        let mut conn = self.lock()?;
        let run = |conn: &mut Connection| -> Result<Invalidation, SqliteStoreError> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let outcome = Self::delete_listing(&tx, listing_id)?;
            tx.commit()?;
            Ok(outcome)
        };
        run(&mut *conn).map_err(|e| e.during("invalidate"))
    }

    async fn commit(&self, write: &InsightWrite) -> StaylensResult<()> {
        let mut conn = self.lock()?;
        Self::apply(&mut conn, write).map_err(|e| {
            StaylensError::Storage(StorageError::TransactionFailed {
                reason: e.to_string(),
            })
        })
    }

    async fn stats(&self) -> StaylensResult<StoreStats> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<u64, SqliteStoreError> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        };
        Ok(StoreStats {
            processed_items: count("processed_items").map_err(|e| e.during("stats"))?,
            listing_insights: count("listing_insights").map_err(|e| e.during("stats"))?,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use staylens_core::ItemCounts;
    use tempfile::TempDir;

    fn temp_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("staylens.db")).unwrap();
        (store, dir)
    }

    fn listing() -> ListingId {
        ListingId::new("42")
    }

    fn sample_record(rating: Option<QualityRating>) -> InsightRecord {
        InsightRecord::new(
            listing(),
            Analysis {
                quality_rating: rating,
                issues: vec![Issue::new("Noise", "Thin walls")],
                action_items: vec!["Add rugs".to_string()],
            },
            ItemCounts {
                reviews: 2,
                messages: 1,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        store.init_schema().await.unwrap();
        assert_eq!(store.stats().await.unwrap(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_mark_processed_ignores_duplicates() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        let ids = vec!["1".to_string(), "2".to_string(), "2".to_string()];

        let first = store
            .mark_processed(&listing(), ItemKind::Review, &ids, Utc::now())
            .await
            .unwrap();
        let second = store
            .mark_processed(&listing(), ItemKind::Review, &ids, Utc::now())
            .await
            .unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(store.stats().await.unwrap().processed_items, 2);
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        let record = sample_record(Some(QualityRating::Poor));

        store
            .commit(&InsightWrite::new(listing(), record.last_updated).with_record(record.clone()))
            .await
            .unwrap();

        let loaded = store.insight_get(&listing()).await.unwrap().unwrap();
        assert_eq!(loaded.analysis, record.analysis);
        assert_eq!(loaded.total_reviews_analyzed, 2);
        assert_eq!(loaded.last_updated.timestamp_micros(), record.last_updated.timestamp_micros());
    }

    #[tokio::test]
    async fn test_absent_rating_round_trips_as_none() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        let record = sample_record(None);
        store
            .commit(&InsightWrite::new(listing(), Utc::now()).with_record(record))
            .await
            .unwrap();
        let loaded = store.insight_get(&listing()).await.unwrap().unwrap();
        assert_eq!(loaded.analysis.quality_rating, None);
    }

    #[tokio::test]
    async fn test_commit_with_invalidation_replaces_ledger() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        store
            .mark_processed(&listing(), ItemKind::Message, &["old".to_string()], Utc::now())
            .await
            .unwrap();

        let write = InsightWrite::new(listing(), Utc::now())
            .with_invalidation(true)
            .with_processed(vec![(ItemKind::Review, "r1".to_string())]);
        store.commit(&write).await.unwrap();

        assert!(store.processed_ids(&listing(), ItemKind::Message).await.unwrap().is_empty());
        assert_eq!(store.processed_ids(&listing(), ItemKind::Review).await.unwrap(), vec!["r1"]);
        assert!(store.insight_get(&listing()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        store
            .mark_processed(&listing(), ItemKind::Review, &["keep".to_string()], Utc::now())
            .await
            .unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute_batch("DROP TABLE listing_insights").unwrap();
        }

        let write = InsightWrite::new(listing(), Utc::now())
            .with_invalidation(true)
            .with_record(sample_record(Some(QualityRating::Good)));
        let err = store.commit(&write).await.unwrap_err();
        assert!(matches!(
            err,
            StaylensError::Storage(StorageError::TransactionFailed { .. })
        ));
        assert_eq!(
            store.processed_ids(&listing(), ItemKind::Review).await.unwrap(),
            vec!["keep"]
        );
    }

    #[tokio::test]
    async fn test_corrupted_record_is_reported() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO listing_insights (listing_id, quality_rating, issues, action_items, last_updated)
                 VALUES ('42', 'Good', 'not json', '[]', '2024-01-01T00:00:00.000000Z')",
                [],
            )
            .unwrap();
        }
        let err = store.insight_get(&listing()).await.unwrap_err();
        assert!(matches!(
            err,
            StaylensError::Storage(StorageError::CorruptedRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_items_window_limit_and_order() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        let now = Utc::now();
        for (id, days) in [("a", 1), ("b", 5), ("c", 40), ("d", 400)] {
            store
                .upsert_item(&FeedbackItem::review(
                    id,
                    "42",
                    format!("review {id}"),
                    Some(4.5),
                    now - Duration::days(days),
                ))
                .unwrap();
        }
        store
            .upsert_item(&FeedbackItem::message(
                "m1",
                "42",
                "Is early check-in possible?",
                Some("guest".to_string()),
                now,
            ))
            .unwrap();

        let reviews = store
            .list_items(&listing(), ItemKind::Review, now - Duration::days(180), 50)
            .await
            .unwrap();
        let ids: Vec<&str> = reviews.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(reviews[0].rating, Some(4.5));

        let capped = store
            .list_items(&listing(), ItemKind::Review, now - Duration::days(180), 2)
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);

        let messages = store
            .list_items(&listing(), ItemKind::Message, now - Duration::days(30), 100)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender.as_deref(), Some("guest"));
        assert_eq!(messages[0].kind, ItemKind::Message);
    }

    #[tokio::test]
    async fn test_integer_host_ids_are_read_as_text() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO reviews (id, listing_id, content, rating, created_at)
                 VALUES (7, 42, 'Lovely', 5.0, ?1)",
                params![format_ts(&Utc::now())],
            )
            .unwrap();
        }
        let items = store
            .list_items(&listing(), ItemKind::Review, Utc::now() - Duration::days(1), 10)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, "7");
        assert_eq!(items[0].listing_id, listing());
    }

    #[tokio::test]
    async fn test_invalidate_reports_removed_rows() {
        let (store, _dir) = temp_store();
        store.init_schema().await.unwrap();
        let write = InsightWrite::new(listing(), Utc::now())
            .with_record(sample_record(Some(QualityRating::Fair)))
            .with_processed(vec![
                (ItemKind::Review, "1".to_string()),
                (ItemKind::Message, "1".to_string()),
            ]);
        store.commit(&write).await.unwrap();

        let outcome = store.invalidate(&listing()).await.unwrap();
        assert_eq!(outcome.processed_removed, 2);
        assert!(outcome.record_removed);

        let again = store.invalidate(&listing()).await.unwrap();
        assert_eq!(again, Invalidation::default());
    }
}
