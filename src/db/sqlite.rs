//! SQLite backend, used for local runs and tests.

use super::rows::MetricsRecord;
use super::schema::{LEDGER_TABLE, SQLITE_LEDGER, SQLITE_METRICS};
use super::{LedgerField, LedgerRow, LedgerStore, MetricsRow, MetricsStore};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// SQLite-backed ledger and metrics store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open a database file, creating it if missing. `:memory:` opens a
    /// private in-memory database.
    pub async fn open(path: &str) -> StoreResult<Self> {
        if path == ":memory:" {
            return Self::in_memory().await;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        tracing::info!(path = path, "Opening SQLite store");

        // A single connection avoids "database is locked" under concurrent writers
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        Ok(Self { pool })
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // The database lives as long as its one connection does
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(SQLITE_LEDGER).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_new(&self, content_hash: &str, raw_path: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO ledger (md5sum, raw_path, created_at) VALUES (?, ?, ?)")
            .bind(content_hash)
            .bind(raw_path)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_insert(LEDGER_TABLE, content_hash, e))?;
        Ok(())
    }

    async fn update_field(&self, raw_path: &str, field: LedgerField, value: &str) -> StoreResult<u64> {
        let sql = format!("UPDATE ledger SET {} = ? WHERE raw_path = ?", field.column());
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(raw_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn snapshot(&self) -> StoreResult<Vec<LedgerRow>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            "SELECT md5sum, raw_path, processed_path, predictions_path, created_at \
             FROM ledger ORDER BY created_at, raw_path",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl MetricsStore for SqliteStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(SQLITE_METRICS).execute(&self.pool).await?;
        Ok(())
    }

    async fn append(&self, row: &MetricsRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics (
                predictions_path, timestamp,
                class_0_frac, class_1_frac, class_2_frac, class_3_frac,
                most_common_percentage, share_missing_values, prediction_drift
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.predictions_path)
        .bind(row.timestamp)
        .bind(row.class_frac(0))
        .bind(row.class_frac(1))
        .bind(row.class_frac(2))
        .bind(row.class_frac(3))
        .bind(row.most_common_percentage)
        .bind(row.share_missing_values)
        .bind(row.prediction_drift)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn snapshot(&self) -> StoreResult<Vec<MetricsRow>> {
        let records = sqlx::query_as::<_, MetricsRecord>(
            "SELECT predictions_path, timestamp, class_0_frac, class_1_frac, class_2_frac, \
             class_3_frac, most_common_percentage, share_missing_values, prediction_drift \
             FROM metrics ORDER BY timestamp",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(MetricsRow::from).collect())
    }
}
