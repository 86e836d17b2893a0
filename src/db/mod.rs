//! Ledger and metrics tables: the single source of truth for pipeline state.
//!
//! The ledger maps each raw object (by content hash) to the artifacts derived
//! from it. The metrics table is an append-only log of observation results.
//! Neither store takes locks beyond what a single-statement insert or update
//! gets from the database; overlapping invocations resolve last-writer-wins.

mod postgres;
mod rows;
pub mod schema;
mod sqlite;

pub use postgres::PgStore;
pub use rows::{LedgerField, LedgerRow, LedgerSummary, MetricsRow};
pub use sqlite::SqliteStore;

use crate::config::DatabaseConfig;
use crate::error::StoreResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Lineage table keyed by raw-object content hash.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the ledger table if it does not exist.
    async fn ensure_schema(&self) -> StoreResult<()>;

    /// Register a newly observed raw object.
    ///
    /// Fails with [`StoreError::UniqueViolation`](crate::error::StoreError) if
    /// `content_hash` is already present.
    async fn insert_new(&self, content_hash: &str, raw_path: &str) -> StoreResult<()>;

    /// Set one column on every row whose `raw_path` equals `raw_path`.
    ///
    /// Returns the number of rows updated.
    async fn update_field(&self, raw_path: &str, field: LedgerField, value: &str) -> StoreResult<u64>;

    /// Read the whole table.
    async fn snapshot(&self) -> StoreResult<Vec<LedgerRow>>;

    async fn summary(&self) -> StoreResult<LedgerSummary> {
        Ok(LedgerSummary::from_rows(&self.snapshot().await?))
    }
}

/// Append-only table of observation results.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Create the metrics table if it does not exist.
    async fn ensure_schema(&self) -> StoreResult<()>;

    async fn append(&self, row: &MetricsRow) -> StoreResult<()>;

    /// Read the whole table.
    async fn snapshot(&self) -> StoreResult<Vec<MetricsRow>>;
}

/// Handles to both stores, usually backed by the same database.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub metrics: Arc<dyn MetricsStore>,
}

impl Stores {
    /// Use one backend for both tables.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: LedgerStore + MetricsStore + 'static,
    {
        Self {
            ledger: store.clone(),
            metrics: store,
        }
    }

    /// Connect to PostgreSQL, creating the database first if configured to.
    pub async fn connect_postgres(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let store = PgStore::connect(config).await?;
        Ok(Self::shared(Arc::new(store)))
    }

    /// Open (or create) a SQLite database file.
    pub async fn open_sqlite(path: &str) -> anyhow::Result<Self> {
        let store = SqliteStore::open(path).await?;
        Ok(Self::shared(Arc::new(store)))
    }
}
