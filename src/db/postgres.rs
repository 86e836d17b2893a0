//! PostgreSQL backend for the ledger and metrics tables.

use super::rows::MetricsRecord;
use super::schema::{LEDGER_TABLE, POSTGRES_LEDGER, POSTGRES_METRICS};
use super::{LedgerField, LedgerRow, LedgerStore, MetricsRow, MetricsStore};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, Pool, Postgres};
use std::str::FromStr;

/// PostgreSQL error code for `CREATE DATABASE` on an existing name.
const DUPLICATE_DATABASE: &str = "42P04";

/// PostgreSQL-backed ledger and metrics store.
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    /// Connect using the configured credentials.
    ///
    /// When `create_database` is set the target database is created first
    /// (via the maintenance database) if it does not exist yet.
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let opts = connect_options(config)?;

        if config.create_database {
            ensure_database(&opts, &config.maintenance_db).await?;
        }

        tracing::info!(
            target = %config.display_target(),
            max_connections = config.max_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(opts)
            .await
            .with_context(|| format!("Failed to connect to {}", config.display_target()))?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

fn connect_options(config: &DatabaseConfig) -> anyhow::Result<PgConnectOptions> {
    let mut opts = match &config.url {
        Some(url) => PgConnectOptions::from_str(url).context("Invalid database url")?,
        None => {
            let mut opts = PgConnectOptions::new().port(config.port);
            if let Some(host) = &config.host {
                opts = opts.host(host);
            }
            if let Some(user) = &config.user {
                opts = opts.username(user);
            }
            if let Some(password) = &config.password {
                opts = opts.password(password);
            }
            opts
        }
    };

    if config.url.is_none() || opts.get_database().is_none() {
        opts = opts.database(&config.dbname);
    }

    Ok(opts)
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Create the target database if it does not exist.
async fn ensure_database(opts: &PgConnectOptions, maintenance_db: &str) -> anyhow::Result<()> {
    let target = opts
        .get_database()
        .context("No database name configured")?
        .to_string();

    if !is_plain_identifier(&target) {
        anyhow::bail!("Refusing to create database with name '{}'", target);
    }

    let admin = opts.clone().database(maintenance_db);
    let mut conn = PgConnection::connect_with(&admin)
        .await
        .with_context(|| format!("Failed to connect to maintenance database '{}'", maintenance_db))?;

    let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(&target)
        .fetch_optional(&mut conn)
        .await?;

    if exists.is_none() {
        let statement = format!("CREATE DATABASE \"{}\"", target);
        match sqlx::raw_sql(&statement).execute(&mut conn).await {
            Ok(_) => tracing::info!(database = %target, "Created database"),
            // Another invocation created it between the check and the create
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(DUPLICATE_DATABASE) => {
                tracing::debug!(database = %target, "Database created concurrently");
            }
            Err(e) => return Err(e).context(format!("Failed to create database '{}'", target)),
        }
    }

    conn.close().await?;
    Ok(())
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(POSTGRES_LEDGER).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_new(&self, content_hash: &str, raw_path: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO ledger (md5sum, raw_path, created_at) VALUES ($1, $2, $3)")
            .bind(content_hash)
            .bind(raw_path)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_insert(LEDGER_TABLE, content_hash, e))?;
        Ok(())
    }

    async fn update_field(&self, raw_path: &str, field: LedgerField, value: &str) -> StoreResult<u64> {
        let sql = format!("UPDATE ledger SET {} = $1 WHERE raw_path = $2", field.column());
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
impl MetricsStore for PgStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(POSTGRES_METRICS).execute(&self.pool).await?;
        Ok(())
    }

    async fn append(&self, row: &MetricsRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics (
                predictions_path, timestamp,
                class_0_frac, class_1_frac, class_2_frac, class_3_frac,
                most_common_percentage, share_missing_values, prediction_drift
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_from_fields() {
        let config = DatabaseConfig {
            host: Some("db.internal".to_string()),
            port: 6543,
            user: Some("dw".to_string()),
            password: Some("secret".to_string()),
            ..DatabaseConfig::default()
        };
        let opts = connect_options(&config).unwrap();
        assert_eq!(opts.get_host(), "db.internal");
        assert_eq!(opts.get_port(), 6543);
        assert_eq!(opts.get_username(), "dw");
        assert_eq!(opts.get_database(), Some("droughtwatch"));
    }

    #[test]
    fn test_connect_options_url_keeps_its_database() {
        let config = DatabaseConfig {
            url: Some("postgres://u:p@localhost:5432/other".to_string()),
            ..DatabaseConfig::default()
        };
        let opts = connect_options(&config).unwrap();
        assert_eq!(opts.get_database(), Some("other"));
    }

    #[test]
    fn test_connect_options_url_without_database() {
        let config = DatabaseConfig {
            url: Some("postgres://u:p@localhost:5432".to_string()),
            ..DatabaseConfig::default()
        };
        let opts = connect_options(&config).unwrap();
        assert_eq!(opts.get_database(), Some("droughtwatch"));
    }

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("droughtwatch"));
        assert!(is_plain_identifier("drought_watch-2"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("x\"; DROP TABLE ledger; --"));
    }
}
