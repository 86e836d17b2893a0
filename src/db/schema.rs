//! Table definitions for both database backends.
//!
//! `CREATE TABLE IF NOT EXISTS` keeps schema setup idempotent, so every
//! invocation can run it before touching the tables.

pub const LEDGER_TABLE: &str = "ledger";
pub const METRICS_TABLE: &str = "metrics";

pub const POSTGRES_LEDGER: &str = r#"
CREATE TABLE IF NOT EXISTS ledger (
    md5sum VARCHAR(255) NOT NULL UNIQUE,
    raw_path VARCHAR(255) NOT NULL,
    processed_path VARCHAR(255) DEFAULT NULL,
    predictions_path VARCHAR(255) DEFAULT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

pub const POSTGRES_METRICS: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    predictions_path VARCHAR(255) NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    class_0_frac DOUBLE PRECISION,
    class_1_frac DOUBLE PRECISION,
    class_2_frac DOUBLE PRECISION,
    class_3_frac DOUBLE PRECISION,
    most_common_percentage DOUBLE PRECISION,
    share_missing_values DOUBLE PRECISION NOT NULL,
    prediction_drift DOUBLE PRECISION
)
"#;

pub const SQLITE_LEDGER: &str = r#"
CREATE TABLE IF NOT EXISTS ledger (
    md5sum TEXT NOT NULL UNIQUE,
    raw_path TEXT NOT NULL,
    processed_path TEXT DEFAULT NULL,
    predictions_path TEXT DEFAULT NULL,
    created_at TEXT NOT NULL
)
"#;

pub const SQLITE_METRICS: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    predictions_path TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    class_0_frac REAL,
    class_1_frac REAL,
    class_2_frac REAL,
    class_3_frac REAL,
    most_common_percentage REAL,
    share_missing_values REAL NOT NULL,
    prediction_drift REAL
)
"#;
