//! Error types shared by the stores, the transformer and the batch entry points.

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the ledger and metrics stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same unique key already exists.
    #[error("duplicate key '{key}' in table '{table}'")]
    UniqueViolation { table: &'static str, key: String },

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Map a sqlx error, recognising unique-constraint violations.
    pub(crate) fn from_insert(table: &'static str, key: &str, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::UniqueViolation {
                    table,
                    key: key.to_string(),
                }
            }
            _ => StoreError::Database(err),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err)
    }
}

/// Errors raised while turning a raw archive into a processed artifact.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("not a valid npz archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("array '{name}': {reason}")]
    ArrayHeader { name: String, reason: String },

    #[error("array '{name}' has {found} samples, expected {expected}")]
    SampleCount {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("archive contains no arrays")]
    Empty,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while computing observation metrics.
#[derive(Debug, Error)]
pub enum ObserveError {
    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("column '{column}' has unsupported type {data_type}")]
    UnsupportedColumnType { column: String, data_type: String },

    #[error("label value {0} is not an integer")]
    NonIntegralLabel(f64),

    #[error("dataset '{0}' is empty")]
    EmptyDataset(String),
}

/// Broad failure classes reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Blob storage or database access failed
    Storage,
    /// A uniqueness constraint was violated
    Constraint,
    /// A raw file could not be transformed
    Transform,
    /// Metrics could not be computed
    Computation,
    /// The event or configuration is invalid
    Config,
    Internal,
}

impl ErrorKind {
    /// Classify an error by the first recognised cause in its chain.
    pub fn classify(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(store) = cause.downcast_ref::<StoreError>() {
                return match store {
                    StoreError::UniqueViolation { .. } => ErrorKind::Constraint,
                    StoreError::Database(_) => ErrorKind::Storage,
                };
            }
            if cause.is::<TransformError>() {
                return ErrorKind::Transform;
            }
            // Undecodable parquet is bad input data
            if cause.is::<ObserveError>()
                || cause.is::<parquet::errors::ParquetError>()
                || cause.is::<arrow::error::ArrowError>()
            {
                return ErrorKind::Computation;
            }
            if cause.is::<object_store::Error>()
                || cause.is::<sqlx::Error>()
                || cause.is::<std::io::Error>()
            {
                return ErrorKind::Storage;
            }
            if cause.is::<serde_json::Error>() {
                return ErrorKind::Config;
            }
        }
        ErrorKind::Internal
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Storage => "storage",
            ErrorKind::Constraint => "constraint",
            ErrorKind::Transform => "transform",
            ErrorKind::Computation => "computation",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Structured failure of a whole batch invocation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    #[serde(rename = "Kind")]
    pub kind: ErrorKind,

    /// Top-level error message
    #[serde(rename = "Exception")]
    pub message: String,

    /// Full cause chain (and backtrace, when captured)
    #[serde(rename = "Traceback")]
    pub trace: String,
}

impl BatchFailure {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::classify(err),
            message: format!("{:#}", err),
            trace: format!("{:?}", err),
        }
    }
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for BatchFailure {}

impl From<anyhow::Error> for BatchFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::from_error(&err)
    }
}
