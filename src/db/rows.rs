//! Row types for the ledger and metrics tables.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Processing lineage of one raw object.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LedgerRow {
    /// Content hash of the raw object (the table's unique key)
    #[sqlx(rename = "md5sum")]
    pub content_hash: String,

    pub raw_path: String,

    /// Set once the processed artifact is written
    pub processed_path: Option<String>,

    /// Set by the scoring service once predictions exist
    pub predictions_path: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Ledger columns that may be updated after a row is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerField {
    ProcessedPath,
    PredictionsPath,
}

impl LedgerField {
    pub fn column(self) -> &'static str {
        match self {
            LedgerField::ProcessedPath => "processed_path",
            LedgerField::PredictionsPath => "predictions_path",
        }
    }
}

/// Row counts used by status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub processed: usize,
    pub predicted: usize,
}

impl LedgerSummary {
    pub fn from_rows(rows: &[LedgerRow]) -> Self {
        Self {
            total: rows.len(),
            processed: rows.iter().filter(|r| r.processed_path.is_some()).count(),
            predicted: rows.iter().filter(|r| r.predictions_path.is_some()).count(),
        }
    }
}

impl std::fmt::Display for LedgerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rows: {}, Processed: {}, Predicted: {}",
            self.total, self.processed, self.predicted
        )
    }
}

/// Point-in-time summary and drift statistics for one predictions artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRow {
    pub predictions_path: String,

    pub timestamp: DateTime<Utc>,

    /// Share of each class among predicted labels, indexed by class id
    pub class_fracs: Vec<f64>,

    /// Percentage (0-100) of rows holding the most frequent label
    pub most_common_percentage: Option<f64>,

    /// Fraction of missing cells across the whole dataset
    pub share_missing_values: f64,

    pub prediction_drift: Option<f64>,
}

/// Flat representation of a metrics table row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct MetricsRecord {
    pub predictions_path: String,
    pub timestamp: DateTime<Utc>,
    pub class_0_frac: Option<f64>,
    pub class_1_frac: Option<f64>,
    pub class_2_frac: Option<f64>,
    pub class_3_frac: Option<f64>,
    pub most_common_percentage: Option<f64>,
    pub share_missing_values: f64,
    pub prediction_drift: Option<f64>,
}

impl MetricsRow {
    /// Fraction for class `k`, or `None` if the table has no such class column.
    pub(crate) fn class_frac(&self, k: usize) -> Option<f64> {
        self.class_fracs.get(k).copied()
    }
}

impl From<MetricsRecord> for MetricsRow {
    fn from(record: MetricsRecord) -> Self {
        // Trailing class columns that were never written belong to unused classes
        let mut class_fracs: Vec<Option<f64>> = vec![
            record.class_0_frac,
            record.class_1_frac,
            record.class_2_frac,
            record.class_3_frac,
        ];
        while matches!(class_fracs.last(), Some(None)) {
            class_fracs.pop();
        }

        Self {
            predictions_path: record.predictions_path,
            timestamp: record.timestamp,
            class_fracs: class_fracs.into_iter().map(|v| v.unwrap_or(0.0)).collect(),
            most_common_percentage: record.most_common_percentage,
            share_missing_values: record.share_missing_values,
            prediction_drift: record.prediction_drift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(raw: &str, processed: Option<&str>, predictions: Option<&str>) -> LedgerRow {
        LedgerRow {
            content_hash: format!("hash-{}", raw),
            raw_path: raw.to_string(),
            processed_path: processed.map(str::to_string),
            predictions_path: predictions.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ledger_summary() {
        let rows = vec![
            row("a.npz", Some("a_processed.tfrecord"), Some("preds/a.parquet")),
            row("b.npz", Some("b_processed.tfrecord"), None),
            row("c.npz", None, None),
        ];
        let summary = LedgerSummary::from_rows(&rows);
        assert_eq!(summary, LedgerSummary { total: 3, processed: 2, predicted: 1 });
        assert!(summary.to_string().contains("Processed: 2"));
    }

    #[test]
    fn test_metrics_record_trims_unused_classes() {
        let record = MetricsRecord {
            predictions_path: "preds/a.parquet".to_string(),
            timestamp: Utc::now(),
            class_0_frac: Some(0.25),
            class_1_frac: Some(0.75),
            class_2_frac: None,
            class_3_frac: None,
            most_common_percentage: Some(75.0),
            share_missing_values: 0.0,
            prediction_drift: None,
        };
        let row = MetricsRow::from(record);
        assert_eq!(row.class_fracs, vec![0.25, 0.75]);
        assert_eq!(row.class_frac(1), Some(0.75));
        assert_eq!(row.class_frac(2), None);
    }

    #[test]
    fn test_ledger_field_columns() {
        assert_eq!(LedgerField::ProcessedPath.column(), "processed_path");
        assert_eq!(LedgerField::PredictionsPath.column(), "predictions_path");
    }
}
