//! Summary and drift statistics for a predictions dataset.

mod distribution;
mod stattest;

pub use distribution::LabelDistribution;
pub use stattest::{jensen_shannon_distance, label_drift, population_stability_index, DriftReport};

use crate::config::ObservationConfig;
use crate::db::MetricsRow;
use crate::error::ObserveError;
use crate::io::Frame;
use chrono::Utc;

/// Metrics for one predictions artifact, plus the drift test behind its score.
#[derive(Debug, Clone)]
pub struct Observation {
    pub row: MetricsRow,
    pub drift: Option<DriftReport>,
}

/// Fraction of missing cells over every column of `frame`.
pub fn share_missing_values(frame: &Frame) -> Result<f64, ObserveError> {
    let cells = frame.num_rows() * frame.num_columns();
    if cells == 0 {
        return Err(ObserveError::EmptyDataset(frame.name().to_string()));
    }
    Ok(frame.missing_cells() as f64 / cells as f64)
}

/// Percentage of rows holding the most frequent label.
pub fn most_common_percentage(labels: &LabelDistribution, rows: usize) -> Option<f64> {
    if rows == 0 {
        return None;
    }
    labels
        .most_common()
        .map(|(_, count)| count as f64 / rows as f64 * 100.0)
}

/// Compute the metrics row for `current` against `reference`.
pub fn observe(
    predictions_path: &str,
    current: &Frame,
    reference: &LabelDistribution,
    config: &ObservationConfig,
) -> Result<Observation, ObserveError> {
    let share_missing = share_missing_values(current)?;
    let labels = LabelDistribution::from_labels(&current.integer_column(&config.label_column)?);

    let drift = label_drift(
        &config.label_column,
        reference,
        &labels,
        config.drift_method,
        config.drift_threshold,
    );

    let row = MetricsRow {
        predictions_path: predictions_path.to_string(),
        timestamp: Utc::now(),
        class_fracs: labels.class_fracs(config.num_classes),
        most_common_percentage: most_common_percentage(&labels, current.num_rows()),
        share_missing_values: share_missing,
        prediction_drift: drift.as_ref().map(|d| d.score),
    };

    Ok(Observation { row, drift })
}

/// Label distribution of the reference dataset.
pub fn reference_distribution(
    reference: &Frame,
    config: &ObservationConfig,
) -> Result<LabelDistribution, ObserveError> {
    Ok(LabelDistribution::from_labels(
        &reference.integer_column(&config.label_column)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::predictions_batch;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn frame(labels: &[Option<i64>]) -> Frame {
        let batch = predictions_batch(labels);
        Frame::from_batches("preds.parquet", batch.schema(), vec![batch])
    }

    fn reference() -> LabelDistribution {
        LabelDistribution::from_labels(&[Some(0), Some(1), Some(2), Some(3)])
    }

    #[test]
    fn test_complete_dataset() {
        let current = frame(&[Some(0), Some(0), Some(1), Some(3)]);
        let obs = observe("preds/a.parquet", &current, &reference(), &ObservationConfig::default()).unwrap();
        let row = obs.row;

        assert_eq!(row.predictions_path, "preds/a.parquet");
        assert_eq!(row.share_missing_values, 0.0);
        assert_eq!(row.class_fracs, vec![0.5, 0.25, 0.0, 0.25]);
        assert!((row.class_fracs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert_eq!(row.most_common_percentage, Some(50.0));
        assert!(row.prediction_drift.unwrap() > 0.0);
        assert!(obs.drift.is_some());
    }

    #[test]
    fn test_all_missing() {
        let current = frame(&[None, None, None]);
        let obs = observe("preds/b.parquet", &current, &reference(), &ObservationConfig::default()).unwrap();

        assert_eq!(obs.row.share_missing_values, 1.0);
        assert_eq!(obs.row.class_fracs, vec![0.0; 4]);
        assert_eq!(obs.row.most_common_percentage, None);
        assert_eq!(obs.row.prediction_drift, None);
        assert!(obs.drift.is_none());
    }

    #[test]
    fn test_partially_missing() {
        let current = frame(&[Some(2), None]);
        let obs = observe("p", &current, &reference(), &ObservationConfig::default()).unwrap();

        assert_eq!(obs.row.share_missing_values, 0.5);
        assert_eq!(obs.row.class_fracs, vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(obs.row.most_common_percentage, Some(50.0));
    }

    #[test]
    fn test_no_drift_against_itself() {
        let labels = [Some(0), Some(1), Some(2), Some(3)];
        let obs = observe("p", &frame(&labels), &reference(), &ObservationConfig::default()).unwrap();
        assert_eq!(obs.row.prediction_drift, Some(0.0));
        assert!(!obs.drift.unwrap().detected);
    }

    #[test]
    fn test_empty_dataset_is_an_error() {
        let current = frame(&[]);
        let result = observe("p", &current, &reference(), &ObservationConfig::default());
        assert!(matches!(result, Err(ObserveError::EmptyDataset(_))));
    }

    #[test]
    fn test_custom_label_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("prediction", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![1, 1, 1]))],
        )
        .unwrap();
        let current = Frame::from_batches("p", schema, vec![batch]);

        let default = observe("p", &current, &reference(), &ObservationConfig::default());
        assert!(matches!(default, Err(ObserveError::MissingColumn(_))));

        let config = ObservationConfig {
            label_column: "prediction".to_string(),
            num_classes: 2,
            ..Default::default()
        };
        let obs = observe("p", &current, &reference(), &config).unwrap();
        assert_eq!(obs.row.class_fracs, vec![0.0, 1.0]);
        assert_eq!(obs.row.most_common_percentage, Some(100.0));
    }
}
