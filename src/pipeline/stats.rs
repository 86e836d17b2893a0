//! Run statistics returned by the batch entry points.

use crate::observe::DriftReport;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Outcome of one processing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingReport {
    /// Raw keys seen in the listing (after marker filtering)
    pub raw_listed: usize,

    /// New ledger rows created this run
    pub registered: usize,

    /// Items skipped because another invocation registered them first
    pub skipped_duplicates: usize,

    /// Raw files transformed and recorded in the ledger
    pub processed: usize,

    pub bytes_read: u64,
    pub bytes_written: u64,

    /// Processed keys written this run, in processing order
    pub outputs: Vec<String>,

    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl std::fmt::Display for ProcessingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Listed: {}, Registered: {}, Processed: {}, Skipped: {}, Read: {} B, Written: {} B, Elapsed: {:.1}s",
            self.raw_listed,
            self.registered,
            self.processed,
            self.skipped_duplicates,
            self.bytes_read,
            self.bytes_written,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Outcome of one observation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservationReport {
    /// Predictions artifacts that had no metrics at the start of the run
    pub pending: usize,

    /// Metrics rows appended
    pub observed: usize,

    /// Observed artifacts whose drift score crossed the threshold
    pub drift_detected: usize,

    pub bytes_read: u64,

    /// Drift test per observed artifact, when one could be computed
    pub drift: BTreeMap<String, DriftReport>,

    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl std::fmt::Display for ObservationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pending: {}, Observed: {}, Drift detected: {}, Read: {} B, Elapsed: {:.1}s",
            self.pending,
            self.observed,
            self.drift_detected,
            self.bytes_read,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_report_display() {
        let report = ProcessingReport {
            raw_listed: 10,
            registered: 3,
            processed: 4,
            skipped_duplicates: 1,
            bytes_read: 2048,
            bytes_written: 4096,
            ..Default::default()
        };

        let display = format!("{}", report);
        assert!(display.contains("Registered: 3"));
        assert!(display.contains("Processed: 4"));
        assert!(display.contains("4096"));
    }

    #[test]
    fn test_observation_report_json() {
        let report = ObservationReport {
            pending: 2,
            observed: 2,
            elapsed: Duration::from_millis(1500),
            ..Default::default()
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["observed"], 2);
        assert_eq!(json["elapsed"], 1.5);
        assert!(report.to_string().contains("Observed: 2"));
    }
}
