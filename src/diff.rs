//! Work discovery by set difference.
//!
//! Every run compares a bucket listing against ledger and metrics snapshots
//! taken at its start. Nothing records partial progress, so an item whose
//! store update never happened shows up again on the next run.

use crate::db::{LedgerRow, MetricsRow};
use std::collections::{BTreeSet, HashSet};

/// Whether `key` names a raw object rather than a derived artifact.
///
/// Keys containing any of `markers` (e.g. `processed`, `parquet`) and
/// directory placeholders ending in `/` are excluded.
pub fn is_raw_key(key: &str, markers: &[String]) -> bool {
    !key.is_empty() && !key.ends_with('/') && !markers.iter().any(|m| key.contains(m.as_str()))
}

/// Raw keys in the listing that no ledger row refers to.
pub fn find_new_raw(listing: &[String], ledger: &[LedgerRow], markers: &[String]) -> BTreeSet<String> {
    let known: HashSet<&str> = ledger.iter().map(|r| r.raw_path.as_str()).collect();

    listing
        .iter()
        .filter(|key| is_raw_key(key, markers))
        .filter(|key| !known.contains(key.as_str()))
        .cloned()
        .collect()
}

/// Registered raw keys that are still listed but were never processed.
pub fn find_unprocessed(listing: &[String], ledger: &[LedgerRow]) -> BTreeSet<String> {
    let listed: HashSet<&str> = listing.iter().map(String::as_str).collect();

    ledger
        .iter()
        .filter(|r| r.processed_path.is_none())
        .filter(|r| listed.contains(r.raw_path.as_str()))
        .map(|r| r.raw_path.clone())
        .collect()
}

/// Predictions artifacts in the ledger that have no metrics row yet.
pub fn find_unobserved(ledger: &[LedgerRow], metrics: &[MetricsRow]) -> BTreeSet<String> {
    let observed: HashSet<&str> = metrics.iter().map(|m| m.predictions_path.as_str()).collect();

    ledger
        .iter()
        .filter_map(|r| r.predictions_path.as_deref())
        .filter(|p| !observed.contains(p))
        .map(str::to_string)
        .collect()
}

/// Raw keys a processing run should handle, in key order.
///
/// With `force`, every listed raw key is returned.
pub fn plan_processing(
    listing: &[String],
    ledger: &[LedgerRow],
    markers: &[String],
    force: bool,
) -> BTreeSet<String> {
    if force {
        return listing
            .iter()
            .filter(|key| is_raw_key(key, markers))
            .cloned()
            .collect();
    }

    let mut plan = find_new_raw(listing, ledger, markers);
    plan.extend(find_unprocessed(listing, ledger));
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn markers() -> Vec<String> {
        vec!["processed".to_string(), "parquet".to_string()]
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn ledger_row(raw: &str, processed: Option<&str>, predictions: Option<&str>) -> LedgerRow {
        LedgerRow {
            content_hash: format!("md5-{}", raw),
            raw_path: raw.to_string(),
            processed_path: processed.map(str::to_string),
            predictions_path: predictions.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    fn metrics_row(predictions: &str) -> MetricsRow {
        MetricsRow {
            predictions_path: predictions.to_string(),
            timestamp: Utc::now(),
            class_fracs: vec![1.0, 0.0, 0.0, 0.0],
            most_common_percentage: Some(100.0),
            share_missing_values: 0.0,
            prediction_drift: Some(0.0),
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_raw_key() {
        let m = markers();
        assert!(is_raw_key("batch1.npz", &m));
        assert!(is_raw_key("2024/01/batch1.npz", &m));
        assert!(!is_raw_key("batch1_processed.tfrecord", &m));
        assert!(!is_raw_key("reference_data.parquet", &m));
        assert!(!is_raw_key("preds/2024-01-01.parquet", &m));
        assert!(!is_raw_key("raw/", &m));
        assert!(!is_raw_key("", &m));
    }

    #[test]
    fn test_find_new_raw() {
        let listing = keys(&[
            "batch1.npz",
            "batch1_processed.tfrecord",
            "batch2.npz",
            "reference_data.parquet",
        ]);
        let ledger = vec![ledger_row("batch1.npz", Some("batch1_processed.tfrecord"), None)];

        assert_eq!(find_new_raw(&listing, &ledger, &markers()), set(&["batch2.npz"]));
        assert_eq!(find_new_raw(&listing, &[], &markers()), set(&["batch1.npz", "batch2.npz"]));
        assert!(find_new_raw(&[], &ledger, &markers()).is_empty());
    }

    #[test]
    fn test_find_unprocessed() {
        let listing = keys(&["batch1.npz", "batch2.npz"]);
        let ledger = vec![
            ledger_row("batch1.npz", None, None),
            ledger_row("batch2.npz", Some("batch2_processed.tfrecord"), None),
            // raw object deleted since registration
            ledger_row("gone.npz", None, None),
        ];
        assert_eq!(find_unprocessed(&listing, &ledger), set(&["batch1.npz"]));
    }

    #[test]
    fn test_find_unobserved() {
        let ledger = vec![
            ledger_row("a.npz", Some("a_processed.tfrecord"), Some("preds/a.parquet")),
            ledger_row("b.npz", Some("b_processed.tfrecord"), Some("preds/b.parquet")),
            ledger_row("c.npz", Some("c_processed.tfrecord"), None),
        ];
        let metrics = vec![metrics_row("preds/a.parquet")];

        assert_eq!(find_unobserved(&ledger, &metrics), set(&["preds/b.parquet"]));
        assert_eq!(
            find_unobserved(&ledger, &[]),
            set(&["preds/a.parquet", "preds/b.parquet"])
        );
    }

    #[test]
    fn test_duplicate_metrics_rows_still_count_as_observed() {
        let ledger = vec![ledger_row("a.npz", None, Some("preds/a.parquet"))];
        let metrics = vec![metrics_row("preds/a.parquet"), metrics_row("preds/a.parquet")];
        assert!(find_unobserved(&ledger, &metrics).is_empty());
    }

    #[test]
    fn test_plan_processing() {
        let listing = keys(&["c.npz", "a.npz", "b.npz", "b_processed.tfrecord"]);
        let ledger = vec![
            ledger_row("a.npz", None, None),
            ledger_row("b.npz", Some("b_processed.tfrecord"), None),
        ];

        let plan = plan_processing(&listing, &ledger, &markers(), false);
        assert_eq!(plan.into_iter().collect::<Vec<_>>(), vec!["a.npz", "c.npz"]);

        let forced = plan_processing(&listing, &ledger, &markers(), true);
        assert_eq!(forced, set(&["a.npz", "b.npz", "c.npz"]));
    }

    #[test]
    fn test_nothing_to_do() {
        let listing = keys(&["a.npz", "a_processed.tfrecord"]);
        let ledger = vec![ledger_row("a.npz", Some("a_processed.tfrecord"), None)];
        assert!(plan_processing(&listing, &ledger, &markers(), false).is_empty());
    }
}
