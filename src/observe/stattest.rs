//! Distribution distances used for drift detection.

use super::distribution::LabelDistribution;
use crate::config::DriftMethod;
use serde::Serialize;
use std::collections::BTreeSet;

/// Shares substituted for empty categories when computing PSI.
const PSI_EPSILON: f64 = 0.0001;

/// Outcome of one drift test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub column: String,
    pub method: DriftMethod,
    pub score: f64,
    pub threshold: f64,
    pub detected: bool,
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} drift on '{}': {:.4} (threshold {}, {})",
            self.method,
            self.column,
            self.score,
            self.threshold,
            if self.detected { "detected" } else { "not detected" }
        )
    }
}

/// Paired shares over the union of labels seen on either side.
fn aligned_shares(reference: &LabelDistribution, current: &LabelDistribution) -> Vec<(f64, f64)> {
    let labels: BTreeSet<i64> = reference.labels().chain(current.labels()).collect();
    labels
        .into_iter()
        .map(|label| (reference.share(label), current.share(label)))
        .collect()
}

fn kl_term(p: f64, m: f64) -> f64 {
    if p > 0.0 { p * (p / m).ln() } else { 0.0 }
}

/// Jensen-Shannon distance (natural log), in `[0, sqrt(ln 2)]`.
pub fn jensen_shannon_distance(reference: &LabelDistribution, current: &LabelDistribution) -> f64 {
    let divergence: f64 = aligned_shares(reference, current)
        .into_iter()
        .map(|(p, q)| {
            let m = 0.5 * (p + q);
            0.5 * kl_term(p, m) + 0.5 * kl_term(q, m)
        })
        .sum();
    divergence.max(0.0).sqrt()
}

/// Population Stability Index.
pub fn population_stability_index(reference: &LabelDistribution, current: &LabelDistribution) -> f64 {
    aligned_shares(reference, current)
        .into_iter()
        .map(|(p, q)| {
            let p = if p == 0.0 { PSI_EPSILON } else { p };
            let q = if q == 0.0 { PSI_EPSILON } else { q };
            (q - p) * (q / p).ln()
        })
        .sum()
}

/// Compare label distributions. `None` if either side has no labels.
pub fn label_drift(
    column: &str,
    reference: &LabelDistribution,
    current: &LabelDistribution,
    method: DriftMethod,
    threshold: f64,
) -> Option<DriftReport> {
    if reference.is_empty() || current.is_empty() {
        return None;
    }

    let score = match method {
        DriftMethod::JensenShannon => jensen_shannon_distance(reference, current),
        DriftMethod::Psi => population_stability_index(reference, current),
    };

    Some(DriftReport {
        column: column.to_string(),
        method,
        score,
        threshold,
        detected: score >= threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(labels: &[i64]) -> LabelDistribution {
        LabelDistribution::from_labels(&labels.iter().map(|&l| Some(l)).collect::<Vec<_>>())
    }

    #[test]
    fn test_identical_distributions() {
        let a = dist(&[0, 1, 1, 2, 3]);
        let b = dist(&[3, 2, 1, 1, 0, 0, 1, 1, 2, 3]);
        assert!(jensen_shannon_distance(&a, &b) < 1e-12);
        assert!(population_stability_index(&a, &b).abs() < 1e-12);
    }

    #[test]
    fn test_disjoint_distributions() {
        let a = dist(&[0, 0, 1]);
        let b = dist(&[2, 3]);
        let expected = std::f64::consts::LN_2.sqrt();
        assert!((jensen_shannon_distance(&a, &b) - expected).abs() < 1e-12);
        assert!(population_stability_index(&a, &b) > 10.0);
    }

    #[test]
    fn test_jensen_shannon_known_value() {
        // p = [0.5, 0.5], q = [1.0, 0.0], m = [0.75, 0.25]
        let a = dist(&[0, 1]);
        let b = dist(&[0]);
        let m0: f64 = 0.75;
        let m1: f64 = 0.25;
        let by_hand = 0.5 * (0.5 * (0.5 / m0).ln() + 0.5 * (0.5 / m1).ln()) + 0.5 * (1.0 / m0).ln();
        assert!((jensen_shannon_distance(&a, &b) - by_hand.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_symmetry() {
        let a = dist(&[0, 0, 0, 1, 2]);
        let b = dist(&[1, 1, 2, 3]);
        let ab = jensen_shannon_distance(&a, &b);
        let ba = jensen_shannon_distance(&b, &a);
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn test_label_drift_report() {
        let reference = dist(&[0, 1, 2, 3]);
        let current = dist(&[0, 0, 0, 0]);

        let report = label_drift("label", &reference, &current, DriftMethod::JensenShannon, 0.1).unwrap();
        assert!(report.detected);
        assert!(report.to_string().contains("detected"));

        let same = label_drift("label", &reference, &reference, DriftMethod::Psi, 0.1).unwrap();
        assert!(!same.detected);
        assert_eq!(same.method, DriftMethod::Psi);
    }

    #[test]
    fn test_no_labels_means_no_drift_score() {
        let reference = dist(&[0, 1]);
        let empty = LabelDistribution::from_labels(&[None, None]);
        assert!(label_drift("label", &reference, &empty, DriftMethod::JensenShannon, 0.1).is_none());
        assert!(label_drift("label", &empty, &reference, DriftMethod::Psi, 0.1).is_none());
    }
}
