//! Categorical label distributions.

use std::collections::BTreeMap;

/// Counts of each label value, plus the number of missing labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelDistribution {
    counts: BTreeMap<i64, usize>,
    missing: usize,
}

impl LabelDistribution {
    pub fn from_labels(labels: &[Option<i64>]) -> Self {
        let mut dist = Self::default();
        for label in labels {
            match label {
                Some(value) => *dist.counts.entry(*value).or_insert(0) += 1,
                None => dist.missing += 1,
            }
        }
        dist
    }

    /// Number of non-missing labels.
    pub fn present(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn missing(&self) -> usize {
        self.missing
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn count(&self, label: i64) -> usize {
        self.counts.get(&label).copied().unwrap_or(0)
    }

    /// Share of `label` among non-missing labels.
    pub fn share(&self, label: i64) -> f64 {
        let present = self.present();
        if present == 0 {
            0.0
        } else {
            self.count(label) as f64 / present as f64
        }
    }

    /// Most frequent label and its count. Ties go to the smallest label.
    pub fn most_common(&self) -> Option<(i64, usize)> {
        self.counts
            .iter()
            .fold(None, |best, (&label, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((label, count)),
            })
    }

    /// `share(k)` for `k` in `0..num_classes`.
    pub fn class_fracs(&self, num_classes: usize) -> Vec<f64> {
        (0..num_classes as i64).map(|k| self.share(k)).collect()
    }

    pub fn labels(&self) -> impl Iterator<Item = i64> + '_ {
        self.counts.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_shares() {
        let dist = LabelDistribution::from_labels(&[Some(0), Some(2), Some(2), None, Some(1)]);
        assert_eq!(dist.present(), 4);
        assert_eq!(dist.missing(), 1);
        assert_eq!(dist.count(2), 2);
        assert_eq!(dist.share(2), 0.5);
        assert_eq!(dist.share(3), 0.0);
        assert_eq!(dist.labels().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_most_common_breaks_ties_low() {
        let dist = LabelDistribution::from_labels(&[Some(3), Some(1), Some(3), Some(1), Some(2)]);
        assert_eq!(dist.most_common(), Some((1, 2)));

        assert_eq!(LabelDistribution::from_labels(&[None, None]).most_common(), None);
    }

    #[test]
    fn test_class_fracs_include_out_of_range_in_denominator() {
        let dist = LabelDistribution::from_labels(&[Some(0), Some(1), Some(7), Some(0)]);
        assert_eq!(dist.class_fracs(4), vec![0.5, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_distribution() {
        let dist = LabelDistribution::from_labels(&[None]);
        assert!(dist.is_empty());
        assert_eq!(dist.class_fracs(4), vec![0.0; 4]);
    }
}
