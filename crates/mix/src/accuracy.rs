//! Label-permutation-invariant clustering scores.
//!
//! Recovered cluster indices carry no correspondence to confounder values,
//! so accuracy is the best match over all `k!` relabelings. For `k = 2`
//! this is `max(mean(labels == truth), mean(labels != truth))`.

use confound_prob::Sampler;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::MixError;
use crate::kmeans::KMeansConfig;
use crate::spectral::threshold_clusters;

/// Largest `k` accepted by [`cluster_accuracy`].
pub const MAX_PERMUTATION_K: usize = 8;

fn check_labels(labels: &[usize], k: usize) -> Result<(), MixError> {
    match labels.iter().find(|&&label| label >= k) {
        Some(&label) => Err(MixError::InvalidLabel { label, k }),
        None => Ok(()),
    }
}

/// Every permutation of `0..k` (Heap's algorithm).
fn permutations(k: usize) -> Vec<Vec<usize>> {
    let mut perm: Vec<usize> = (0..k).collect();
    let mut out = vec![perm.clone()];
    let mut c = vec![0; k];
    let mut i = 1;
    while i < k {
        if c[i] < i {
            if i % 2 == 0 {
                perm.swap(0, i);
            } else {
                perm.swap(c[i], i);
            }
            out.push(perm.clone());
            c[i] += 1;
            i = 1;
        } else {
            c[i] = 0;
            i += 1;
        }
    }
    out
}

/// Best fraction of `labels` matching `truth` over all relabelings.
pub fn cluster_accuracy(labels: &[usize], truth: &[usize], k: usize) -> Result<f64, MixError> {
    if labels.len() != truth.len() {
        return Err(MixError::ShapeMismatch {
            what: "reference labels",
            expected: labels.len(),
            got: truth.len(),
        });
    }
    if labels.is_empty() {
        return Err(MixError::TooFewPoints { n: 0, k });
    }
    if k == 0 || k > MAX_PERMUTATION_K {
        return Err(MixError::InvalidParameter {
            name: "k",
            reason: format!("{k} is outside [1, {MAX_PERMUTATION_K}]"),
        });
    }
    check_labels(labels, k)?;
    check_labels(truth, k)?;

    // confusion[l][t] = #{i : labels_i = l, truth_i = t}
    let mut confusion = vec![vec![0usize; k]; k];
    for (&l, &t) in labels.iter().zip(truth) {
        confusion[l][t] += 1;
    }
    let best = permutations(k)
        .iter()
        .map(|perm| perm.iter().enumerate().map(|(l, &t)| confusion[l][t]).sum::<usize>())
        .max()
        .unwrap_or(0);
    Ok(best as f64 / labels.len() as f64)
}

/// Share of points in the largest cluster.
pub fn max_cluster_weight(labels: &[usize], k: usize) -> Result<f64, MixError> {
    if labels.is_empty() {
        return Err(MixError::TooFewPoints { n: 0, k });
    }
    check_labels(labels, k)?;
    let mut counts = vec![0usize; k];
    for &l in labels {
        counts[l] += 1;
    }
    let largest = counts.into_iter().max().unwrap_or(0);
    Ok(largest as f64 / labels.len() as f64)
}

/// Clustering quality at one threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDiagnostic {
    pub threshold: f64,
    pub accuracy: f64,
    pub max_cluster_weight: f64,
}

/// `lo, lo + step, ...` strictly below `hi`.
pub fn threshold_grid(lo: f64, hi: f64, step: f64) -> Result<Vec<f64>, MixError> {
    if step.is_nan() || step <= 0.0 {
        return Err(MixError::InvalidParameter {
            name: "step",
            reason: format!("{step} is not positive"),
        });
    }
    let n = ((hi - lo) / step).ceil().max(0.0) as usize;
    Ok((0..n).map(|i| lo + i as f64 * step).collect())
}

/// Cluster `stat` at every threshold and score against `truth`.
pub fn cluster_diagnostics<S: Sampler + ?Sized>(
    stat: &DMatrix<f64>,
    truth: &[usize],
    k: usize,
    thresholds: &[f64],
    config: &KMeansConfig,
    sampler: &mut S,
) -> Result<Vec<ThresholdDiagnostic>, MixError> {
    thresholds
        .iter()
        .map(|&threshold| {
            let labels = threshold_clusters(stat, threshold, k, config, sampler)?;
            Ok(ThresholdDiagnostic {
                threshold,
                accuracy: cluster_accuracy(&labels, truth, k)?,
                max_cluster_weight: max_cluster_weight(&labels, k)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use confound_prob::SeededSampler;
    use proptest::prelude::*;

    #[test]
    fn test_permutation_count() {
        assert_eq!(permutations(1).len(), 1);
        assert_eq!(permutations(3).len(), 6);
        let mut all = permutations(4);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 24);
    }

    #[test]
    fn test_three_cluster_relabeling() {
        let truth = [0, 0, 1, 1, 2, 2];
        let labels = [2, 2, 0, 0, 1, 0];
        assert!((cluster_accuracy(&labels, &truth, 3).unwrap() - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(
            cluster_accuracy(&[0, 2], &[0, 1], 2),
            Err(MixError::InvalidLabel { label: 2, k: 2 })
        );
        assert!(cluster_accuracy(&[0], &[0, 1], 2).is_err());
        assert!(threshold_grid(0.0, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_max_cluster_weight() {
        assert_eq!(max_cluster_weight(&[0, 1, 1, 1], 2).unwrap(), 0.75);
    }

    #[test]
    fn test_threshold_grid() {
        let grid = threshold_grid(0.0, 0.3, 0.1).unwrap();
        assert_eq!(grid.len(), 3);
        assert!((grid[2] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_diagnostics_on_block_statistic() {
        let stat = DMatrix::from_fn(6, 6, |i, j| {
            if i == j {
                0.0
            } else if (i < 3) == (j < 3) {
                0.0
            } else {
                1.0
            }
        });
        let truth = [1, 1, 1, 0, 0, 0];
        let mut s = SeededSampler::new(5);
        let diag = cluster_diagnostics(&stat, &truth, 2, &[0.5], &KMeansConfig::default(), &mut s)
            .unwrap();
        assert_eq!(diag[0].accuracy, 1.0);
        assert_eq!(diag[0].max_cluster_weight, 0.5);
    }

    proptest! {
        #[test]
        fn test_binary_accuracy_invariant_to_flip(
            pairs in prop::collection::vec((0usize..2, 0usize..2), 1..40)
        ) {
            let labels: Vec<usize> = pairs.iter().map(|p| p.0).collect();
            let truth: Vec<usize> = pairs.iter().map(|p| p.1).collect();
            let flipped: Vec<usize> = labels.iter().map(|l| 1 - l).collect();
            let a = cluster_accuracy(&labels, &truth, 2).unwrap();
            let b = cluster_accuracy(&flipped, &truth, 2).unwrap();
            prop_assert!((a - b).abs() < 1e-12);

            let n = labels.len() as f64;
            let same = labels.iter().zip(&truth).filter(|(l, t)| l == t).count() as f64 / n;
            prop_assert!((a - same.max(1.0 - same)).abs() < 1e-12);
        }
    }
}
