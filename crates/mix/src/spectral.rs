//! Spectral clustering of a thresholded trajectory statistic.
//!
//! ```text
//!   stat ──(stat < τ)──▶ A ──▶ D^-1/2 A D^-1/2 ──top k──▶ V / √d ──k-means──▶ labels
//! ```
//!
//! Pairs below the threshold are linked. The embedding uses the
//! eigenvectors of the normalized adjacency with the largest eigenvalues
//! (the smallest of the normalized Laplacian), rescaled by `1/√d` and with
//! a deterministic sign per column.

use confound_prob::Sampler;
use nalgebra::DMatrix;

use crate::error::MixError;
use crate::kmeans::{kmeans, KMeansConfig};
use crate::subspace::top_k;

/// 0/1 affinity linking pairs with `stat < threshold`.
pub fn affinity(stat: &DMatrix<f64>, threshold: f64) -> DMatrix<f64> {
    stat.map(|x| if x < threshold { 1.0 } else { 0.0 })
}

/// `n × k` spectral embedding of a symmetric affinity.
pub fn spectral_embedding(affinity: &DMatrix<f64>, k: usize) -> Result<DMatrix<f64>, MixError> {
    let n = affinity.nrows();
    if affinity.ncols() != n {
        return Err(MixError::ShapeMismatch {
            what: "affinity",
            expected: n,
            got: affinity.ncols(),
        });
    }
    let mut a = affinity.clone();
    a.fill_diagonal(0.0);
    // isolated points get unit degree so their rows stay zero
    let sqrt_degree: Vec<f64> = a
        .row_iter()
        .map(|row| {
            let d = row.sum();
            if d > 0.0 {
                d.sqrt()
            } else {
                1.0
            }
        })
        .collect();
    let normalized = DMatrix::from_fn(n, n, |i, j| a[(i, j)] / (sqrt_degree[i] * sqrt_degree[j]));

    let (_, mut vectors) = top_k(normalized, k)?;
    for (i, &dd) in sqrt_degree.iter().enumerate() {
        let mut row = vectors.row_mut(i);
        row /= dd;
    }
    for mut col in vectors.column_iter_mut() {
        let pivot = col.iter().copied().fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            col.neg_mut();
        }
    }
    Ok(vectors)
}

/// Cluster a symmetric affinity into `k` groups.
pub fn spectral_clustering<S: Sampler + ?Sized>(
    affinity: &DMatrix<f64>,
    k: usize,
    config: &KMeansConfig,
    sampler: &mut S,
) -> Result<Vec<usize>, MixError> {
    let n = affinity.nrows();
    if k == 0 || n < k {
        return Err(MixError::TooFewPoints { n, k });
    }
    let embedding = spectral_embedding(affinity, k)?;
    Ok(kmeans(&embedding, k, config, sampler)?.labels)
}

/// Labels from thresholding `stat` at `threshold` and clustering.
pub fn threshold_clusters<S: Sampler + ?Sized>(
    stat: &DMatrix<f64>,
    threshold: f64,
    k: usize,
    config: &KMeansConfig,
    sampler: &mut S,
) -> Result<Vec<usize>, MixError> {
    spectral_clustering(&affinity(stat, threshold), k, config, sampler)
}
