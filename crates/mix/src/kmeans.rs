//! Lloyd's k-means with k-means++ seeding.
//!
//! Points are the rows of a matrix. The best of `n_init` seeded runs by
//! inertia (sum of squared distances to the assigned centroid) is kept.

use confound_prob::Sampler;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::MixError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    /// Independent seeded runs.
    pub n_init: usize,
    pub max_iter: usize,
    /// Stop when no centroid moves more than this (squared).
    pub tol: f64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
        }
    }
}

impl KMeansConfig {
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    pub labels: Vec<usize>,
    /// `k × dim` centroid rows.
    pub centroids: DMatrix<f64>,
    pub inertia: f64,
    pub iterations: usize,
}

fn squared_distance(points: &DMatrix<f64>, i: usize, centroids: &DMatrix<f64>, c: usize) -> f64 {
    (points.row(i) - centroids.row(c)).norm_squared()
}

/// Index and squared distance of the closest centroid.
fn nearest(points: &DMatrix<f64>, i: usize, centroids: &DMatrix<f64>) -> (usize, f64) {
    (0..centroids.nrows())
        .map(|c| (c, squared_distance(points, i, centroids, c)))
        .fold((0, f64::INFINITY), |best, cand| if cand.1 < best.1 { cand } else { best })
}

fn seed_plus_plus<S: Sampler + ?Sized>(
    points: &DMatrix<f64>,
    k: usize,
    sampler: &mut S,
) -> Result<DMatrix<f64>, MixError> {
    let n = points.nrows();
    let mut centroids = DMatrix::zeros(k, points.ncols());
    let first = sampler.categorical(&vec![1.0 / n as f64; n])?;
    centroids.set_row(0, &points.row(first));

    let mut dist: Vec<f64> = (0..n).map(|i| squared_distance(points, i, &centroids, 0)).collect();
    for c in 1..k {
        let total: f64 = dist.iter().sum();
        let next = if total > 0.0 {
            let p: Vec<f64> = dist.iter().map(|d| d / total).collect();
            sampler.categorical(&p)?
        } else {
            // every point coincides with a centroid
            sampler.categorical(&vec![1.0 / n as f64; n])?
        };
        centroids.set_row(c, &points.row(next));
        for (i, d) in dist.iter_mut().enumerate() {
            *d = d.min(squared_distance(points, i, &centroids, c));
        }
    }
    Ok(centroids)
}

fn lloyd(points: &DMatrix<f64>, mut centroids: DMatrix<f64>, config: &KMeansConfig) -> KMeansResult {
    let (n, k) = (points.nrows(), centroids.nrows());
    let mut labels = vec![0; n];
    let mut iterations = 0;
    while iterations < config.max_iter {
        iterations += 1;
        for (i, label) in labels.iter_mut().enumerate() {
            *label = nearest(points, i, &centroids).0;
        }

        let mut sums = DMatrix::zeros(k, points.ncols());
        let mut counts = vec![0usize; k];
        for (i, &label) in labels.iter().enumerate() {
            let mut row = sums.row_mut(label);
            row += points.row(i);
            counts[label] += 1;
        }
        let mut shift: f64 = 0.0;
        for c in 0..k {
            // empty clusters keep their centroid
            if counts[c] == 0 {
                continue;
            }
            let updated = sums.row(c) / counts[c] as f64;
            shift = shift.max((&updated - centroids.row(c)).norm_squared());
            centroids.set_row(c, &updated);
        }
        if shift <= config.tol {
            break;
        }
    }

    let mut inertia = 0.0;
    for (i, label) in labels.iter_mut().enumerate() {
        let (c, d) = nearest(points, i, &centroids);
        *label = c;
        inertia += d;
    }
    KMeansResult {
        labels,
        centroids,
        inertia,
        iterations,
    }
}

/// Cluster the rows of `points` into `k` groups.
pub fn kmeans<S: Sampler + ?Sized>(
    points: &DMatrix<f64>,
    k: usize,
    config: &KMeansConfig,
    sampler: &mut S,
) -> Result<KMeansResult, MixError> {
    let n = points.nrows();
    if k == 0 || n < k {
        return Err(MixError::TooFewPoints { n, k });
    }
    let mut best: Option<KMeansResult> = None;
    for _ in 0..config.n_init.max(1) {
        let init = seed_plus_plus(points, k, sampler)?;
        let run = lloyd(points, init, config);
        if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }
    best.ok_or(MixError::TooFewPoints { n, k })
}
