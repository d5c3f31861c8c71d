//! Low-rank subspaces of the fingerprint second moment.
//!
//! With `K` latent classes the expected product of the two half
//! fingerprints of a cell,
//!
//! ```text
//!   M[s, a] = E_m[ h1[m, s, a] ⊗ h2[m, s, a] ] = Σ_k w_k · P_k(·|s,a) ⊗ P_k(·|s,a)
//! ```
//!
//! has rank at most `K`. The top-`K` eigenvectors of the symmetrized
//! estimate `M + Mᵀ` span the class models of that cell; projecting
//! fingerprints onto them strips most of the sampling noise.
//!
//! | Estimate | Weighting |
//! |---|---|
//! | weighted (default) | `Σ_m h1 ⊗ h2 / Σ_m N1[m,s,a] · N2[m,s,a]` |
//! | unweighted | `mean_m h1 ⊗ h2` |

use confound_mdp::Dataset;
use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::error::MixError;
use crate::fingerprint::{split_horizon, HalfFingerprints, Normalization};

/// Configuration of the subspace estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubspaceConfig {
    /// Number of latent classes.
    pub k: usize,
    /// Weight the second moment by inverse visit counts.
    pub weighted: bool,
    pub normalization: Normalization,
}

impl Default for SubspaceConfig {
    fn default() -> Self {
        Self {
            k: 2,
            weighted: true,
            normalization: Normalization::VisitCount,
        }
    }
}

impl SubspaceConfig {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn with_weighted(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }
}

/// Eigenpairs of `m` with the `k` largest eigenvalues, largest first.
///
/// Returns the eigenvalues and an `n × k` matrix of eigenvector columns.
pub fn top_k(m: DMatrix<f64>, k: usize) -> Result<(Vec<f64>, DMatrix<f64>), MixError> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(MixError::ShapeMismatch {
            what: "symmetric matrix",
            expected: n,
            got: m.ncols(),
        });
    }
    if k == 0 || k > n {
        return Err(MixError::InvalidParameter {
            name: "k",
            reason: format!("{k} is outside [1, {n}]"),
        });
    }
    let eigen = SymmetricEigen::new(m);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[j].total_cmp(&eigen.eigenvalues[i]));
    order.truncate(k);

    let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let mut vectors = DMatrix::zeros(n, k);
    for (col, &i) in order.iter().enumerate() {
        vectors.set_column(col, &eigen.eigenvectors.column(i));
    }
    Ok((values, vectors))
}

/// Per-cell projection bases.
#[derive(Debug, Clone, PartialEq)]
pub struct Subspace {
    pub k: usize,
    pub n_states: usize,
    pub n_actions: usize,
    /// Top eigenvalues per cell, largest first.
    pub values: Vec<Vec<f64>>,
    /// `n_states × k` basis per cell, indexed `s * A + a`.
    pub bases: Vec<DMatrix<f64>>,
}

impl Subspace {
    /// Estimate the subspaces from the two half fingerprints.
    pub fn estimate(halves: &HalfFingerprints, config: &SubspaceConfig) -> Result<Self, MixError> {
        let (first, second) = (&halves.first, &halves.second);
        let n_states = first.n_states;
        let n = halves.n_trajectories();
        if n == 0 {
            return Err(MixError::TooFewPoints { n, k: config.k });
        }

        let mut values = Vec::with_capacity(first.n_cells());
        let mut bases = Vec::with_capacity(first.n_cells());
        for cell in 0..first.n_cells() {
            let (h1, h2) = (&first.cells[cell], &second.cells[cell]);
            let mut moment = h1.transpose() * h2;
            if config.weighted {
                let total: f64 = first.visits[cell]
                    .iter()
                    .zip(&second.visits[cell])
                    .map(|(a, b)| a * b)
                    .sum();
                if total > 0.0 {
                    moment.unscale_mut(total);
                } else {
                    moment.fill(0.0);
                }
            } else {
                moment.unscale_mut(n as f64);
            }
            let symmetric = &moment + moment.transpose();
            let (v, basis) = top_k(symmetric, config.k)?;
            values.push(v);
            bases.push(basis);
        }

        tracing::debug!(k = config.k, cells = bases.len(), trajectories = n, "estimated subspaces");
        Ok(Self {
            k: config.k,
            n_states,
            n_actions: first.n_actions,
            values,
            bases,
        })
    }

    /// Fingerprint `dataset` and estimate its subspaces.
    pub fn from_dataset(dataset: &Dataset, config: &SubspaceConfig) -> Result<Self, MixError> {
        let halves = HalfFingerprints::estimate(dataset, config.normalization)?;
        Self::estimate(&halves, config)
    }

    pub fn basis(&self, state: usize, action: usize) -> &DMatrix<f64> {
        &self.bases[state * self.n_actions + action]
    }
}

/// Top-`k` subspace of the per-half next-state occupancy vectors.
///
/// Occupancies ignore the `(s, a)` conditioning: `k1[m, s']` is the share
/// of steps in the first half of trajectory `m` that land in `s'`.
pub fn occupancy_subspace(dataset: &Dataset, k: usize) -> Result<(Vec<f64>, DMatrix<f64>), MixError> {
    let (first, second) = split_horizon(dataset.horizon())?;
    let occupancy = |steps: &[usize]| {
        let mut occ = DMatrix::<f64>::zeros(dataset.len(), dataset.n_states);
        for (m, traj) in dataset.trajectories.iter().enumerate() {
            for &t in steps {
                occ[(m, traj.steps[t].next_state)] += 1.0 / steps.len() as f64;
            }
        }
        occ
    };
    let (k1, k2) = (occupancy(&first), occupancy(&second));
    let mut moment = k1.transpose() * k2;
    moment.unscale_mut(dataset.len() as f64);
    top_k(&moment + moment.transpose(), k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprints;

    #[test]
    fn test_top_k_orders_eigenvalues() {
        let m = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![1.0, 3.0, 2.0]));
        let (values, vectors) = top_k(m, 2).unwrap();
        assert_eq!(values, vec![3.0, 2.0]);
        assert!((vectors[(1, 0)].abs() - 1.0).abs() < 1e-12);
        assert!((vectors[(2, 1)].abs() - 1.0).abs() < 1e-12);
        assert!(top_k(DMatrix::zeros(2, 2), 3).is_err());
    }

    fn halves(h1: Vec<[f64; 2]>, h2: Vec<[f64; 2]>) -> HalfFingerprints {
        let n = h1.len();
        let make = |rows: &[[f64; 2]]| Fingerprints {
            n_states: 2,
            n_actions: 1,
            cells: vec![
                DMatrix::from_fn(n, 2, |i, j| rows[i][j]),
                DMatrix::zeros(n, 2),
            ],
            visits: vec![vec![1.0; n], vec![0.0; n]],
        };
        HalfFingerprints {
            first: make(&h1),
            second: make(&h2),
        }
    }

    #[test]
    fn test_rank_one_moment_recovers_direction() {
        // every trajectory has the same class model [0.8, 0.2]
        let h = halves(vec![[0.8, 0.2]; 4], vec![[0.8, 0.2]; 4]);
        let s = Subspace::estimate(&h, &SubspaceConfig::new(1).with_weighted(false)).unwrap();
        let basis = s.basis(0, 0);
        let norm = (0.8f64.powi(2) + 0.2f64.powi(2)).sqrt();
        assert!((basis[(0, 0)].abs() - 0.8 / norm).abs() < 1e-9);
        assert!((basis[(1, 0)].abs() - 0.2 / norm).abs() < 1e-9);
        // an unvisited cell has a zero moment and still yields a basis
        assert_eq!(s.basis(1, 0).shape(), (2, 1));
    }

    #[test]
    fn test_weighted_moment_scales_by_visit_products() {
        let h = halves(vec![[1.0, 0.0]; 2], vec![[1.0, 0.0]; 2]);
        let weighted = Subspace::estimate(&h, &SubspaceConfig::new(1)).unwrap();
        let plain = Subspace::estimate(&h, &SubspaceConfig::new(1).with_weighted(false)).unwrap();
        // Σ h1 ⊗ h2 = 2·e0e0ᵀ; weighted divides by Σ N1·N2 = 2, plain by n = 2
        assert!((weighted.values[0][0] - 2.0).abs() < 1e-12);
        assert!((plain.values[0][0] - 2.0).abs() < 1e-12);
    }
}
