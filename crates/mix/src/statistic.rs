//! Pairwise trajectory statistic.
//!
//! ```text
//!   stat[i, j] = max_(s,a) Σ_k (p1[i,s,a,k] − p1[j,s,a,k]) · (p2[i,s,a,k] − p2[j,s,a,k])
//! ```
//!
//! where `p1`, `p2` are the half fingerprints projected onto the cell's
//! subspace. Two trajectories from the same class have independent halves
//! with equal means, so every cell term is centered at zero; a large term in
//! any single cell marks them as coming from different classes. The
//! maximum, not the sum, is what makes the statistic sensitive to one
//! sharply different cell.
//!
//! The projection is a batch of per-cell products `H[s,a] · V[s,a]`, run
//! through a [`BatchedMatmul`] strategy. Rows of the statistic are fanned
//! out over a [`ParallelMap`].

use confound_mdp::ParallelMap;
use nalgebra::DMatrix;

use crate::error::MixError;
use crate::fingerprint::{Fingerprints, HalfFingerprints};
use crate::subspace::Subspace;

/// Batched matrix product `out[b] = lhs[b] · rhs[b]`.
pub trait BatchedMatmul {
    fn matmul(&self, lhs: &[DMatrix<f64>], rhs: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>, MixError>;
}

fn check_batch(lhs: &[DMatrix<f64>], rhs: &[DMatrix<f64>]) -> Result<(), MixError> {
    if lhs.len() != rhs.len() {
        return Err(MixError::ShapeMismatch {
            what: "batch size",
            expected: lhs.len(),
            got: rhs.len(),
        });
    }
    for (l, r) in lhs.iter().zip(rhs) {
        if l.ncols() != r.nrows() {
            return Err(MixError::ShapeMismatch {
                what: "inner dimension",
                expected: l.ncols(),
                got: r.nrows(),
            });
        }
    }
    Ok(())
}

/// Triple loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveMatmul;

impl BatchedMatmul for NaiveMatmul {
    fn matmul(&self, lhs: &[DMatrix<f64>], rhs: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>, MixError> {
        check_batch(lhs, rhs)?;
        Ok(lhs
            .iter()
            .zip(rhs)
            .map(|(l, r)| {
                let mut out = DMatrix::zeros(l.nrows(), r.ncols());
                for i in 0..l.nrows() {
                    for j in 0..r.ncols() {
                        let mut acc = 0.0;
                        for k in 0..l.ncols() {
                            acc += l[(i, k)] * r[(k, j)];
                        }
                        out[(i, j)] = acc;
                    }
                }
                out
            })
            .collect())
    }
}

/// nalgebra GEMM.
#[derive(Debug, Clone, Copy, Default)]
pub struct NalgebraMatmul;

impl BatchedMatmul for NalgebraMatmul {
    fn matmul(&self, lhs: &[DMatrix<f64>], rhs: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>, MixError> {
        check_batch(lhs, rhs)?;
        Ok(lhs.iter().zip(rhs).map(|(l, r)| l * r).collect())
    }
}

/// Space the fingerprints are compared in.
#[derive(Debug, Clone, Copy)]
pub enum Projection<'a> {
    /// Per-cell subspace bases.
    Subspace(&'a Subspace),
    /// Raw fingerprints.
    Identity,
}

impl Projection<'_> {
    fn apply<B: BatchedMatmul + ?Sized>(
        &self,
        h: &Fingerprints,
        backend: &B,
    ) -> Result<Vec<DMatrix<f64>>, MixError> {
        match self {
            Projection::Identity => Ok(h.cells.clone()),
            Projection::Subspace(subspace) => {
                if subspace.bases.len() != h.n_cells() {
                    return Err(MixError::ShapeMismatch {
                        what: "subspace cells",
                        expected: h.n_cells(),
                        got: subspace.bases.len(),
                    });
                }
                backend.matmul(&h.cells, &subspace.bases)
            }
        }
    }
}

/// Symmetric `n × n` statistic with a zero diagonal.
pub fn compute_stat<B, E>(
    halves: &HalfFingerprints,
    projection: Projection<'_>,
    backend: &B,
    executor: &E,
) -> Result<DMatrix<f64>, MixError>
where
    B: BatchedMatmul + ?Sized,
    E: ParallelMap,
{
    let p1 = projection.apply(&halves.first, backend)?;
    let p2 = projection.apply(&halves.second, backend)?;
    let n = halves.n_trajectories();

    let rows = executor.map((0..n).collect(), |_, i| {
        let mut row = vec![0.0; n];
        for (j, out) in row.iter_mut().enumerate() {
            if i == j {
                continue;
            }
            *out = p1
                .iter()
                .zip(&p2)
                .map(|(a, b)| {
                    let d1 = a.row(i) - a.row(j);
                    let d2 = b.row(i) - b.row(j);
                    d1.dot(&d2)
                })
                .fold(f64::NEG_INFINITY, f64::max);
        }
        row
    });

    Ok(DMatrix::from_fn(n, n, |i, j| rows[i][j]))
}
