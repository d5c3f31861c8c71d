//! Markov kernels (stochastic maps) between finite sets.

use serde::{Deserialize, Serialize};

use crate::dist::{check_simplex, dot, Dist};
use crate::error::ProbError;

/// A Markov kernel (stochastic map) from a finite set X to a finite set Y.
///
/// Represented as a row-stochastic matrix where:
/// - `k[i][j]` = P(output = j | input = i)
/// - Each row sums to 1
///
/// Transition kernels (`state → next state`) and tabular policies
/// (`state → action`) are both kernels.
///
/// # Example
///
/// ```rust
/// use confound_prob::Kernel;
///
/// let channel = Kernel::new(vec![
///     vec![0.9, 0.1],
///     vec![0.1, 0.9],
/// ]).unwrap();
///
/// // expected payoff of each input when output 1 pays 1
/// let payoff = channel.expect(&[0.0, 1.0]).unwrap();
/// assert!((payoff[0] - 0.1).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    /// Row-stochastic matrix: `k[i][j]` = P(output=j | input=i)
    pub k: Vec<Vec<f64>>,
    /// Number of input states
    pub n_inputs: usize,
    /// Number of output states
    pub n_outputs: usize,
}

impl Kernel {
    /// Create a new kernel from a row-stochastic matrix.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The matrix is empty
    /// - Rows have different lengths
    /// - Any row is not a probability simplex (within tolerance)
    pub fn new(k: Vec<Vec<f64>>) -> Result<Self, ProbError> {
        if k.is_empty() {
            return Err(ProbError::EmptyKernel);
        }

        let n_inputs = k.len();
        let n_outputs = k[0].len();

        if n_outputs == 0 {
            return Err(ProbError::EmptyKernel);
        }

        for (i, row) in k.iter().enumerate() {
            if row.len() != n_outputs {
                return Err(ProbError::RaggedKernel {
                    row: i,
                    expected: n_outputs,
                    got: row.len(),
                });
            }
            check_simplex(row).map_err(|e| match e {
                ProbError::NotNormalized { sum } => ProbError::RowNotNormalized { row: i, sum },
                other => other,
            })?;
        }

        Ok(Self {
            k,
            n_inputs,
            n_outputs,
        })
    }

    /// Build a kernel from non-negative row weights, normalizing each row.
    ///
    /// Rows whose weights sum to zero become uniform. This is the single
    /// fallback rule used for unobserved cells across every estimator.
    pub fn from_counts(counts: Vec<Vec<f64>>) -> Result<Self, ProbError> {
        if counts.is_empty() {
            return Err(ProbError::EmptyKernel);
        }
        let n_outputs = counts[0].len();
        if n_outputs == 0 {
            return Err(ProbError::EmptyKernel);
        }

        let mut k = Vec::with_capacity(counts.len());
        for (i, row) in counts.into_iter().enumerate() {
            if row.len() != n_outputs {
                return Err(ProbError::RaggedKernel {
                    row: i,
                    expected: n_outputs,
                    got: row.len(),
                });
            }
            if let Some(&value) = row.iter().find(|&&x| x < 0.0 || x.is_nan()) {
                return Err(ProbError::NegativeProbability { value });
            }
            let sum: f64 = row.iter().sum();
            if sum > 0.0 {
                k.push(row.iter().map(|x| x / sum).collect());
            } else {
                k.push(vec![1.0 / n_outputs as f64; n_outputs]);
            }
        }

        Ok(Self {
            n_inputs: k.len(),
            k,
            n_outputs,
        })
    }

    /// Create the identity kernel: deterministically map i to i.
    pub fn identity(n: usize) -> Self {
        Self::deterministic(n, n, |i| i)
    }

    /// Create a deterministic kernel from a function.
    ///
    /// Each input i maps to output f(i) with probability 1.
    pub fn deterministic<F>(n_inputs: usize, n_outputs: usize, f: F) -> Self
    where
        F: Fn(usize) -> usize,
    {
        let k: Vec<Vec<f64>> = (0..n_inputs)
            .map(|i| {
                let j = f(i);
                assert!(
                    j < n_outputs,
                    "Function output {} >= n_outputs {}",
                    j,
                    n_outputs
                );
                let mut row = vec![0.0; n_outputs];
                row[j] = 1.0;
                row
            })
            .collect();
        Self {
            k,
            n_inputs,
            n_outputs,
        }
    }

    /// Create a kernel whose every row is the given distribution.
    pub fn constant(n_inputs: usize, dist: &Dist) -> Self {
        Self {
            k: vec![dist.p.clone(); n_inputs],
            n_inputs,
            n_outputs: dist.len(),
        }
    }

    /// Create a uniform kernel: each input maps to uniform distribution over outputs.
    pub fn uniform(n_inputs: usize, n_outputs: usize) -> Self {
        Self::constant(n_inputs, &Dist::uniform(n_outputs))
    }

    /// Row `i` as a slice: P(· | input = i).
    pub fn row(&self, i: usize) -> &[f64] {
        &self.k[i]
    }

    /// Conditional expectation of `values` per input: `(K v)[i] = Σⱼ K[i,j] · v[j]`.
    pub fn expect(&self, values: &[f64]) -> Result<Vec<f64>, ProbError> {
        if values.len() != self.n_outputs {
            return Err(ProbError::ShapeMismatch {
                what: "values over kernel outputs",
                expected: self.n_outputs,
                got: values.len(),
            });
        }
        Ok(self.k.iter().map(|row| dot(row, values)).collect())
    }

    /// Convex combination `Σ_u w[u] · kernels[u]` of equally-shaped kernels.
    pub fn mixture(kernels: &[Kernel], weights: &Dist) -> Result<Kernel, ProbError> {
        if kernels.len() != weights.len() {
            return Err(ProbError::ShapeMismatch {
                what: "mixture components",
                expected: weights.len(),
                got: kernels.len(),
            });
        }
        let first = kernels.first().ok_or(ProbError::EmptyKernel)?;
        let mut k = vec![vec![0.0; first.n_outputs]; first.n_inputs];
        for (kernel, &w) in kernels.iter().zip(&weights.p) {
            if kernel.n_inputs != first.n_inputs || kernel.n_outputs != first.n_outputs {
                return Err(ProbError::ShapeMismatch {
                    what: "mixture component entries",
                    expected: first.n_inputs * first.n_outputs,
                    got: kernel.n_inputs * kernel.n_outputs,
                });
            }
            for (acc_row, row) in k.iter_mut().zip(&kernel.k) {
                for (acc, &x) in acc_row.iter_mut().zip(row) {
                    *acc += w * x;
                }
            }
        }
        Ok(Kernel {
            k,
            n_inputs: first.n_inputs,
            n_outputs: first.n_outputs,
        })
    }

    /// Largest absolute entrywise difference to another kernel.
    pub fn max_abs_diff(&self, other: &Kernel) -> f64 {
        self.k
            .iter()
            .zip(&other.k)
            .flat_map(|(a, b)| a.iter().zip(b).map(|(x, y)| (x - y).abs()))
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PROB_TOLERANCE;

    #[test]
    fn test_kernel_new_valid() {
        let k = Kernel::new(vec![vec![0.3, 0.7], vec![0.5, 0.5]]).unwrap();
        assert_eq!(k.n_inputs, 2);
        assert_eq!(k.n_outputs, 2);
    }

    #[test]
    fn test_kernel_row_not_normalized() {
        let result = Kernel::new(vec![vec![0.3, 0.7], vec![0.5, 0.6]]);
        assert!(matches!(
            result,
            Err(ProbError::RowNotNormalized { row: 1, .. })
        ));
    }

    #[test]
    fn test_kernel_ragged() {
        let result = Kernel::new(vec![vec![1.0], vec![0.5, 0.5]]);
        assert!(matches!(
            result,
            Err(ProbError::RaggedKernel { row: 1, expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_from_counts_uniform_fallback() {
        let k = Kernel::from_counts(vec![vec![1.0, 3.0], vec![0.0, 0.0]]).unwrap();
        assert!((k.k[0][1] - 0.75).abs() < 1e-12);
        assert!((k.k[1][0] - 0.5).abs() < 1e-12);
        assert!((k.k[1][1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_identity_max_abs_diff() {
        let k = Kernel::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert!(Kernel::identity(2).max_abs_diff(&k) < PROB_TOLERANCE);
    }

    #[test]
    fn test_expect() {
        let k = Kernel::new(vec![vec![0.5, 0.5], vec![0.0, 1.0]]).unwrap();
        let v = k.expect(&[2.0, 4.0]).unwrap();
        assert!((v[0] - 3.0).abs() < 1e-12);
        assert!((v[1] - 4.0).abs() < 1e-12);
        assert!(matches!(
            k.expect(&[1.0]),
            Err(ProbError::ShapeMismatch { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_mixture_is_stochastic() {
        let a = Kernel::identity(2);
        let b = Kernel::uniform(2, 2);
        let w = Dist::new(vec![0.5, 0.5]).unwrap();
        let m = Kernel::mixture(&[a, b], &w).unwrap();
        assert!((m.k[0][0] - 0.75).abs() < 1e-12);
        assert!(Kernel::new(m.k.clone()).is_ok());
    }
}
