//! Error types for probability operations.

use thiserror::Error;

/// A probability vector or kernel that failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbError {
    #[error("probability vector sums to {sum}, expected 1")]
    NotNormalized { sum: f64 },

    /// Also raised for NaN entries.
    #[error("probability entry {value} is negative or NaN")]
    NegativeProbability { value: f64 },

    #[error("weights sum to zero, no distribution to normalize")]
    ZeroWeights,

    #[error("distribution has no outcomes")]
    EmptyDistribution,

    #[error("kernel needs at least one input and one output")]
    EmptyKernel,

    #[error("kernel row {row} has {got} outputs, expected {expected}")]
    RaggedKernel {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("kernel row {row} sums to {sum}, expected 1")]
    RowNotNormalized { row: usize, sum: f64 },

    #[error("{what}: expected length {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

impl ProbError {
    /// Whether this error reports a probability vector that is not a simplex.
    pub fn is_invalid_distribution(&self) -> bool {
        matches!(
            self,
            ProbError::NotNormalized { .. }
                | ProbError::NegativeProbability { .. }
                | ProbError::RowNotNormalized { .. }
                | ProbError::EmptyDistribution
                | ProbError::ZeroWeights
        )
    }
}
