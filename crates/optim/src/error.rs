//! Error types for optimization problems.

use thiserror::Error;

/// Errors raised for malformed problems. A solve that merely fails to
/// converge is not an error: it returns a [`Solution`](crate::Solution)
/// with `success == false`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimError {
    /// A vector does not match the problem dimension.
    #[error("Dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A lower bound exceeds its upper bound.
    #[error("Invalid bounds at index {index}: [{lower}, {upper}]")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },

    /// No point satisfies the constraints.
    #[error("Problem is infeasible: residual {residual}")]
    Infeasible { residual: f64 },

    /// The objective evaluated to NaN or infinity.
    #[error("Objective is not finite at the returned point")]
    NonFiniteObjective,
}
