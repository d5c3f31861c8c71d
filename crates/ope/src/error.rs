//! Error types for off-policy evaluation.

use confound_mdp::MdpError;
use confound_optim::OptimError;
use confound_prob::ProbError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OpeError {
    #[error(transparent)]
    Mdp(#[from] MdpError),

    #[error(transparent)]
    Prob(#[from] ProbError),

    #[error(transparent)]
    Optim(#[from] OptimError),

    /// The behavior policy gives zero probability to an action in the data.
    #[error("Behavior policy assigns zero probability to action {action} taken in state {state}")]
    ZeroSupportImportanceWeight { state: usize, action: usize },

    /// Every importance weight is zero, so WIS is undefined.
    #[error("Importance weights sum to zero")]
    ZeroTotalWeight,

    /// No restart of a worst-case cell met the feasibility tolerance.
    #[error(
        "Worst-case program for state {state}, action {action} failed after {restarts} restarts (violation {violation})"
    )]
    OptimizationFailure {
        state: usize,
        action: usize,
        violation: f64,
        restarts: usize,
    },

    #[error("Shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}
