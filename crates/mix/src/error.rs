//! Error types for confounder recovery.

use confound_mdp::MdpError;
use confound_prob::ProbError;
use thiserror::Error;

/// Errors that can occur while fingerprinting, clustering or fitting a
/// mixture.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MixError {
    #[error(transparent)]
    Prob(#[from] ProbError),

    #[error(transparent)]
    Mdp(#[from] MdpError),

    /// Two inputs that must agree on a dimension do not.
    #[error("Shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A cluster label is not below the number of clusters.
    #[error("Label {label} out of range for {k} clusters")]
    InvalidLabel { label: usize, k: usize },

    /// Fewer points than requested clusters.
    #[error("Cannot form {k} clusters from {n} points")]
    TooFewPoints { n: usize, k: usize },

    /// A configuration value is out of its valid range.
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}
