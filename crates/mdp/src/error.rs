//! Error types for confounded MDP operations.

use confound_prob::ProbError;
use thiserror::Error;

/// Errors that can occur when building, simulating or summarizing an MDP.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MdpError {
    /// A probability vector failed validation.
    #[error(transparent)]
    Prob(#[from] ProbError),

    /// Two tensors that must agree on a dimension do not.
    #[error("Shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Discount factor outside `[0, 1)`.
    #[error("Discount factor must lie in [0, 1): got {gamma}")]
    InvalidDiscount { gamma: f64 },

    /// Action index out of range.
    #[error("Action {action} out of range for {n_actions} actions")]
    InvalidAction { action: usize, n_actions: usize },

    /// State index out of range.
    #[error("State {state} out of range for {n_states} states")]
    InvalidState { state: usize, n_states: usize },

    /// Confounder index out of range.
    #[error("Confounder {confounder} out of range for {n_confound} values")]
    InvalidConfounder { confounder: usize, n_confound: usize },

    /// `step` was called before a confounder was assigned.
    #[error("No confounder assigned for the current step")]
    ConfounderUnassigned,

    /// A dataset with no trajectories was supplied.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Trajectories in one dataset have different lengths.
    #[error("Trajectory {index} has length {len}, expected {expected}")]
    RaggedDataset {
        index: usize,
        len: usize,
        expected: usize,
    },

    /// An environment parameter is out of its valid range.
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}
