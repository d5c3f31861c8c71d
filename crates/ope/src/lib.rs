//! # Confound OPE - Off-policy evaluation under confounding
//!
//! Estimators of the value of an evaluation policy from data logged by a
//! confounded behavior policy:
//!
//! | Estimator | Module | Uses the confounder |
//! |---|---|---|
//! | IS / WIS | [`importance`] | no |
//! | FQE | [`fqe`] | no |
//! | Reweighted FQE | [`fqe`] | yes, through `pi_b(a|u,s)` |
//! | Bound-reweighted FQE | [`fqe`] | no, weights clipped to a bound |
//! | Worst-case FQE | [`robust`] | no, minimizes over consistent models |
//! | Biased Bellman oracle | [`oracle`] | true model |
//!
//! Worst-case FQE returns a pessimistic estimate: every sweep is at most the
//! corresponding FQE sweep.
//!
//! ## Example
//!
//! ```rust
//! use confound_mdp::envs::toy227;
//! use confound_mdp::{collect_sample, SamplingConfig, Sequential, TabularPolicy};
//! use confound_ope::{fitted_q_evaluation, worst_case_fqe, FqeConfig, RobustConfig, WorstCase};
//!
//! let env = toy227(0.5, 0.1).unwrap();
//! let data = collect_sample(&env.mdp, &env.behavior, &SamplingConfig::new(200, 10)).unwrap();
//! let pi_e = TabularPolicy::uniform(3, 2);
//!
//! let fqe = FqeConfig::new(0.9, 10);
//! let naive = fitted_q_evaluation(&pi_e, &data, &fqe).unwrap();
//! let robust = worst_case_fqe(
//!     &pi_e,
//!     &data,
//!     &env.mdp.u_dist,
//!     WorstCase::Sensitivity { gamma_bound: 2.0 },
//!     &fqe,
//!     &RobustConfig::default(),
//!     &Sequential,
//! )
//! .unwrap();
//! assert!(robust.q.get(0, 0) <= naive.get(0, 0) + 1e-9);
//! ```

mod cells;
mod error;
pub mod fqe;
pub mod importance;
pub mod oracle;
pub mod robust;

pub use cells::sensitivity_interval;
pub use error::OpeError;
pub use fqe::{
    bound_reweighted_fqe, bound_reweighted_update, fitted_q_evaluation, fitted_q_update,
    next_state_values, policy_value, reweighted_fqe, reweighted_q_update, FqeConfig,
};
pub use importance::{importance_sampling, importance_weights, weighted_importance_sampling};
pub use oracle::{biased_bellman_eval, biased_bellman_update};
pub use robust::{
    worst_case_fqe, CellFailure, CellSolution, FailurePolicy, RobustConfig, RobustReport,
    WorstCase, WorstCaseFqe,
};
