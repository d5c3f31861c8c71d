//! # Confound Mix - Recovering a latent confounder from trajectories
//!
//! When the confounder is held for a whole trajectory, the logged data is a
//! mixture of `K` Markov chains. This crate recovers the partition in two
//! complementary ways:
//!
//! ```text
//!                 ┌─────────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//!   Dataset ────▶ │ fingerprint │──▶│ subspace │──▶│ statistic │──▶│ spectral │──┐
//!                 └─────────────┘   └──────────┘   └───────────┘   └──────────┘  │ labels
//!                                                                                  ▼
//!                                                                          ┌──────────┐
//!                                                                          │    em    │──▶ ClusterModel
//!                                                                          └──────────┘
//! ```
//!
//! - [`fingerprint`]: per-trajectory next-state fingerprints of each half
//! - [`subspace`]: top-`K` eigenspaces of the fingerprint second moment
//! - [`statistic`]: the pairwise max-over-cells statistic, with a
//!   [`BatchedMatmul`] strategy for the projections
//! - [`spectral`] and [`kmeans`]: labels from the thresholded statistic
//! - [`em`]: hard or soft EM over per-class start, policy and transition
//!   models
//! - [`accuracy`]: permutation-invariant scores against known labels
//!
//! ## Example
//!
//! ```rust
//! use confound_mdp::{Dataset, Sequential, Trajectory, Transition};
//! use confound_mix::{
//!     compute_stat, run_em, threshold_clusters, ClusterAssignment, EmConfig, HalfFingerprints,
//!     KMeansConfig, NalgebraMatmul, Normalization, Projection,
//! };
//! use confound_prob::SeededSampler;
//!
//! let step = |action, next_state| Transition {
//!     state: 0,
//!     action,
//!     confounder: 0,
//!     next_state,
//!     reward: 0.0,
//! };
//! let stay = Trajectory { steps: vec![step(0, 0); 4] };
//! let leave = Trajectory { steps: vec![step(1, 1); 4] };
//! let data = Dataset::new(vec![stay.clone(), leave.clone(), stay, leave], 2, 2).unwrap();
//!
//! let halves = HalfFingerprints::estimate(&data, Normalization::VisitCount).unwrap();
//! let stat = compute_stat(&halves, Projection::Identity, &NalgebraMatmul, &Sequential).unwrap();
//!
//! let mut sampler = SeededSampler::new(0);
//! let labels = threshold_clusters(&stat, 0.5, 2, &KMeansConfig::default(), &mut sampler).unwrap();
//! let fit = run_em(&data, ClusterAssignment::Hard(labels), &EmConfig::new(2), &mut sampler, None).unwrap();
//! assert_eq!(fit.labels()[0], fit.labels()[2]);
//! ```

pub mod accuracy;
pub mod em;
mod error;
pub mod fingerprint;
pub mod kmeans;
pub mod spectral;
pub mod statistic;
pub mod subspace;

pub use accuracy::{cluster_accuracy, cluster_diagnostics, max_cluster_weight, ThresholdDiagnostic};
pub use em::{
    e_step, relabel, run_em, total_log_likelihood, ClusterAssignment, ClusterModel, EmConfig,
    EmNonConvergence, EmResult,
};
pub use error::MixError;
pub use fingerprint::{split_horizon, Fingerprints, HalfFingerprints, Normalization};
pub use kmeans::{kmeans, KMeansConfig, KMeansResult};
pub use spectral::{affinity, spectral_clustering, spectral_embedding, threshold_clusters};
pub use statistic::{compute_stat, BatchedMatmul, NaiveMatmul, NalgebraMatmul, Projection};
pub use subspace::{occupancy_subspace, Subspace, SubspaceConfig};
