//! Empirical statistics of a logged dataset.
//!
//! Counts, reward sums and the empirical model `(P̂, π̂, R̂)` that every
//! estimator in the workspace reads. The confounder field of each
//! transition is never read here except by
//! [`empirical_confounder_frequency`], which exists for oracle diagnostics.
//!
//! # Unobserved cells
//!
//! A `(state, action)` pair with no data is not an error. Its transition
//! row in [`EmpiricalModel::p_hat`] is uniform over next states, a state
//! with no data gets a uniform row in [`EmpiricalModel::pi_hat`], and
//! unobserved rewards are zero. This substitution lives in
//! [`Kernel::from_counts`] and is the only fallback any estimator uses.

use confound_prob::Kernel;
use serde::{Deserialize, Serialize};

use crate::error::MdpError;
use crate::model::RewardTensor;
use crate::policy::TabularPolicy;
use crate::rollout::Dataset;

/// Visit counts `N[s][a]`, skipping the first `burnin` steps of every
/// trajectory.
pub fn count_sa(dataset: &Dataset, burnin: usize) -> Vec<Vec<f64>> {
    let mut n = vec![vec![0.0; dataset.n_actions]; dataset.n_states];
    for traj in &dataset.trajectories {
        for t in traj.steps.iter().skip(burnin) {
            n[t.state][t.action] += 1.0;
        }
    }
    n
}

/// Reward sums `R[s][a]`.
pub fn reward_sums(dataset: &Dataset) -> Vec<Vec<f64>> {
    let mut r = vec![vec![0.0; dataset.n_actions]; dataset.n_states];
    for t in dataset.transitions() {
        r[t.state][t.action] += t.reward;
    }
    r
}

/// Transition counts `N[a][s][s']`.
pub fn count_asp(dataset: &Dataset) -> Vec<Vec<Vec<f64>>> {
    let n = dataset.n_states;
    let mut counts = vec![vec![vec![0.0; n]; n]; dataset.n_actions];
    for t in dataset.transitions() {
        counts[t.action][t.state][t.next_state] += 1.0;
    }
    counts
}

/// Empirical transition kernels `P̂[a]`, uniform where `(s, a)` is unobserved.
pub fn estimate_transitions(dataset: &Dataset) -> Result<Vec<Kernel>, MdpError> {
    count_asp(dataset)
        .into_iter()
        .map(|counts| Kernel::from_counts(counts).map_err(MdpError::from))
        .collect()
}

/// Empirical flat behavior policy `π̂[s][a]`, uniform where `s` is unobserved.
pub fn estimate_policy(dataset: &Dataset) -> Result<TabularPolicy, MdpError> {
    Ok(TabularPolicy {
        pi: Kernel::from_counts(count_sa(dataset, 0))?,
    })
}

/// Mean observed reward `R̂[a][s][s']`, zero where unobserved.
pub fn estimate_rewards(dataset: &Dataset) -> RewardTensor {
    let n = dataset.n_states;
    let mut sums = vec![vec![vec![0.0; n]; n]; dataset.n_actions];
    let counts = count_asp(dataset);
    for t in dataset.transitions() {
        sums[t.action][t.state][t.next_state] += t.reward;
    }
    for (sum_a, count_a) in sums.iter_mut().zip(&counts) {
        for (sum_s, count_s) in sum_a.iter_mut().zip(count_a) {
            for (x, &c) in sum_s.iter_mut().zip(count_s) {
                if c > 0.0 {
                    *x /= c;
                }
            }
        }
    }
    sums
}

/// Empirical frequency of each confounder value given `(s, a)`.
///
/// Returns one `action → confounder` kernel per state, uniform where
/// `(s, a)` is unobserved. Reads the confounder field, so only oracle
/// diagnostics may use it.
pub fn empirical_confounder_frequency(
    dataset: &Dataset,
    n_confound: usize,
) -> Result<Vec<Kernel>, MdpError> {
    let mut counts = vec![vec![vec![0.0; n_confound]; dataset.n_actions]; dataset.n_states];
    for t in dataset.transitions() {
        if t.confounder >= n_confound {
            return Err(MdpError::InvalidConfounder {
                confounder: t.confounder,
                n_confound,
            });
        }
        counts[t.state][t.action][t.confounder] += 1.0;
    }
    counts
        .into_iter()
        .map(|c| Kernel::from_counts(c).map_err(MdpError::from))
        .collect()
}

/// The empirical model of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalModel {
    /// `P̂[a]`: empirical next-state kernel per action.
    pub p_hat: Vec<Kernel>,
    /// `π̂`: empirical flat behavior policy.
    pub pi_hat: TabularPolicy,
    /// `R̂[a][s][s']`: mean observed reward.
    pub r_hat: RewardTensor,
    /// `N[s][a]`: visit counts.
    pub n_sa: Vec<Vec<f64>>,
    /// Number of trajectories the model was estimated from.
    pub n_trajectories: usize,
}

impl EmpiricalModel {
    pub fn estimate(dataset: &Dataset) -> Result<Self, MdpError> {
        if dataset.is_empty() {
            return Err(MdpError::EmptyDataset);
        }
        Ok(Self {
            p_hat: estimate_transitions(dataset)?,
            pi_hat: estimate_policy(dataset)?,
            r_hat: estimate_rewards(dataset),
            n_sa: count_sa(dataset, 0),
            n_trajectories: dataset.len(),
        })
    }

    /// Whether `(state, action)` appears in the data.
    pub fn is_observed(&self, state: usize, action: usize) -> bool {
        self.n_sa[state][action] > 0.0
    }

    /// Sampling-error tolerance `1 / √n` for matching the empirical model.
    pub fn sampling_tolerance(&self) -> f64 {
        1.0 / (self.n_trajectories as f64).sqrt()
    }
}
