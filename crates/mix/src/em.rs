//! Expectation-maximization over a mixture of confounder classes.
//!
//! Every trajectory is an i.i.d. draw from one of `K` classes, each with its
//! own start distribution, policy and transition model. EM alternates
//!
//! ```text
//!   M-step: start_k, pi_k(a|s), P_k(s'|s,a), prior_k  ← weighted counts
//!   E-step: score[i,k] = log start_k(s_0) + Σ_t log pi_k(a_t|s_t) + log P_k(s_t+1|s_t,a_t)
//!                      + U[0, 1e-7) + reg · log prior_k
//! ```
//!
//! until the transition models stop moving. Hard EM assigns each trajectory
//! to its best class; soft EM keeps normalized responsibilities.
//!
//! | Assignment | Prior | Reported log-likelihood |
//! |---|---|---|
//! | [`ClusterAssignment::Hard`] | share of trajectories | `Σ_i score[i, label_i]` without prior or noise |
//! | [`ClusterAssignment::Soft`] | mean responsibility | `Σ_i log Σ_k prior_k · p_k(traj_i)` |
//!
//! Cells a class never visits fall back to uniform rows, as everywhere else.
//! Reaching the iteration cap is not an error: the last estimate is
//! returned with [`EmResult::converged`] unset and a warning is logged.

use confound_mdp::{ConfoundedPolicy, Dataset, Trajectory, Transition};
use confound_prob::{argmax, Dist, Kernel, Sampler};
use serde::{Deserialize, Serialize};

use crate::accuracy::cluster_accuracy;
use crate::error::MixError;

/// Upper bound of the tie-breaking noise added to log-scores.
pub const TIE_NOISE: f64 = 1e-7;

// ============================================================================
// Assignments
// ============================================================================

/// Current membership of every trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterAssignment {
    /// One label per trajectory.
    Hard(Vec<usize>),
    /// Responsibilities per trajectory, each summing to one.
    Soft(Vec<Vec<f64>>),
}

impl ClusterAssignment {
    /// Uniformly random labels.
    pub fn random_hard<S: Sampler + ?Sized>(
        n: usize,
        k: usize,
        sampler: &mut S,
    ) -> Result<Self, MixError> {
        let uniform = vec![1.0 / k as f64; k];
        let labels = (0..n)
            .map(|_| sampler.categorical(&uniform))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Hard(labels))
    }

    /// Random responsibilities.
    pub fn random_soft<S: Sampler + ?Sized>(n: usize, k: usize, sampler: &mut S) -> Result<Self, MixError> {
        let rows = (0..n)
            .map(|_| {
                let weights = (0..k).map(|_| sampler.uniform() + 1e-3).collect();
                Dist::from_weights(weights).map(|d| d.p)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Soft(rows))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Hard(labels) => labels.len(),
            Self::Soft(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Hard(_))
    }

    /// Weight of trajectory `i` in class `k`.
    pub fn weight(&self, i: usize, k: usize) -> f64 {
        match self {
            Self::Hard(labels) => {
                if labels[i] == k {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Soft(rows) => rows[i][k],
        }
    }

    /// Hard labels; soft responsibilities are reduced by argmax.
    pub fn labels(&self) -> Vec<usize> {
        match self {
            Self::Hard(labels) => labels.clone(),
            Self::Soft(rows) => rows.iter().map(|r| argmax(r)).collect(),
        }
    }

    fn validate(&self, n: usize, k: usize) -> Result<(), MixError> {
        if self.len() != n {
            return Err(MixError::ShapeMismatch {
                what: "cluster assignment",
                expected: n,
                got: self.len(),
            });
        }
        match self {
            Self::Hard(labels) => {
                if let Some(&label) = labels.iter().find(|&&l| l >= k) {
                    return Err(MixError::InvalidLabel { label, k });
                }
            }
            Self::Soft(rows) => {
                for row in rows {
                    if row.len() != k {
                        return Err(MixError::ShapeMismatch {
                            what: "responsibilities",
                            expected: k,
                            got: row.len(),
                        });
                    }
                    confound_prob::check_simplex(row)?;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Per-class models
// ============================================================================

/// Start, policy and transition model of every class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    /// `[k][a]`, each a state → next-state kernel.
    pub transitions: Vec<Vec<Kernel>>,
    /// `[k]`, each a state → action kernel.
    pub policy: Vec<Kernel>,
    /// Start distribution per class.
    pub start: Vec<Dist>,
    pub prior: Dist,
}

impl ClusterModel {
    /// M-step: weighted counts of `dataset` under `assignment`.
    pub fn estimate(dataset: &Dataset, assignment: &ClusterAssignment, k: usize) -> Result<Self, MixError> {
        if k == 0 {
            return Err(MixError::InvalidParameter {
                name: "k",
                reason: "at least one class is required".to_string(),
            });
        }
        assignment.validate(dataset.len(), k)?;
        let (n_states, n_actions) = (dataset.n_states, dataset.n_actions);
        let mut trans = vec![vec![vec![vec![0.0; n_states]; n_states]; n_actions]; k];
        let mut pol = vec![vec![vec![0.0; n_actions]; n_states]; k];
        let mut start = vec![vec![0.0; n_states]; k];
        let mut prior = vec![0.0; k];

        for (i, traj) in dataset.trajectories.iter().enumerate() {
            for c in 0..k {
                let w = assignment.weight(i, c);
                if w == 0.0 {
                    continue;
                }
                prior[c] += w;
                if let Some(s0) = traj.initial_state() {
                    start[c][s0] += w;
                }
                for t in &traj.steps {
                    trans[c][t.action][t.state][t.next_state] += w;
                    pol[c][t.state][t.action] += w;
                }
            }
        }

        let transitions = trans
            .into_iter()
            .map(|per_action| {
                per_action
                    .into_iter()
                    .map(Kernel::from_counts)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let policy = pol
            .into_iter()
            .map(Kernel::from_counts)
            .collect::<Result<Vec<_>, _>>()?;
        let start = start
            .into_iter()
            .map(|w| {
                if w.iter().sum::<f64>() > 0.0 {
                    Dist::from_weights(w)
                } else {
                    Ok(Dist::uniform(n_states))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            transitions,
            policy,
            start,
            prior: Dist::from_weights(prior)?,
        })
    }

    pub fn k(&self) -> usize {
        self.policy.len()
    }

    fn step_log_prob(&self, c: usize, t: &Transition) -> f64 {
        (self.transitions[c][t.action].k[t.state][t.next_state] * self.policy[c].k[t.state][t.action]).ln()
    }

    fn trajectory_log_prob(&self, c: usize, traj: &Trajectory) -> f64 {
        let start = traj.initial_state().map_or(0.0, |s0| self.start[c].p[s0].ln());
        start + traj.steps.iter().map(|t| self.step_log_prob(c, t)).sum::<f64>()
    }

    /// `log p_k(traj_i)` for every trajectory and class, indexed `[i][k]`.
    pub fn log_likelihoods(&self, dataset: &Dataset) -> Vec<Vec<f64>> {
        dataset
            .trajectories
            .iter()
            .map(|traj| (0..self.k()).map(|c| self.trajectory_log_prob(c, traj)).collect())
            .collect()
    }

    /// `Σ |P_k − P'_k|` over every transition entry.
    pub fn transition_distance(&self, other: &ClusterModel) -> f64 {
        self.transitions
            .iter()
            .flatten()
            .zip(other.transitions.iter().flatten())
            .flat_map(|(a, b)| a.k.iter().flatten().zip(b.k.iter().flatten()))
            .map(|(x, y)| (x - y).abs())
            .sum()
    }

    /// Per-class policies as a confounder-conditioned behavior policy.
    pub fn behavior_policy(&self) -> Result<ConfoundedPolicy, MixError> {
        Ok(ConfoundedPolicy::new(self.policy.clone())?)
    }
}

fn log_sum_exp(xs: &[f64]) -> f64 {
    let m = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if m == f64::NEG_INFINITY {
        return m;
    }
    m + xs.iter().map(|x| (x - m).exp()).sum::<f64>().ln()
}

/// Log-likelihood reported for `assignment` under `model`.
pub fn total_log_likelihood(
    model: &ClusterModel,
    assignment: &ClusterAssignment,
    log_lik: &[Vec<f64>],
) -> f64 {
    match assignment {
        ClusterAssignment::Hard(labels) => labels.iter().zip(log_lik).map(|(&l, row)| row[l]).sum(),
        ClusterAssignment::Soft(_) => log_lik
            .iter()
            .map(|row| {
                let joint: Vec<f64> = row
                    .iter()
                    .zip(&model.prior.p)
                    .map(|(ll, p)| ll + p.ln())
                    .collect();
                log_sum_exp(&joint)
            })
            .sum(),
    }
}

/// E-step: rescore every trajectory and reassign it.
pub fn e_step<S: Sampler + ?Sized>(
    model: &ClusterModel,
    log_lik: &[Vec<f64>],
    hard: bool,
    reg: f64,
    sampler: &mut S,
) -> ClusterAssignment {
    let log_prior: Vec<f64> = model.prior.p.iter().map(|p| p.ln()).collect();
    let scores = log_lik.iter().map(|row| {
        row.iter()
            .zip(&log_prior)
            .map(|(ll, lp)| {
                let noisy = ll + sampler.uniform_below(TIE_NOISE);
                if reg > 0.0 {
                    noisy + reg * lp
                } else {
                    noisy
                }
            })
            .collect::<Vec<f64>>()
    });

    if hard {
        ClusterAssignment::Hard(scores.map(|s| argmax(&s)).collect())
    } else {
        ClusterAssignment::Soft(
            scores
                .map(|s| {
                    let norm = log_sum_exp(&s);
                    if norm == f64::NEG_INFINITY {
                        vec![1.0 / s.len() as f64; s.len()]
                    } else {
                        s.iter().map(|x| (x - norm).exp()).collect()
                    }
                })
                .collect(),
        )
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Configuration of an EM run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmConfig {
    /// Number of classes.
    pub k: usize,
    pub max_iter: usize,
    /// Iterations run before convergence is checked.
    pub min_iter: usize,
    /// Bound on [`ClusterModel::transition_distance`] between iterations.
    pub tol: f64,
    /// Weight of `log prior_k` in the E-step.
    pub reg: f64,
    /// Iterations between progress events; 0 disables them.
    pub checkin: usize,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            k: 2,
            max_iter: 100,
            min_iter: 10,
            tol: 1e-3,
            reg: 0.0,
            checkin: 5,
        }
    }
}

impl EmConfig {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_min_iter(mut self, min_iter: usize) -> Self {
        self.min_iter = min_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_reg(mut self, reg: f64) -> Self {
        self.reg = reg;
        self
    }

    pub fn with_checkin(mut self, checkin: usize) -> Self {
        self.checkin = checkin;
        self
    }

    fn validate(&self) -> Result<(), MixError> {
        if self.k == 0 {
            return Err(MixError::InvalidParameter {
                name: "k",
                reason: "at least one class is required".to_string(),
            });
        }
        if self.reg.is_nan() || self.reg < 0.0 {
            return Err(MixError::InvalidParameter {
                name: "reg",
                reason: format!("{} is negative", self.reg),
            });
        }
        if self.tol.is_nan() || self.tol < 0.0 {
            return Err(MixError::InvalidParameter {
                name: "tol",
                reason: format!("{} is negative", self.tol),
            });
        }
        Ok(())
    }
}

/// Details of a run that hit the iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmNonConvergence {
    pub iterations: usize,
    pub final_delta: f64,
}

/// Outcome of an EM run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmResult {
    pub assignment: ClusterAssignment,
    /// M-step estimate of the final assignment.
    pub model: ClusterModel,
    /// Last entry of `history`.
    pub log_likelihood: f64,
    /// Log-likelihood of every model, starting with the initial one.
    pub history: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// Transition distance of the last iteration.
    pub final_delta: f64,
}

impl EmResult {
    pub fn non_convergence(&self) -> Option<EmNonConvergence> {
        (!self.converged).then_some(EmNonConvergence {
            iterations: self.iterations,
            final_delta: self.final_delta,
        })
    }

    pub fn labels(&self) -> Vec<usize> {
        self.assignment.labels()
    }
}

/// Run EM from `init`.
///
/// `reference` labels, when given, only feed the accuracy reported in the
/// progress events.
pub fn run_em<S: Sampler + ?Sized>(
    dataset: &Dataset,
    init: ClusterAssignment,
    config: &EmConfig,
    sampler: &mut S,
    reference: Option<&[usize]>,
) -> Result<EmResult, MixError> {
    config.validate()?;
    let hard = init.is_hard();
    let mut assignment = init;
    let mut model = ClusterModel::estimate(dataset, &assignment, config.k)?;
    let mut history = Vec::new();
    let mut iterations = 0;
    let mut delta = f64::INFINITY;

    loop {
        let log_lik = model.log_likelihoods(dataset);
        history.push(total_log_likelihood(&model, &assignment, &log_lik));
        let settled = iterations >= config.min_iter && delta <= config.tol;
        if settled || iterations >= config.max_iter {
            break;
        }

        assignment = e_step(&model, &log_lik, hard, config.reg, sampler);
        let next = ClusterModel::estimate(dataset, &assignment, config.k)?;
        delta = next.transition_distance(&model);
        model = next;
        iterations += 1;

        tracing::debug!(iteration = iterations, delta, "em iteration");
        if config.checkin > 0 && iterations % config.checkin == 0 {
            let accuracy = match reference {
                Some(truth) => Some(cluster_accuracy(&assignment.labels(), truth, config.k)?),
                None => None,
            };
            tracing::info!(
                iteration = iterations,
                delta,
                log_likelihood = history.last().copied().unwrap_or(f64::NAN),
                accuracy = ?accuracy,
                "em check-in"
            );
        }
    }

    let converged = iterations >= config.min_iter && delta <= config.tol;
    let log_likelihood = history.last().copied().unwrap_or(f64::NEG_INFINITY);
    if !converged {
        tracing::warn!(
            iterations,
            final_delta = delta,
            "em stopped at the iteration cap without converging"
        );
    }
    Ok(EmResult {
        assignment,
        model,
        log_likelihood,
        history,
        iterations,
        converged,
        final_delta: delta,
    })
}

/// Copy of `dataset` whose confounder fields hold recovered labels.
///
/// Lets confounder-aware estimators run on clustered data.
pub fn relabel(dataset: &Dataset, labels: &[usize]) -> Result<Dataset, MixError> {
    if labels.len() != dataset.len() {
        return Err(MixError::ShapeMismatch {
            what: "labels",
            expected: dataset.len(),
            got: labels.len(),
        });
    }
    let trajectories = dataset
        .trajectories
        .iter()
        .zip(labels)
        .map(|(traj, &label)| Trajectory {
            steps: traj
                .steps
                .iter()
                .map(|t| Transition {
                    confounder: label,
                    ..*t
                })
                .collect(),
        })
        .collect();
    Ok(Dataset::new(trajectories, dataset.n_states, dataset.n_actions)?)
}
