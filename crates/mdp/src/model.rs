//! The finite confounded MDP and its exact evaluator.
//!
//! A [`ConfoundMdp`] is an immutable parameter bundle:
//!
//! - `p[u][a]`: next-state kernel under confounder `u` and action `a`
//! - `r[a][s][s']`: deterministic reward
//! - `x_dist`, `u_dist`: initial-state and confounder distributions
//! - `gamma`: discount factor
//!
//! Simulation state lives in [`Simulator`](crate::Simulator), never on the
//! model, so one model can be shared by any number of concurrent samplers.
//!
//! # Exact evaluation
//!
//! [`ConfoundMdp::bellman_eval`] iterates
//!
//! ```text
//! Q_{k+1}(s,a) = Σ_u u(u) · P_u(·|s,a) · ( R(a,s,·) + γ · f̄_k(·) )
//! f̄_k(s')      = Σ_u u(u) · Σ_a' pi(a'|u,s') · Q_k(s',a')
//! ```
//!
//! from `Q_0 = 0` for a fixed number of steps. The bootstrap value `f̄` is
//! mixed over the confounder with the same weights as the immediate term,
//! not evaluated per confounder and mixed afterwards.

use confound_prob::{dot, Dist, Kernel, Sampler, PROB_TOLERANCE};
use serde::{Deserialize, Serialize};

use crate::error::MdpError;
use crate::policy::{ConfoundedPolicy, Policy};
use crate::value::QTable;

/// Reward tensor indexed `[action][state][next_state]`.
pub type RewardTensor = Vec<Vec<Vec<f64>>>;

/// A finite MDP whose transitions depend on an unobserved confounder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfoundMdp {
    /// Transition kernels indexed `[confounder][action]`.
    pub p: Vec<Vec<Kernel>>,
    /// Rewards indexed `[action][state][next_state]`.
    pub r: RewardTensor,
    /// Initial-state distribution.
    pub x_dist: Dist,
    /// Marginal confounder distribution.
    pub u_dist: Dist,
    /// Discount factor in `[0, 1)`.
    pub gamma: f64,
}

impl ConfoundMdp {
    /// Validate and assemble a confounded MDP.
    ///
    /// # Errors
    ///
    /// Returns a shape error if any tensor disagrees with `x_dist` (states),
    /// `u_dist` (confounders) or `r` (actions), and `InvalidDiscount` when
    /// `gamma` is outside `[0, 1)`.
    pub fn new(
        p: Vec<Vec<Kernel>>,
        r: RewardTensor,
        x_dist: Dist,
        u_dist: Dist,
        gamma: f64,
    ) -> Result<Self, MdpError> {
        if !(0.0..1.0).contains(&gamma) {
            return Err(MdpError::InvalidDiscount { gamma });
        }
        let n_states = x_dist.len();
        let n_actions = r.len();
        if n_actions == 0 {
            return Err(MdpError::ShapeMismatch {
                what: "reward actions",
                expected: 1,
                got: 0,
            });
        }
        if p.len() != u_dist.len() {
            return Err(MdpError::ShapeMismatch {
                what: "transition confounders",
                expected: u_dist.len(),
                got: p.len(),
            });
        }
        for per_action in &p {
            if per_action.len() != n_actions {
                return Err(MdpError::ShapeMismatch {
                    what: "transition actions",
                    expected: n_actions,
                    got: per_action.len(),
                });
            }
            for kernel in per_action {
                if kernel.n_inputs != n_states || kernel.n_outputs != n_states {
                    return Err(MdpError::ShapeMismatch {
                        what: "transition states",
                        expected: n_states,
                        got: kernel.n_inputs.max(kernel.n_outputs),
                    });
                }
            }
        }
        for rows in &r {
            if rows.len() != n_states {
                return Err(MdpError::ShapeMismatch {
                    what: "reward states",
                    expected: n_states,
                    got: rows.len(),
                });
            }
            if let Some(row) = rows.iter().find(|row| row.len() != n_states) {
                return Err(MdpError::ShapeMismatch {
                    what: "reward next states",
                    expected: n_states,
                    got: row.len(),
                });
            }
        }
        Ok(Self {
            p,
            r,
            x_dist,
            u_dist,
            gamma,
        })
    }

    /// Build from raw `[u][a][s][s']` transition rows.
    pub fn from_rows(
        p: Vec<Vec<Vec<Vec<f64>>>>,
        r: RewardTensor,
        x_dist: Vec<f64>,
        u_dist: Vec<f64>,
        gamma: f64,
    ) -> Result<Self, MdpError> {
        let kernels = p
            .into_iter()
            .map(|per_action| {
                per_action
                    .into_iter()
                    .map(Kernel::new)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(kernels, r, Dist::new(x_dist)?, Dist::new(u_dist)?, gamma)
    }

    pub fn n_states(&self) -> usize {
        self.x_dist.len()
    }

    pub fn n_actions(&self) -> usize {
        self.r.len()
    }

    pub fn n_confound(&self) -> usize {
        self.u_dist.len()
    }

    /// Next-state kernel under confounder `u` and action `a`.
    pub fn transition(&self, u: usize, a: usize) -> &Kernel {
        &self.p[u][a]
    }

    pub fn reward(&self, action: usize, state: usize, next_state: usize) -> f64 {
        self.r[action][state][next_state]
    }

    /// Whether `state` maps to itself under every confounder and action.
    pub fn is_absorbing(&self, state: usize) -> bool {
        self.p
            .iter()
            .flatten()
            .all(|kernel| kernel.k[state][state] >= 1.0 - PROB_TOLERANCE)
    }

    pub(crate) fn check_state(&self, state: usize) -> Result<(), MdpError> {
        if state >= self.n_states() {
            return Err(MdpError::InvalidState {
                state,
                n_states: self.n_states(),
            });
        }
        Ok(())
    }

    pub(crate) fn check_action(&self, action: usize) -> Result<(), MdpError> {
        if action >= self.n_actions() {
            return Err(MdpError::InvalidAction {
                action,
                n_actions: self.n_actions(),
            });
        }
        Ok(())
    }

    pub(crate) fn check_confounder(&self, confounder: usize) -> Result<(), MdpError> {
        if confounder >= self.n_confound() {
            return Err(MdpError::InvalidConfounder {
                confounder,
                n_confound: self.n_confound(),
            });
        }
        Ok(())
    }

    /// Check that a policy is defined on this MDP's spaces.
    pub fn check_policy<P: Policy + ?Sized>(&self, pi: &P) -> Result<(), MdpError> {
        if pi.n_states() != self.n_states() {
            return Err(MdpError::ShapeMismatch {
                what: "policy states",
                expected: self.n_states(),
                got: pi.n_states(),
            });
        }
        if pi.n_actions() != self.n_actions() {
            return Err(MdpError::ShapeMismatch {
                what: "policy actions",
                expected: self.n_actions(),
                got: pi.n_actions(),
            });
        }
        if let Some(n) = pi.n_confound() {
            if n != self.n_confound() {
                return Err(MdpError::ShapeMismatch {
                    what: "policy confounders",
                    expected: self.n_confound(),
                    got: n,
                });
            }
        }
        Ok(())
    }

    /// Draw an initial state from `x_dist`.
    pub fn sample_initial<S: Sampler + ?Sized>(&self, sampler: &mut S) -> Result<usize, MdpError> {
        Ok(sampler.categorical(&self.x_dist.p)?)
    }

    /// Draw a confounder value from `u_dist`.
    pub fn sample_confounder<S: Sampler + ?Sized>(
        &self,
        sampler: &mut S,
    ) -> Result<usize, MdpError> {
        Ok(sampler.categorical(&self.u_dist.p)?)
    }

    /// One transition from `state` under `confounder` and `action`.
    ///
    /// Returns the sampled next state and the reward `R[action][state][next]`.
    pub fn sample_step<S: Sampler + ?Sized>(
        &self,
        state: usize,
        confounder: usize,
        action: usize,
        sampler: &mut S,
    ) -> Result<(usize, f64), MdpError> {
        self.check_state(state)?;
        self.check_confounder(confounder)?;
        self.check_action(action)?;
        let next = sampler.categorical(self.p[confounder][action].row(state))?;
        Ok((next, self.r[action][state][next]))
    }

    // ========================================================================
    // Exact evaluation
    // ========================================================================

    /// Confounder-marginalized bootstrap value `f̄(s') = Σ_u u(u) · pi(·|u,s') · Q(s',·)`.
    ///
    /// Shapes are not checked; callers validate `q` and `pi` first.
    pub fn bootstrap_values<P: Policy + ?Sized>(&self, q: &QTable, pi: &P) -> Vec<f64> {
        (0..self.n_states())
            .map(|s| {
                self.u_dist
                    .p
                    .iter()
                    .enumerate()
                    .map(|(u, &pu)| pu * dot(pi.action_probs(u, s), q.row(s)))
                    .sum::<f64>()
            })
            .collect()
    }

    /// One exact Bellman evaluation step for `pi`.
    pub fn bellman_eval_update<P: Policy + ?Sized>(
        &self,
        q: &QTable,
        pi: &P,
    ) -> Result<QTable, MdpError> {
        self.check_policy(pi)?;
        if q.n_states() != self.n_states() || q.n_actions() != self.n_actions() {
            return Err(MdpError::ShapeMismatch {
                what: "q table",
                expected: self.n_states() * self.n_actions(),
                got: q.n_states() * q.n_actions(),
            });
        }

        let f_avg = self.bootstrap_values(q, pi);
        let mut next = QTable::zeros(self.n_states(), self.n_actions());
        for a in 0..self.n_actions() {
            for s in 0..self.n_states() {
                let target: Vec<f64> = self.r[a][s]
                    .iter()
                    .zip(&f_avg)
                    .map(|(r, f)| r + self.gamma * f)
                    .collect();
                let value: f64 = self
                    .u_dist
                    .p
                    .iter()
                    .zip(&self.p)
                    .map(|(&pu, per_action)| pu * dot(per_action[a].row(s), &target))
                    .sum();
                next.set(s, a, value);
            }
        }
        Ok(next)
    }

    /// Exact finite-horizon evaluation: `horizon` Bellman steps from zero.
    pub fn bellman_eval<P: Policy + ?Sized>(
        &self,
        pi: &P,
        horizon: usize,
    ) -> Result<QTable, MdpError> {
        let mut q = QTable::zeros(self.n_states(), self.n_actions());
        for _ in 0..horizon {
            q = self.bellman_eval_update(&q, pi)?;
        }
        Ok(q)
    }

    /// Per-state values under `pi` and their `x_dist`-weighted average.
    pub fn get_value<P: Policy + ?Sized>(
        &self,
        q: &QTable,
        pi: &P,
    ) -> Result<(Vec<f64>, f64), MdpError> {
        self.check_policy(pi)?;
        let values = self.bootstrap_values(q, pi);
        let average = self.x_dist.expect(&values)?;
        Ok((values, average))
    }

    /// The transition a confounder-blind observer sees under `pi_b`:
    /// `P_b(s'|s,a) = Σ_u P(u|s,a) · P_u(s'|s,a)`.
    ///
    /// This is the kernel naive estimators converge to. Returns one
    /// `state → next state` kernel per action; pairs that `pi_b` never takes
    /// fall back to the prior-weighted mixture.
    pub fn behavior_transition(&self, pi_b: &ConfoundedPolicy) -> Result<Vec<Kernel>, MdpError> {
        self.check_policy(pi_b)?;
        let posterior = pi_b.confounder_posterior(&self.u_dist)?;
        (0..self.n_actions())
            .map(|a| {
                let rows = (0..self.n_states())
                    .map(|s| {
                        let mut row = vec![0.0; self.n_states()];
                        for (u, per_action) in self.p.iter().enumerate() {
                            let w = posterior[s].k[a][u];
                            for (acc, &x) in row.iter_mut().zip(per_action[a].row(s)) {
                                *acc += w * x;
                            }
                        }
                        row
                    })
                    .collect();
                Kernel::from_counts(rows).map_err(MdpError::from)
            })
            .collect()
    }
}
