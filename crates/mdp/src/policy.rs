//! Policies: state (and possibly confounder) → action distribution.
//!
//! Two shapes of policy appear in a confounded MDP:
//!
//! ```text
//!              ┌────────────────┐
//!   state ────▶│ TabularPolicy  │────▶ pi(· | s)
//!              └────────────────┘
//!
//!              ┌──────────────────┐
//!   state ────▶│ ConfoundedPolicy │────▶ pi(· | u, s)
//!   u ────────▶│                  │
//!              └──────────────────┘
//! ```
//!
//! The flat [`TabularPolicy`] is what an evaluator that cannot see the
//! confounder works with; the [`ConfoundedPolicy`] is what generated the
//! logged data. Both implement [`Policy`], so the simulator and the exact
//! evaluator accept either.

use confound_prob::{Dist, Kernel};
use serde::{Deserialize, Serialize};

use crate::error::MdpError;

/// A stochastic policy over a finite state and action space.
pub trait Policy {
    /// Number of states the policy is defined on.
    fn n_states(&self) -> usize;

    /// Number of actions.
    fn n_actions(&self) -> usize;

    /// Number of confounder values the policy conditions on, if any.
    fn n_confound(&self) -> Option<usize> {
        None
    }

    /// Action probabilities `pi(· | u, s)`. Flat policies ignore `confounder`.
    fn action_probs(&self, confounder: usize, state: usize) -> &[f64];
}

// ============================================================================
// Tabular Policy
// ============================================================================

/// A flat policy `pi[state][action]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularPolicy {
    /// Row-stochastic `state → action` kernel.
    pub pi: Kernel,
}

impl TabularPolicy {
    /// Build a policy from rows of action probabilities.
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self, MdpError> {
        Ok(Self {
            pi: Kernel::new(rows)?,
        })
    }

    /// Uniformly random policy.
    pub fn uniform(n_states: usize, n_actions: usize) -> Self {
        Self {
            pi: Kernel::uniform(n_states, n_actions),
        }
    }

    /// The same action distribution in every state.
    pub fn constant(n_states: usize, probs: &Dist) -> Self {
        Self {
            pi: Kernel::constant(n_states, probs),
        }
    }

    /// Deterministic policy choosing `choose(s)` in state `s`.
    pub fn deterministic<F>(n_states: usize, n_actions: usize, choose: F) -> Result<Self, MdpError>
    where
        F: Fn(usize) -> usize,
    {
        let mut rows = vec![vec![0.0; n_actions]; n_states];
        for (s, row) in rows.iter_mut().enumerate() {
            let a = choose(s);
            if a >= n_actions {
                return Err(MdpError::InvalidAction {
                    action: a,
                    n_actions,
                });
            }
            row[a] = 1.0;
        }
        Self::new(rows)
    }

    /// Probability of `action` in `state`.
    pub fn prob(&self, state: usize, action: usize) -> f64 {
        self.pi.k[state][action]
    }

    /// Action distribution in `state`.
    pub fn row(&self, state: usize) -> &[f64] {
        self.pi.row(state)
    }
}

impl Policy for TabularPolicy {
    fn n_states(&self) -> usize {
        self.pi.n_inputs
    }

    fn n_actions(&self) -> usize {
        self.pi.n_outputs
    }

    fn action_probs(&self, _confounder: usize, state: usize) -> &[f64] {
        self.pi.row(state)
    }
}

// ============================================================================
// Confounded Policy
// ============================================================================

/// A confounder-conditioned policy `pi[u][state][action]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfoundedPolicy {
    /// One `state → action` kernel per confounder value.
    pub by_confounder: Vec<Kernel>,
}

impl ConfoundedPolicy {
    /// Build from per-confounder kernels, which must share a shape.
    pub fn new(by_confounder: Vec<Kernel>) -> Result<Self, MdpError> {
        let first = by_confounder.first().ok_or(MdpError::ShapeMismatch {
            what: "confounded policy",
            expected: 1,
            got: 0,
        })?;
        let (n_states, n_actions) = (first.n_inputs, first.n_outputs);
        for kernel in &by_confounder {
            if kernel.n_inputs != n_states {
                return Err(MdpError::ShapeMismatch {
                    what: "policy states",
                    expected: n_states,
                    got: kernel.n_inputs,
                });
            }
            if kernel.n_outputs != n_actions {
                return Err(MdpError::ShapeMismatch {
                    what: "policy actions",
                    expected: n_actions,
                    got: kernel.n_outputs,
                });
            }
        }
        Ok(Self { by_confounder })
    }

    /// Build from raw `[u][s][a]` rows.
    pub fn from_rows(rows: Vec<Vec<Vec<f64>>>) -> Result<Self, MdpError> {
        let kernels = rows
            .into_iter()
            .map(Kernel::new)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(kernels)
    }

    /// Policy followed when the confounder takes value `u`.
    pub fn conditioned(&self, u: usize) -> &Kernel {
        &self.by_confounder[u]
    }

    /// The marginal behavior `pi_bar[s][a] = Σ_u u_dist[u] · pi[u][s][a]`.
    pub fn marginal(&self, u_dist: &Dist) -> Result<TabularPolicy, MdpError> {
        Ok(TabularPolicy {
            pi: Kernel::mixture(&self.by_confounder, u_dist)?,
        })
    }

    /// The true confounder posterior `P(u | s, a)` under this policy.
    ///
    /// Returns one `action → confounder` kernel per state. State-action
    /// pairs the policy never takes fall back to the prior `u_dist`.
    pub fn confounder_posterior(&self, u_dist: &Dist) -> Result<Vec<Kernel>, MdpError> {
        if u_dist.len() != self.by_confounder.len() {
            return Err(MdpError::ShapeMismatch {
                what: "confounder distribution",
                expected: self.by_confounder.len(),
                got: u_dist.len(),
            });
        }
        let n_states = self.n_states();
        let n_actions = self.n_actions();
        let mut posterior = Vec::with_capacity(n_states);
        for s in 0..n_states {
            let rows = (0..n_actions)
                .map(|a| {
                    let joint: Vec<f64> = self
                        .by_confounder
                        .iter()
                        .zip(&u_dist.p)
                        .map(|(pi, &pu)| pu * pi.k[s][a])
                        .collect();
                    if joint.iter().sum::<f64>() > 0.0 {
                        joint
                    } else {
                        u_dist.p.clone()
                    }
                })
                .collect();
            posterior.push(Kernel::from_counts(rows)?);
        }
        Ok(posterior)
    }
}

impl Policy for ConfoundedPolicy {
    fn n_states(&self) -> usize {
        self.by_confounder[0].n_inputs
    }

    fn n_actions(&self) -> usize {
        self.by_confounder[0].n_outputs
    }

    fn n_confound(&self) -> Option<usize> {
        Some(self.by_confounder.len())
    }

    fn action_probs(&self, confounder: usize, state: usize) -> &[f64] {
        self.by_confounder[confounder].row(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_confounders() -> ConfoundedPolicy {
        ConfoundedPolicy::from_rows(vec![
            vec![vec![0.9, 0.1], vec![0.5, 0.5]],
            vec![vec![0.1, 0.9], vec![1.0, 0.0]],
        ])
        .unwrap()
    }

    #[test]
    fn test_marginal() {
        let pi = two_confounders();
        let marginal = pi.marginal(&Dist::uniform(2)).unwrap();
        assert!((marginal.prob(0, 0) - 0.5).abs() < 1e-12);
        assert!((marginal.prob(1, 0) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_confounder_posterior() {
        let pi = two_confounders();
        let post = pi.confounder_posterior(&Dist::uniform(2)).unwrap();
        // state 0, action 0: 0.45 vs 0.05
        assert!((post[0].k[0][0] - 0.9).abs() < 1e-12);
        // state 1, action 1 is only taken under u = 0
        assert!((post[1].k[1][0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_posterior_unreachable_falls_back_to_prior() {
        let pi = ConfoundedPolicy::from_rows(vec![vec![vec![1.0, 0.0]], vec![vec![1.0, 0.0]]])
            .unwrap();
        let prior = Dist::new(vec![0.3, 0.7]).unwrap();
        let post = pi.confounder_posterior(&prior).unwrap();
        assert!((post[0].k[1][0] - 0.3).abs() < 1e-12);
        assert!((post[0].k[1][1] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Kernel::uniform(2, 2);
        let b = Kernel::uniform(3, 2);
        assert!(matches!(
            ConfoundedPolicy::new(vec![a, b]),
            Err(MdpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_flat_policy_ignores_confounder() {
        let pi = TabularPolicy::deterministic(3, 2, |s| s % 2).unwrap();
        assert_eq!(pi.action_probs(0, 1), pi.action_probs(5, 1));
        assert_eq!(pi.action_probs(0, 1), &[0.0, 1.0]);
        assert!(TabularPolicy::deterministic(2, 2, |_| 2).is_err());
    }
}
