//! # Fitted-Q evaluation
//!
//! Every sweep regresses a bootstrapped target onto `(state, action)`
//! buckets. With one constant per bucket the least-squares fit is the
//! bucket mean:
//!
//! ```text
//!   y_t      = r_t + γ · Σ_a' pi_e(a'|s'_t) · Q_k(s'_t, a')
//!   Q_k+1(s,a) = (1 / N_sa) · Σ_{t : (s_t,a_t) = (s,a)} w_t · y_t
//! ```
//!
//! Buckets without data are set to zero in every sweep. The variants differ
//! only in the per-point weight `w_t`:
//!
//! | Update | `w_t · y_t` |
//! |---|---|
//! | [`fitted_q_update`] | `y_t` |
//! | [`reweighted_q_update`] | `pi_bar(a|s) / pi_b(a|u_t,s) · y_t` (reads the confounder) |
//! | [`bound_reweighted_update`] | `max(1/Λ, pi_hat(a|s)) · y_t` if `y_t ≥ 0`, else `Λ · y_t` |

use confound_mdp::stats::estimate_policy;
use confound_mdp::{ConfoundedPolicy, Dataset, Policy, QTable, TabularPolicy, Transition};
use confound_prob::{dot, Dist};
use serde::{Deserialize, Serialize};

use crate::error::OpeError;

/// Discount and sweep count shared by the FQE family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FqeConfig {
    pub gamma: f64,
    /// Number of regression sweeps.
    pub iterations: usize,
}

impl Default for FqeConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            iterations: 100,
        }
    }
}

impl FqeConfig {
    pub fn new(gamma: f64, iterations: usize) -> Self {
        Self { gamma, iterations }
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), OpeError> {
        check_gamma(self.gamma)
    }
}

pub(crate) fn check_gamma(gamma: f64) -> Result<(), OpeError> {
    if !(0.0..1.0).contains(&gamma) {
        return Err(OpeError::InvalidParameter {
            name: "gamma",
            reason: format!("{gamma} is outside [0, 1)"),
        });
    }
    Ok(())
}

pub(crate) fn check_shapes<P: Policy + ?Sized>(
    dataset: &Dataset,
    f: &QTable,
    pi_e: &P,
) -> Result<(), OpeError> {
    if f.n_states() != dataset.n_states || f.n_actions() != dataset.n_actions {
        return Err(OpeError::ShapeMismatch {
            what: "q table",
            expected: dataset.n_states * dataset.n_actions,
            got: f.n_states() * f.n_actions(),
        });
    }
    if pi_e.n_states() != dataset.n_states || pi_e.n_actions() != dataset.n_actions {
        return Err(OpeError::ShapeMismatch {
            what: "evaluation policy",
            expected: dataset.n_states * dataset.n_actions,
            got: pi_e.n_states() * pi_e.n_actions(),
        });
    }
    Ok(())
}

/// `V(s) = Σ_a pi_e(a|s) · Q(s, a)` for every state.
pub fn next_state_values(f: &QTable, pi_e: &TabularPolicy) -> Vec<f64> {
    f.policy_values(pi_e)
}

/// Bucket-mean regression of `target(t)` over the dataset.
fn regress<F>(dataset: &Dataset, mut target: F) -> Result<QTable, OpeError>
where
    F: FnMut(&Transition) -> Result<f64, OpeError>,
{
    let mut sums = QTable::zeros(dataset.n_states, dataset.n_actions);
    let mut counts = vec![vec![0usize; dataset.n_actions]; dataset.n_states];
    for t in dataset.transitions() {
        sums.q[t.state][t.action] += target(t)?;
        counts[t.state][t.action] += 1;
    }
    for (row, count_row) in sums.q.iter_mut().zip(&counts) {
        for (x, &n) in row.iter_mut().zip(count_row) {
            if n > 0 {
                *x /= n as f64;
            }
        }
    }
    Ok(sums)
}

/// One standard FQE sweep.
pub fn fitted_q_update(
    f: &QTable,
    pi_e: &TabularPolicy,
    dataset: &Dataset,
    gamma: f64,
) -> Result<QTable, OpeError> {
    check_shapes(dataset, f, pi_e)?;
    let v = next_state_values(f, pi_e);
    regress(dataset, |t| Ok(t.reward + gamma * v[t.next_state]))
}

/// Run `update` for `iterations` sweeps starting from zero.
fn iterate<U>(
    name: &'static str,
    dataset: &Dataset,
    iterations: usize,
    mut update: U,
) -> Result<QTable, OpeError>
where
    U: FnMut(&QTable) -> Result<QTable, OpeError>,
{
    let mut q = QTable::zeros(dataset.n_states, dataset.n_actions);
    for sweep in 0..iterations {
        let next = update(&q)?;
        tracing::debug!(estimator = name, sweep, delta = next.max_abs_diff(&q), "fqe sweep");
        q = next;
    }
    Ok(q)
}

/// Standard fitted-Q evaluation of `pi_e`.
pub fn fitted_q_evaluation(
    pi_e: &TabularPolicy,
    dataset: &Dataset,
    config: &FqeConfig,
) -> Result<QTable, OpeError> {
    config.validate()?;
    iterate("fqe", dataset, config.iterations, |q| {
        fitted_q_update(q, pi_e, dataset, config.gamma)
    })
}

/// One FQE sweep reweighted by the true confounder of every point.
///
/// Oracle only: reads [`Transition::confounder`].
pub fn reweighted_q_update(
    f: &QTable,
    pi_b: &ConfoundedPolicy,
    u_dist: &Dist,
    pi_e: &TabularPolicy,
    dataset: &Dataset,
    gamma: f64,
) -> Result<QTable, OpeError> {
    check_shapes(dataset, f, pi_e)?;
    check_shapes(dataset, f, pi_b)?;
    let marginal = pi_b.marginal(u_dist)?;
    let v = next_state_values(f, pi_e);
    let n_confound = pi_b.by_confounder.len();
    regress(dataset, |t| {
        if t.confounder >= n_confound {
            return Err(OpeError::ShapeMismatch {
                what: "confounder label",
                expected: n_confound,
                got: t.confounder + 1,
            });
        }
        let behavior = pi_b.conditioned(t.confounder).k[t.state][t.action];
        if behavior <= 0.0 {
            return Err(OpeError::ZeroSupportImportanceWeight {
                state: t.state,
                action: t.action,
            });
        }
        let weight = marginal.prob(t.state, t.action) / behavior;
        Ok(weight * (t.reward + gamma * v[t.next_state]))
    })
}

/// Oracle reweighted FQE.
pub fn reweighted_fqe(
    pi_b: &ConfoundedPolicy,
    u_dist: &Dist,
    pi_e: &TabularPolicy,
    dataset: &Dataset,
    config: &FqeConfig,
) -> Result<QTable, OpeError> {
    config.validate()?;
    iterate("reweighted_fqe", dataset, config.iterations, |q| {
        reweighted_q_update(q, pi_b, u_dist, pi_e, dataset, config.gamma)
    })
}

fn check_weight_bound(weight_bound: f64) -> Result<(), OpeError> {
    if weight_bound.is_nan() || weight_bound < 1.0 {
        return Err(OpeError::InvalidParameter {
            name: "weight_bound",
            reason: format!("{weight_bound} is below 1"),
        });
    }
    Ok(())
}

/// One pessimistic sweep when the confounder is unknown: non-negative
/// targets are shrunk to `max(1/Λ, pi_hat(a|s))` of their value and negative
/// ones are scaled up by `Λ`.
pub fn bound_reweighted_update(
    f: &QTable,
    pi_e: &TabularPolicy,
    dataset: &Dataset,
    weight_bound: f64,
    gamma: f64,
) -> Result<QTable, OpeError> {
    check_shapes(dataset, f, pi_e)?;
    check_weight_bound(weight_bound)?;
    let pi_hat = estimate_policy(dataset)?;
    let v = next_state_values(f, pi_e);
    regress(dataset, |t| {
        let y = t.reward + gamma * v[t.next_state];
        if y >= 0.0 {
            Ok(y * (1.0 / weight_bound).max(pi_hat.prob(t.state, t.action)))
        } else {
            Ok(y * weight_bound)
        }
    })
}

/// FQE with [`bound_reweighted_update`] sweeps.
pub fn bound_reweighted_fqe(
    pi_e: &TabularPolicy,
    dataset: &Dataset,
    weight_bound: f64,
    config: &FqeConfig,
) -> Result<QTable, OpeError> {
    config.validate()?;
    iterate("bound_reweighted_fqe", dataset, config.iterations, |q| {
        bound_reweighted_update(q, pi_e, dataset, weight_bound, config.gamma)
    })
}

/// Scalar policy value `Σ_s x(s) · V(s)` of a fitted table.
pub fn policy_value(q: &QTable, pi_e: &TabularPolicy, x_dist: &Dist) -> Result<f64, OpeError> {
    let v = next_state_values(q, pi_e);
    if v.len() != x_dist.len() {
        return Err(OpeError::ShapeMismatch {
            what: "initial distribution",
            expected: v.len(),
            got: x_dist.len(),
        });
    }
    Ok(dot(&x_dist.p, &v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use confound_mdp::Trajectory;

    fn t(state: usize, action: usize, confounder: usize, next_state: usize, reward: f64) -> Transition {
        Transition {
            state,
            action,
            confounder,
            next_state,
            reward,
        }
    }

    /// State 0 moves to absorbing state 1 with reward 1 or 3.
    fn dataset() -> Dataset {
        Dataset::new(
            vec![
                Trajectory {
                    steps: vec![t(0, 0, 0, 1, 1.0), t(1, 0, 0, 1, 0.0)],
                },
                Trajectory {
                    steps: vec![t(0, 0, 1, 1, 3.0), t(1, 1, 1, 1, 0.0)],
                },
            ],
            3,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_bucket_means_and_unobserved_zero() {
        let d = dataset();
        let pi_e = TabularPolicy::uniform(3, 2);
        let q = fitted_q_update(&QTable::zeros(3, 2), &pi_e, &d, 0.9).unwrap();
        assert_eq!(q.get(0, 0), 2.0);
        assert_eq!(q.get(0, 1), 0.0);
        assert_eq!(q.get(2, 0), 0.0);
    }

    #[test]
    fn test_fqe_bootstraps() {
        let d = dataset();
        let pi_e = TabularPolicy::uniform(3, 2);
        let mut f = QTable::zeros(3, 2);
        f.set(1, 0, 10.0);
        f.set(1, 1, 20.0);
        let q = fitted_q_update(&f, &pi_e, &d, 0.5).unwrap();
        // 2 + 0.5 * 15
        assert!((q.get(0, 0) - 9.5).abs() < 1e-12);
    }

    #[test]
    fn test_fqe_iterations() {
        let d = dataset();
        let pi_e = TabularPolicy::uniform(3, 2);
        let config = FqeConfig::new(0.9, 25);
        let q = fitted_q_evaluation(&pi_e, &d, &config).unwrap();
        // state 1 earns nothing, so state 0 is worth its mean reward
        assert!((q.get(0, 0) - 2.0).abs() < 1e-12);
        assert!(fitted_q_evaluation(&pi_e, &d, &config.clone().with_gamma(1.0)).is_err());
    }

    #[test]
    fn test_reweighted_uses_confounder() {
        let d = dataset();
        let pi_e = TabularPolicy::uniform(3, 2);
        let pi_b = ConfoundedPolicy::from_rows(vec![
            vec![vec![0.8, 0.2]; 3],
            vec![vec![0.4, 0.6]; 3],
        ])
        .unwrap();
        let u = Dist::uniform(2);
        let q = reweighted_q_update(&QTable::zeros(3, 2), &pi_b, &u, &pi_e, &d, 0.9).unwrap();
        // marginal 0.6: weights 0.6/0.8 and 0.6/0.4
        let expected = (0.75 * 1.0 + 1.5 * 3.0) / 2.0;
        assert!((q.get(0, 0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_bound_reweighted_is_pessimistic() {
        let d = dataset();
        let pi_e = TabularPolicy::uniform(3, 2);
        let zero = QTable::zeros(3, 2);
        let naive = fitted_q_update(&zero, &pi_e, &d, 0.9).unwrap();
        let bounded = bound_reweighted_update(&zero, &pi_e, &d, 2.0, 0.9).unwrap();
        // pi_hat(0|0) = 1, so positive targets keep full weight
        assert_eq!(bounded.get(0, 0), naive.get(0, 0));
        assert!(bound_reweighted_update(&zero, &pi_e, &d, 0.5, 0.9).is_err());
    }

    #[test]
    fn test_config_json() {
        let config: FqeConfig = serde_json::from_str(r#"{"iterations": 7}"#).unwrap();
        assert_eq!(config, FqeConfig::new(0.99, 7));
    }
}
