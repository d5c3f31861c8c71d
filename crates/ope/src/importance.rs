//! Importance sampling estimators.
//!
//! Each trajectory's discounted return is weighted by
//! `ρ = Π_t pi_e(a_t|s_t) / pi_hat(a_t|s_t)`:
//!
//! | Estimator | Value |
//! |---|---|
//! | [`importance_sampling`] | `Σ_i ρ_i G_i / N` |
//! | [`weighted_importance_sampling`] | `Σ_i ρ_i G_i / Σ_i ρ_i` |

use confound_mdp::{calc_returns, Dataset, TabularPolicy};

use crate::error::OpeError;

fn check_policy(what: &'static str, dataset: &Dataset, pi: &TabularPolicy) -> Result<(), OpeError> {
    if pi.pi.n_inputs != dataset.n_states || pi.pi.n_outputs != dataset.n_actions {
        return Err(OpeError::ShapeMismatch {
            what,
            expected: dataset.n_states * dataset.n_actions,
            got: pi.pi.n_inputs * pi.pi.n_outputs,
        });
    }
    Ok(())
}

/// Cumulative importance ratio of every trajectory.
///
/// Fails with [`OpeError::ZeroSupportImportanceWeight`] on the first step
/// whose action `pi_hat` never takes.
pub fn importance_weights(
    dataset: &Dataset,
    pi_hat: &TabularPolicy,
    pi_e: &TabularPolicy,
) -> Result<Vec<f64>, OpeError> {
    check_policy("behavior policy", dataset, pi_hat)?;
    check_policy("evaluation policy", dataset, pi_e)?;
    dataset
        .trajectories
        .iter()
        .map(|traj| {
            traj.steps.iter().try_fold(1.0, |rho, t| {
                let behavior = pi_hat.prob(t.state, t.action);
                if behavior <= 0.0 {
                    return Err(OpeError::ZeroSupportImportanceWeight {
                        state: t.state,
                        action: t.action,
                    });
                }
                Ok(rho * pi_e.prob(t.state, t.action) / behavior)
            })
        })
        .collect()
}

/// Ordinary importance sampling.
pub fn importance_sampling(
    dataset: &Dataset,
    gamma: f64,
    pi_hat: &TabularPolicy,
    pi_e: &TabularPolicy,
) -> Result<f64, OpeError> {
    let weights = importance_weights(dataset, pi_hat, pi_e)?;
    let returns = calc_returns(dataset, gamma);
    let total: f64 = weights.iter().zip(&returns).map(|(w, g)| w * g).sum();
    Ok(total / dataset.len() as f64)
}

/// Weighted (self-normalized) importance sampling.
pub fn weighted_importance_sampling(
    dataset: &Dataset,
    gamma: f64,
    pi_hat: &TabularPolicy,
    pi_e: &TabularPolicy,
) -> Result<f64, OpeError> {
    let weights = importance_weights(dataset, pi_hat, pi_e)?;
    let returns = calc_returns(dataset, gamma);
    let norm: f64 = weights.iter().sum();
    if norm <= 0.0 {
        return Err(OpeError::ZeroTotalWeight);
    }
    let total: f64 = weights.iter().zip(&returns).map(|(w, g)| w * g).sum();
    Ok(total / norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use confound_mdp::{Trajectory, Transition};

    fn step(state: usize, action: usize, reward: f64) -> Transition {
        Transition {
            state,
            action,
            confounder: 0,
            next_state: state,
            reward,
        }
    }

    fn dataset() -> Dataset {
        Dataset::new(
            vec![
                Trajectory {
                    steps: vec![step(0, 0, 1.0), step(0, 1, 1.0)],
                },
                Trajectory {
                    steps: vec![step(0, 1, 2.0), step(0, 1, 0.0)],
                },
            ],
            1,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_weights() {
        let pi_hat = TabularPolicy::new(vec![vec![0.25, 0.75]]).unwrap();
        let pi_e = TabularPolicy::new(vec![vec![0.5, 0.5]]).unwrap();
        let w = importance_weights(&dataset(), &pi_hat, &pi_e).unwrap();
        assert!((w[0] - 2.0 * (2.0 / 3.0)).abs() < 1e-12);
        assert!((w[1] - (2.0 / 3.0) * (2.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_is_and_wis() {
        let pi_hat = TabularPolicy::new(vec![vec![0.25, 0.75]]).unwrap();
        let pi_e = TabularPolicy::new(vec![vec![0.5, 0.5]]).unwrap();
        let d = dataset();
        // returns at gamma = 0.5: 1.5 and 2.0
        let (w0, w1) = (4.0 / 3.0, 4.0 / 9.0);
        let is = importance_sampling(&d, 0.5, &pi_hat, &pi_e).unwrap();
        let wis = weighted_importance_sampling(&d, 0.5, &pi_hat, &pi_e).unwrap();
        assert!((is - (w0 * 1.5 + w1 * 2.0) / 2.0).abs() < 1e-12);
        assert!((wis - (w0 * 1.5 + w1 * 2.0) / (w0 + w1)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_support_is_an_error() {
        let pi_hat = TabularPolicy::new(vec![vec![0.0, 1.0]]).unwrap();
        let pi_e = TabularPolicy::uniform(1, 2);
        assert_eq!(
            importance_sampling(&dataset(), 0.9, &pi_hat, &pi_e),
            Err(OpeError::ZeroSupportImportanceWeight {
                state: 0,
                action: 0
            })
        );
    }

    #[test]
    fn test_wis_zero_total_weight() {
        let pi_hat = TabularPolicy::uniform(1, 2);
        let pi_e = TabularPolicy::new(vec![vec![1.0, 0.0]]).unwrap();
        // every trajectory takes action 1 at some step
        assert_eq!(
            weighted_importance_sampling(&dataset(), 0.9, &pi_hat, &pi_e),
            Err(OpeError::ZeroTotalWeight)
        );
    }
}
