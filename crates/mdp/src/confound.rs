//! Confounding operators.
//!
//! Each operator takes an unconfounded base (one transition kernel per
//! action, or a flat policy) and splits it into two confounder-specific
//! copies that lean in opposite directions:
//!
//! | Operator | Perturbs | Direction |
//! |---|---|---|
//! | [`r_confound`] | transitions | toward positive / negative reward |
//! | [`confound_v`] | transitions | toward the argmax / argmin-value action's row |
//! | [`confound_pi_r`] | policy | toward actions with positive / negative expected reward |
//! | [`confound_pi_v`] | policy | toward / away from the argmax-value action |
//!
//! Confounder 0 always gets the "optimistic" lean, confounder 1 the
//! pessimistic one. Ties between actions resolve to the first index.

use confound_prob::{argmax, argmin, dot, Dist, Kernel};

use crate::error::MdpError;
use crate::model::{ConfoundMdp, RewardTensor};
use crate::policy::{ConfoundedPolicy, Policy, TabularPolicy};
use crate::value::QTable;

/// Uniform smoothing added to every action of a confounded policy so both
/// confounder-conditioned policies keep full support.
pub const POLICY_SMOOTHING: f64 = 0.05;

/// Discount used when valuing the uniform random policy for value-based
/// confounding.
pub const RANDOM_POLICY_GAMMA: f64 = 0.98;

fn check_weight(weight: f64) -> Result<(), MdpError> {
    if !(0.0..1.0).contains(&weight) {
        return Err(MdpError::InvalidParameter {
            name: "confound_weight",
            reason: format!("{weight} is outside [0, 1)"),
        });
    }
    Ok(())
}

fn shape(what: &'static str, expected: usize, got: usize) -> Result<(), MdpError> {
    if expected != got {
        return Err(MdpError::ShapeMismatch {
            what,
            expected,
            got,
        });
    }
    Ok(())
}

/// At least one action, and every action's kernel is `n_states × n_states`.
fn check_dynamics(tx: &[Kernel], n_states: usize) -> Result<(), MdpError> {
    if tx.is_empty() {
        return Err(MdpError::ShapeMismatch {
            what: "base dynamics actions",
            expected: 1,
            got: 0,
        });
    }
    for kernel in tx {
        shape("base dynamics states", n_states, kernel.n_inputs)?;
        shape("base dynamics next states", n_states, kernel.n_outputs)?;
    }
    Ok(())
}

/// Square kernels and a reward tensor of matching `[a][s][s']` shape.
/// Returns the number of states.
fn check_actions(tx: &[Kernel], r: &RewardTensor) -> Result<usize, MdpError> {
    let n_states = tx.first().map_or(0, |k| k.n_inputs);
    check_dynamics(tx, n_states)?;
    shape("reward actions", tx.len(), r.len())?;
    for rewards in r {
        shape("reward states", n_states, rewards.len())?;
        for row in rewards {
            shape("reward next states", n_states, row.len())?;
        }
    }
    Ok(n_states)
}

fn check_policy(pi: &TabularPolicy, n_actions: usize, n_states: usize) -> Result<(), MdpError> {
    shape("policy actions", n_actions, pi.n_actions())?;
    shape("policy states", n_states, pi.n_states())
}

/// Shift mass toward rewarding transitions under confounder 0 and away
/// from them under confounder 1.
///
/// Only entries strictly inside `(weight, 1 − weight)` move, so no
/// probability leaves `(0, 1)`; rows are renormalized afterwards. Returns
/// kernels indexed `[u][a]`.
pub fn r_confound(
    tx: &[Kernel],
    r: &RewardTensor,
    weight: f64,
) -> Result<Vec<Vec<Kernel>>, MdpError> {
    check_weight(weight)?;
    check_actions(tx, r)?;
    let mut p = vec![Vec::with_capacity(tx.len()), Vec::with_capacity(tx.len())];
    for (kernel, rewards) in tx.iter().zip(r) {
        let mut up = kernel.k.clone();
        let mut down = kernel.k.clone();
        for (s, row) in kernel.k.iter().enumerate() {
            for (sp, &x) in row.iter().enumerate() {
                if x <= weight || x >= 1.0 - weight {
                    continue;
                }
                let shift = if rewards[s][sp] > 0.0 { weight } else { -weight };
                up[s][sp] += shift;
                down[s][sp] -= shift;
            }
        }
        p[0].push(Kernel::from_counts(up)?);
        p[1].push(Kernel::from_counts(down)?);
    }
    Ok(p)
}

/// Mix each action's transition row with the row of the best (confounder 0)
/// or worst (confounder 1) action under state values `v`.
pub fn confound_v(tx: &[Kernel], v: &[f64], weight: f64) -> Result<Vec<Vec<Kernel>>, MdpError> {
    check_weight(weight)?;
    let n_states = v.len();
    check_dynamics(tx, n_states)?;
    let mut best = vec![vec![0.0; n_states]; n_states];
    let mut worst = vec![vec![0.0; n_states]; n_states];
    for s in 0..n_states {
        let action_values: Vec<f64> = tx.iter().map(|k| dot(k.row(s), v)).collect();
        best[s] = tx[argmax(&action_values)].k[s].clone();
        worst[s] = tx[argmin(&action_values)].k[s].clone();
    }

    let blend = |kernel: &Kernel, target: &[Vec<f64>]| -> Result<Kernel, MdpError> {
        let rows = kernel
            .k
            .iter()
            .zip(target)
            .map(|(row, t)| {
                row.iter()
                    .zip(t)
                    .map(|(x, y)| (1.0 - weight) * x + weight * y)
                    .collect()
            })
            .collect();
        Ok(Kernel::new(rows)?)
    };

    let up = tx.iter().map(|k| blend(k, &best)).collect::<Result<_, _>>()?;
    let down = tx.iter().map(|k| blend(k, &worst)).collect::<Result<_, _>>()?;
    Ok(vec![up, down])
}

/// Lean a flat policy toward actions whose expected immediate reward is
/// non-negative (confounder 0) or negative (confounder 1), then add
/// [`POLICY_SMOOTHING`] to every action and renormalize.
pub fn confound_pi_r(
    pi: &TabularPolicy,
    tx: &[Kernel],
    r: &RewardTensor,
    weight: f64,
) -> Result<ConfoundedPolicy, MdpError> {
    check_weight(weight)?;
    let n_states = check_actions(tx, r)?;
    check_policy(pi, tx.len(), n_states)?;
    let mut up = pi.pi.k.clone();
    let mut down = pi.pi.k.clone();
    for (s, row) in pi.pi.k.iter().enumerate() {
        for (a, &x) in row.iter().enumerate() {
            let (raised, lowered) = ((x + weight).min(1.0), (x - weight).max(0.0));
            if dot(tx[a].row(s), &r[a][s]) >= 0.0 {
                up[s][a] = raised;
                down[s][a] = lowered;
            } else {
                up[s][a] = lowered;
                down[s][a] = raised;
            }
        }
    }
    ConfoundedPolicy::new(vec![smooth(up)?, smooth(down)?])
}

/// Add [`POLICY_SMOOTHING`] to every action and renormalize each row.
fn smooth(rows: Vec<Vec<f64>>) -> Result<Kernel, MdpError> {
    let rows = rows
        .into_iter()
        .map(|row| row.into_iter().map(|x| x + POLICY_SMOOTHING).collect())
        .collect();
    Ok(Kernel::from_counts(rows)?)
}

/// Raise the argmax-value action by `weight` and lower every other action
/// by `weight` under confounder 0, the reverse under confounder 1, clipping
/// at zero and smoothing with [`POLICY_SMOOTHING`].
pub fn confound_pi_v(
    pi: &TabularPolicy,
    tx: &[Kernel],
    v: &[f64],
    weight: f64,
) -> Result<ConfoundedPolicy, MdpError> {
    check_weight(weight)?;
    check_dynamics(tx, v.len())?;
    check_policy(pi, tx.len(), v.len())?;
    let mut up = pi.pi.k.clone();
    let mut down = pi.pi.k.clone();
    for (s, row) in pi.pi.k.iter().enumerate() {
        let action_values: Vec<f64> = tx.iter().map(|k| dot(k.row(s), v)).collect();
        let best = argmax(&action_values);
        for (a, &x) in row.iter().enumerate() {
            let (raised, lowered) = (x + weight, (x - weight).max(0.0));
            if a == best {
                up[s][a] = raised;
                down[s][a] = lowered;
            } else {
                up[s][a] = lowered;
                down[s][a] = raised;
            }
        }
    }
    ConfoundedPolicy::new(vec![smooth(up)?, smooth(down)?])
}

/// State values of the uniform random policy on unconfounded dynamics,
/// evaluated for `horizon` exact Bellman steps at [`RANDOM_POLICY_GAMMA`].
pub fn random_policy_value(
    tx: &[Kernel],
    r: &RewardTensor,
    x_dist: &Dist,
    horizon: usize,
) -> Result<Vec<f64>, MdpError> {
    check_actions(tx, r)?;
    let mdp = ConfoundMdp::new(
        vec![tx.to_vec()],
        r.clone(),
        x_dist.clone(),
        Dist::point(1, 0),
        RANDOM_POLICY_GAMMA,
    )?;
    let pi = TabularPolicy::uniform(mdp.n_states(), mdp.n_actions());
    let q: QTable = mdp.bellman_eval(&pi, horizon)?;
    Ok(q.policy_values(&pi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_action_base() -> (Vec<Kernel>, RewardTensor) {
        let tx = vec![
            Kernel::new(vec![vec![0.5, 0.5], vec![0.3, 0.7]]).unwrap(),
            Kernel::new(vec![vec![0.2, 0.8], vec![0.0, 1.0]]).unwrap(),
        ];
        let r = vec![vec![vec![-1.0, 1.0]; 2]; 2];
        (tx, r)
    }

    #[test]
    fn test_r_confound_leans_toward_reward() {
        let (tx, r) = two_action_base();
        let p = r_confound(&tx, &r, 0.1).unwrap();
        assert_eq!(p.len(), 2);
        // u = 0 prefers the rewarding next state 1
        assert!(p[0][0].k[0][1] > tx[0].k[0][1]);
        assert!(p[1][0].k[0][1] < tx[0].k[0][1]);
        // entries at 0 or 1 are left alone
        assert_eq!(p[0][1].row(1), &[0.0, 1.0]);
    }

    #[test]
    fn test_confound_v_mixes_best_row() {
        let (tx, _) = two_action_base();
        let v = vec![0.0, 1.0];
        let p = confound_v(&tx, &v, 0.5).unwrap();
        // action 1 reaches state 1 more often: it is the argmax everywhere
        assert!((p[0][0].k[0][1] - 0.65).abs() < 1e-12);
        assert!((p[1][1].k[0][1] - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_confound_pi_r_full_support() {
        let (tx, r) = two_action_base();
        let pi = TabularPolicy::new(vec![vec![1.0, 0.0], vec![0.5, 0.5]]).unwrap();
        let pi_u = confound_pi_r(&pi, &tx, &r, 0.3).unwrap();
        for kernel in &pi_u.by_confounder {
            assert!(kernel.k.iter().flatten().all(|&x| x > 0.0));
        }
    }

    #[test]
    fn test_confound_pi_v_ties_go_to_first_action() {
        let tx = vec![Kernel::identity(2), Kernel::identity(2)];
        let pi = TabularPolicy::uniform(2, 2);
        let pi_u = confound_pi_v(&pi, &tx, &[1.0, 1.0], 0.2).unwrap();
        // every action ties, so action 0 is the favored one
        assert!((pi_u.by_confounder[0].k[0][0] - 0.75 / 1.1).abs() < 1e-12);
        assert!((pi_u.by_confounder[1].k[0][0] - 0.35 / 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_weight_out_of_range() {
        let (tx, r) = two_action_base();
        assert!(matches!(
            r_confound(&tx, &r, 1.0),
            Err(MdpError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_r_confound_rejects_reward_shape() {
        let (tx, mut r) = two_action_base();
        r[1].pop();
        assert_eq!(
            r_confound(&tx, &r, 0.1),
            Err(MdpError::ShapeMismatch {
                what: "reward states",
                expected: 2,
                got: 1,
            })
        );
    }

    #[test]
    fn test_confound_v_rejects_bad_shapes() {
        assert!(matches!(
            confound_v(&[], &[0.0, 1.0], 0.5),
            Err(MdpError::ShapeMismatch { got: 0, .. })
        ));
        assert!(matches!(
            confound_v(&[Kernel::identity(2)], &[0.0, 1.0, 2.0], 0.5),
            Err(MdpError::ShapeMismatch {
                expected: 3,
                got: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_confound_pi_r_rejects_policy_action_count() {
        let (tx, r) = two_action_base();
        let pi = TabularPolicy::uniform(2, 3);
        assert_eq!(
            confound_pi_r(&pi, &tx, &r, 0.3),
            Err(MdpError::ShapeMismatch {
                what: "policy actions",
                expected: 2,
                got: 3,
            })
        );
    }

    #[test]
    fn test_confound_pi_v_rejects_bad_shapes() {
        let (tx, _) = two_action_base();
        let pi = TabularPolicy::uniform(2, 2);
        assert!(matches!(
            confound_pi_v(&pi, &[], &[0.0, 1.0], 0.2),
            Err(MdpError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            confound_pi_v(&pi, &tx, &[0.0], 0.2),
            Err(MdpError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            confound_pi_v(&TabularPolicy::uniform(3, 2), &tx, &[0.0, 1.0], 0.2),
            Err(MdpError::ShapeMismatch {
                what: "policy states",
                ..
            })
        ));
    }

    #[test]
    fn test_random_policy_value_absorbing() {
        let tx = vec![Kernel::identity(1)];
        let r = vec![vec![vec![1.0]]];
        let v = random_policy_value(&tx, &r, &Dist::point(1, 0), 1000).unwrap();
        assert!((v[0] - 1.0 / (1.0 - RANDOM_POLICY_GAMMA)).abs() < 1e-6);
    }
}
