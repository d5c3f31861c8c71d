//! Oracle targets computed from the true model.
//!
//! [`biased_bellman_update`] is the fixed point a confounder-blind FQE
//! converges to with infinite data: each `(s, a)` backs up through the
//! confounder posterior `P(u | s, a)` induced by the behavior policy
//! rather than through the prior `u_dist`. Comparing it with
//! [`ConfoundMdp::bellman_eval`] isolates the confounding bias.

use confound_mdp::{ConfoundMdp, ConfoundedPolicy, Policy, QTable};
use confound_prob::dot;

use crate::error::OpeError;

/// One step of the biased Bellman operator
/// `Q(s,a) = Σ_u P(u|s,a) · P_u(·|s,a) · (R + γ f̄)`.
pub fn biased_bellman_update<P: Policy + ?Sized>(
    mdp: &ConfoundMdp,
    f: &QTable,
    pi_b: &ConfoundedPolicy,
    pi_e: &P,
) -> Result<QTable, OpeError> {
    mdp.check_policy(pi_b)?;
    mdp.check_policy(pi_e)?;
    if f.n_states() != mdp.n_states() || f.n_actions() != mdp.n_actions() {
        return Err(OpeError::ShapeMismatch {
            what: "q table",
            expected: mdp.n_states() * mdp.n_actions(),
            got: f.n_states() * f.n_actions(),
        });
    }

    let posterior = pi_b.confounder_posterior(&mdp.u_dist)?;
    let f_avg = mdp.bootstrap_values(f, pi_e);
    let mut next = QTable::zeros(mdp.n_states(), mdp.n_actions());
    for s in 0..mdp.n_states() {
        for a in 0..mdp.n_actions() {
            let target: Vec<f64> = mdp.r[a][s]
                .iter()
                .zip(&f_avg)
                .map(|(r, v)| r + mdp.gamma * v)
                .collect();
            let value = (0..mdp.n_confound())
                .map(|u| posterior[s].k[a][u] * dot(mdp.transition(u, a).row(s), &target))
                .sum::<f64>();
            next.set(s, a, value);
        }
    }
    Ok(next)
}

/// `horizon` biased Bellman steps from zero.
pub fn biased_bellman_eval<P: Policy + ?Sized>(
    mdp: &ConfoundMdp,
    pi_b: &ConfoundedPolicy,
    pi_e: &P,
    horizon: usize,
) -> Result<QTable, OpeError> {
    let mut q = QTable::zeros(mdp.n_states(), mdp.n_actions());
    for _ in 0..horizon {
        q = biased_bellman_update(mdp, &q, pi_b, pi_e)?;
    }
    Ok(q)
}
