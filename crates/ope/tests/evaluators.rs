//! Estimator invariants on sampled data.

use confound_mdp::envs::toy227;
use confound_mdp::stats::estimate_policy;
use confound_mdp::{
    calc_returns, collect_sample, ConfoundMdp, ConfoundedPolicy, ConfounderMode, SamplingConfig,
    Sequential, TabularPolicy,
};
use confound_ope::{
    biased_bellman_eval, fitted_q_evaluation, importance_sampling, policy_value,
    weighted_importance_sampling, worst_case_fqe, FailurePolicy, FqeConfig, RobustConfig,
    WorstCase,
};
use proptest::prelude::*;

#[test]
fn test_on_policy_importance_sampling_is_mean_return() {
    let env = toy227(0.7, 0.2).unwrap();
    let data = collect_sample(&env.mdp, &env.behavior, &SamplingConfig::new(50, 8)).unwrap();
    let pi_hat = estimate_policy(&data).unwrap();
    let returns = calc_returns(&data, 0.9);
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;

    let is = importance_sampling(&data, 0.9, &pi_hat, &pi_hat).unwrap();
    let wis = weighted_importance_sampling(&data, 0.9, &pi_hat, &pi_hat).unwrap();
    assert!((is - mean).abs() < 1e-9);
    assert!((wis - mean).abs() < 1e-9);
}

#[test]
fn test_fqe_approaches_biased_oracle() {
    let env = toy227(0.8, 0.3).unwrap();
    let mut mdp = env.mdp.clone();
    mdp.gamma = 0.5;
    let config = SamplingConfig::new(4000, 6)
        .with_mode(ConfounderMode::Iid)
        .with_seed(11);
    let data = collect_sample(&mdp, &env.behavior, &config).unwrap();
    let pi_e = TabularPolicy::uniform(3, 2);

    let fitted = fitted_q_evaluation(&pi_e, &data, &FqeConfig::new(0.5, 12)).unwrap();
    let oracle = biased_bellman_eval(&mdp, &env.behavior, &pi_e, 12).unwrap();
    // the absorbing state is reached only through sampled data, so compare
    // the two transient states
    for s in 0..2 {
        for a in 0..2 {
            let diff = (fitted.get(s, a) - oracle.get(s, a)).abs();
            assert!(diff < 0.1, "({s}, {a}): {} vs {}", fitted.get(s, a), oracle.get(s, a));
        }
    }
}

#[test]
fn test_worst_case_value_below_fqe_value() {
    let env = toy227(0.7, 0.2).unwrap();
    let data = collect_sample(&env.mdp, &env.behavior, &SamplingConfig::new(100, 8)).unwrap();
    let pi_e = TabularPolicy::uniform(3, 2);
    let fqe = FqeConfig::new(0.9, 8);

    let naive = fitted_q_evaluation(&pi_e, &data, &fqe).unwrap();
    let robust = worst_case_fqe(
        &pi_e,
        &data,
        &env.mdp.u_dist,
        WorstCase::Sensitivity { gamma_bound: 1.5 },
        &fqe,
        &RobustConfig::default(),
        &Sequential,
    )
    .unwrap();
    let v_naive = policy_value(&naive, &pi_e, &env.mdp.x_dist).unwrap();
    let v_robust = policy_value(&robust.q, &pi_e, &env.mdp.x_dist).unwrap();
    assert!(v_robust <= v_naive + 1e-9);
}

fn row(x: f64) -> Vec<f64> {
    vec![x, 1.0 - x]
}

/// Two states, two actions, two confounder values with free parameters.
fn small_mdp(p: [f64; 4], pi: [f64; 2]) -> (ConfoundMdp, ConfoundedPolicy) {
    let mdp = ConfoundMdp::from_rows(
        vec![
            vec![vec![row(p[0]), row(p[1])], vec![row(p[1]), row(p[0])]],
            vec![vec![row(p[2]), row(p[3])], vec![row(p[3]), row(p[2])]],
        ],
        vec![vec![vec![0.0, 1.0], vec![0.5, -0.5]]; 2],
        vec![0.5, 0.5],
        vec![0.5, 0.5],
        0.9,
    )
    .unwrap();
    let behavior =
        ConfoundedPolicy::from_rows(vec![vec![row(pi[0]); 2], vec![row(pi[1]); 2]]).unwrap();
    (mdp, behavior)
}

fn all_variants() -> [WorstCase; 5] {
    [
        WorstCase::default(),
        WorstCase::PolicyBound {
            p_bound: 0.5,
            pi_bound: 2.0,
        },
        WorstCase::FixedMarginal {
            p_bound: 2.0,
            pi_bound: 2.0,
        },
        WorstCase::Bilinear {
            p_bound: 2.0,
            pi_bound: 2.0,
            u_param: 0.5,
        },
        WorstCase::Sensitivity { gamma_bound: 1.5 },
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_worst_case_never_exceeds_fqe(
        p in prop::array::uniform4(0.05f64..0.95),
        pi in prop::array::uniform2(0.2f64..0.8),
        seed in 0u64..1000,
    ) {
        let (mdp, behavior) = small_mdp(p, pi);
        let data = collect_sample(
            &mdp,
            &behavior,
            &SamplingConfig::new(30, 5).with_seed(seed),
        )
        .unwrap();
        let pi_e = TabularPolicy::uniform(2, 2);
        let fqe = FqeConfig::new(0.9, 3);
        let naive = fitted_q_evaluation(&pi_e, &data, &fqe).unwrap();
        let v_naive = policy_value(&naive, &pi_e, &mdp.x_dist).unwrap();
        let config = RobustConfig::default()
            .with_restarts(2)
            .with_seed(seed)
            .with_failure_policy(FailurePolicy::Flag);
        for variant in all_variants() {
            let robust = worst_case_fqe(
                &pi_e,
                &data,
                &mdp.u_dist,
                variant,
                &fqe,
                &config,
                &Sequential,
            )
            .unwrap();
            prop_assert!(robust.is_clean(), "{:?}: {:?}", variant, robust.failures);
            for s in 0..2 {
                for a in 0..2 {
                    prop_assert!(robust.q.get(s, a) <= naive.get(s, a) + 1e-9, "{:?}", variant);
                }
            }
            let v_robust = policy_value(&robust.q, &pi_e, &mdp.x_dist).unwrap();
            prop_assert!(v_robust <= v_naive + 1e-9, "{:?}", variant);
        }
    }
}
