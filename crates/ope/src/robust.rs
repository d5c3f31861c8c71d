//! # Worst-case fitted-Q evaluation
//!
//! Each sweep replaces the bucket mean of FQE with the lowest value any
//! confounded model consistent with the data could produce:
//!
//! ```text
//!   y(s')      = R̂(s,a,s') + γ · Σ_a' pi_e(a'|s') · Q_k(s', a')
//!   Q_k+1(s,a) = min { objective(P_u, ...) : constraints of the variant }
//! ```
//!
//! The per-cell programs are nonconvex, so every cell is solved from
//! several starts and the lowest feasible value is kept, together with the
//! unconfounded point `P_u = P̂` which is always feasible. The first start
//! is that point itself (unless `warm_start` is off); restart `i` after it
//! draws from sampler stream `(s, a, i)`. The result therefore never
//! exceeds the standard FQE sweep, and adding restarts never raises it.
//!
//! Cells are independent and are fanned out over a [`ParallelMap`]; cells
//! without data are set to zero, as in FQE.
//!
//! ## Variants
//!
//! | Variant | Free variables | Coupling |
//! |---|---|---|
//! | [`WorstCase::NormBall`] | `P_u`, posterior weights | `‖P_u − P_v‖ ≤ p_bound`, reconstruction within `eps` |
//! | [`WorstCase::PolicyBound`] | `P_u`, `pi_u`, marginal `p_u` | `Σ p_u pi_u = pi_hat`, `pi_u/pi_v ≤ pi_bound` |
//! | [`WorstCase::FixedMarginal`] | `P_u`, `pi_u` | sensitivity boxes, marginal `u_dist` |
//! | [`WorstCase::Bilinear`] | `P_u`, `pi_u` | sensitivity boxes, exact bilinear reconstruction |
//! | [`WorstCase::Sensitivity`] | next-state weights | linear program, solved exactly |

use confound_mdp::stats::EmpiricalModel;
use confound_mdp::{Dataset, ParallelMap, QTable, TabularPolicy};
use confound_optim::{AugLagConfig, AugmentedLagrangian};
use confound_prob::{Dist, SeededSampler};
use serde::{Deserialize, Serialize};

use crate::cells::{solve_once, solve_warm, Cell};
use crate::error::OpeError;
use crate::fqe::{check_gamma, check_shapes, next_state_values, FqeConfig};

/// The constraint family of the worst-case program.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WorstCase {
    /// Confounder-specific transition rows at most `p_bound` apart in
    /// Euclidean norm, posterior weights in `[cond_bound, 1 − cond_bound]`.
    NormBall { p_bound: f64, cond_bound: f64 },
    /// Adds confounder-conditioned action probabilities whose pairwise
    /// ratios stay within `[1/pi_bound, pi_bound]`, and a free confounder
    /// marginal.
    PolicyBound { p_bound: f64, pi_bound: f64 },
    /// Marginal-sensitivity boxes with bounds `p_bound` (transitions) and
    /// `pi_bound` (policy) under the known confounder marginal.
    FixedMarginal { p_bound: f64, pi_bound: f64 },
    /// Sensitivity boxes with marginal `[1 − u_param, u_param]` and the
    /// mixture enforced exactly.
    Bilinear {
        p_bound: f64,
        pi_bound: f64,
        u_param: f64,
    },
    /// Marginal-sensitivity linear program with bound `gamma_bound`.
    Sensitivity { gamma_bound: f64 },
}

impl Default for WorstCase {
    fn default() -> Self {
        Self::NormBall {
            p_bound: 0.6 * std::f64::consts::SQRT_2,
            cond_bound: 0.25,
        }
    }
}

fn invalid(name: &'static str, reason: String) -> OpeError {
    OpeError::InvalidParameter { name, reason }
}

fn check_at_least_one(name: &'static str, value: f64) -> Result<(), OpeError> {
    if value.is_nan() || value < 1.0 {
        return Err(invalid(name, format!("{value} is below 1")));
    }
    Ok(())
}

impl WorstCase {
    /// Check the parameters against the number of confounder values.
    pub fn validate(&self, n_confound: usize) -> Result<(), OpeError> {
        match *self {
            Self::NormBall {
                p_bound,
                cond_bound,
            } => {
                if p_bound.is_nan() || p_bound < 0.0 {
                    return Err(invalid("p_bound", format!("{p_bound} is negative")));
                }
                if !(0.0..=1.0 / n_confound as f64).contains(&cond_bound) {
                    return Err(invalid(
                        "cond_bound",
                        format!("{cond_bound} is outside [0, 1/{n_confound}]"),
                    ));
                }
            }
            Self::PolicyBound { p_bound, pi_bound } => {
                if p_bound.is_nan() || p_bound < 0.0 {
                    return Err(invalid("p_bound", format!("{p_bound} is negative")));
                }
                check_at_least_one("pi_bound", pi_bound)?;
            }
            Self::FixedMarginal { p_bound, pi_bound } => {
                check_at_least_one("p_bound", p_bound)?;
                check_at_least_one("pi_bound", pi_bound)?;
            }
            Self::Bilinear {
                p_bound,
                pi_bound,
                u_param,
            } => {
                check_at_least_one("p_bound", p_bound)?;
                check_at_least_one("pi_bound", pi_bound)?;
                if !(0.0..=1.0).contains(&u_param) {
                    return Err(invalid("u_param", format!("{u_param} is outside [0, 1]")));
                }
            }
            Self::Sensitivity { gamma_bound } => check_at_least_one("gamma_bound", gamma_bound)?,
        }
        Ok(())
    }

    /// Whether one solve is exact, making restarts unnecessary.
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Sensitivity { .. })
    }
}

/// What a sweep does with a cell whose restarts all fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Keep the unconfounded value and record a [`CellFailure`].
    #[default]
    Flag,
    /// Stop with [`OpeError::OptimizationFailure`].
    Abort,
}

/// Configuration of the worst-case sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustConfig {
    /// Random starts per cell.
    pub restarts: usize,
    /// Base seed of the restart streams.
    pub seed: u64,
    /// Largest constraint violation accepted from a restart.
    pub feasibility_tol: f64,
    /// Start the first restart at the unconfounded point.
    pub warm_start: bool,
    pub failure_policy: FailurePolicy,
    pub solver: AugLagConfig,
}

impl Default for RobustConfig {
    fn default() -> Self {
        Self {
            restarts: 3,
            seed: 0,
            feasibility_tol: 1e-4,
            warm_start: true,
            failure_policy: FailurePolicy::Flag,
            solver: AugLagConfig::default(),
        }
    }
}

impl RobustConfig {
    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_feasibility_tol(mut self, tol: f64) -> Self {
        self.feasibility_tol = tol;
        self
    }

    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.warm_start = warm_start;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_solver(mut self, solver: AugLagConfig) -> Self {
        self.solver = solver;
        self
    }
}

/// Outcome of one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSolution {
    /// `min(best_restart, nominal)`.
    pub value: f64,
    /// Value at the unconfounded point.
    pub nominal: f64,
    /// Lowest value among feasible restarts.
    pub best_restart: Option<f64>,
    /// Smallest constraint violation among restarts.
    pub min_violation: f64,
    pub feasible_restarts: usize,
    pub restarts: usize,
}

impl CellSolution {
    fn unobserved() -> Self {
        Self {
            value: 0.0,
            nominal: 0.0,
            best_restart: None,
            min_violation: 0.0,
            feasible_restarts: 0,
            restarts: 0,
        }
    }

    /// Every restart missed the feasibility tolerance.
    pub fn failed(&self) -> bool {
        self.restarts > 0 && self.feasible_restarts == 0
    }
}

/// A cell flagged under [`FailurePolicy::Flag`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellFailure {
    pub sweep: usize,
    pub state: usize,
    pub action: usize,
    pub violation: f64,
    pub restarts: usize,
}

/// Result of a sweep or a full evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustReport {
    pub q: QTable,
    pub failures: Vec<CellFailure>,
}

impl RobustReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Worst-case FQE over one empirical model.
#[derive(Debug, Clone)]
pub struct WorstCaseFqe<'a> {
    model: &'a EmpiricalModel,
    u_dist: Dist,
    variant: WorstCase,
    gamma: f64,
    config: RobustConfig,
    solver: AugmentedLagrangian,
}

impl<'a> WorstCaseFqe<'a> {
    pub fn new(
        model: &'a EmpiricalModel,
        u_dist: Dist,
        variant: WorstCase,
        gamma: f64,
        config: RobustConfig,
    ) -> Result<Self, OpeError> {
        check_gamma(gamma)?;
        variant.validate(u_dist.len())?;
        if config.restarts == 0 {
            return Err(invalid("restarts", "at least one restart is required".to_string()));
        }
        if config.feasibility_tol.is_nan() || config.feasibility_tol <= 0.0 {
            return Err(invalid(
                "feasibility_tol",
                format!("{} is not positive", config.feasibility_tol),
            ));
        }
        let solver = AugmentedLagrangian::new(config.solver.clone());
        Ok(Self {
            model,
            u_dist,
            variant,
            gamma,
            config,
            solver,
        })
    }

    pub fn variant(&self) -> &WorstCase {
        &self.variant
    }

    /// Sampling tolerance `eps = 1/√n` of the underlying model.
    pub fn eps(&self) -> f64 {
        self.model.sampling_tolerance()
    }

    fn n_states(&self) -> usize {
        self.model.pi_hat.pi.n_inputs
    }

    fn n_actions(&self) -> usize {
        self.model.pi_hat.pi.n_outputs
    }

    /// Targets `y(s') = R̂(s,a,s') + γ · V(s')` for one cell.
    pub fn targets(&self, values: &[f64], state: usize, action: usize) -> Vec<f64> {
        self.model.r_hat[action][state]
            .iter()
            .zip(values)
            .map(|(r, v)| r + self.gamma * v)
            .collect()
    }

    /// Solve cell `(state, action)` for targets `y` with `restarts` starts.
    pub fn solve_cell(
        &self,
        state: usize,
        action: usize,
        y: &[f64],
        restarts: usize,
    ) -> Result<CellSolution, OpeError> {
        if state >= self.n_states() || action >= self.n_actions() || y.len() != self.n_states() {
            return Err(OpeError::ShapeMismatch {
                what: "worst-case cell",
                expected: self.n_states(),
                got: y.len(),
            });
        }
        if !self.model.is_observed(state, action) {
            return Ok(CellSolution::unobserved());
        }

        let cell = Cell {
            y,
            p_hat: self.model.p_hat[action].row(state),
            pi_hat: self.model.pi_hat.prob(state, action),
            eps: self.eps(),
            u_dist: &self.u_dist.p,
        };
        let nominal = cell.nominal_value();
        let restarts = if self.variant.is_exact() {
            restarts.min(1)
        } else {
            restarts
        };

        let cell_index = (state * self.n_actions() + action) as u64;
        let mut best: Option<f64> = None;
        let mut min_violation = f64::INFINITY;
        let mut feasible = 0;
        for i in 0..restarts {
            let solution = if i == 0 && self.config.warm_start {
                solve_warm(&self.variant, &cell, &self.solver)?
            } else {
                let stream = (cell_index << 32) | i as u64;
                let mut sampler = SeededSampler::derive(self.config.seed, stream);
                solve_once(&self.variant, &cell, &self.solver, &mut sampler)?
            };
            min_violation = min_violation.min(solution.constraint_violation);
            if solution.constraint_violation <= self.config.feasibility_tol {
                feasible += 1;
                best = Some(best.map_or(solution.value, |b| b.min(solution.value)));
            }
        }

        Ok(CellSolution {
            value: best.map_or(nominal, |b| b.min(nominal)),
            nominal,
            best_restart: best,
            min_violation,
            feasible_restarts: feasible,
            restarts,
        })
    }

    fn sweep<E: ParallelMap>(
        &self,
        f: &QTable,
        pi_e: &TabularPolicy,
        executor: &E,
        sweep: usize,
    ) -> Result<RobustReport, OpeError> {
        let values = next_state_values(f, pi_e);
        let n_actions = self.n_actions();
        let cells: Vec<(usize, usize)> = (0..self.n_states())
            .flat_map(|s| (0..n_actions).map(move |a| (s, a)))
            .collect();
        let solved = executor.map(cells, |_, (s, a)| {
            let y = self.targets(&values, s, a);
            self.solve_cell(s, a, &y, self.config.restarts)
                .map(|solution| (s, a, solution))
        });

        let mut report = RobustReport {
            q: QTable::zeros(self.n_states(), n_actions),
            failures: Vec::new(),
        };
        for result in solved {
            let (state, action, solution) = result?;
            if solution.failed() {
                match self.config.failure_policy {
                    FailurePolicy::Abort => {
                        return Err(OpeError::OptimizationFailure {
                            state,
                            action,
                            violation: solution.min_violation,
                            restarts: solution.restarts,
                        });
                    }
                    FailurePolicy::Flag => {
                        tracing::warn!(
                            sweep,
                            state,
                            action,
                            violation = solution.min_violation,
                            restarts = solution.restarts,
                            "worst-case cell failed, keeping the unconfounded value"
                        );
                        report.failures.push(CellFailure {
                            sweep,
                            state,
                            action,
                            violation: solution.min_violation,
                            restarts: solution.restarts,
                        });
                    }
                }
            }
            report.q.set(state, action, solution.value);
        }
        Ok(report)
    }

    /// One worst-case sweep from `f`.
    pub fn update<E: ParallelMap>(
        &self,
        f: &QTable,
        pi_e: &TabularPolicy,
        executor: &E,
    ) -> Result<RobustReport, OpeError> {
        self.check(f, pi_e)?;
        self.sweep(f, pi_e, executor, 0)
    }

    /// `iterations` worst-case sweeps from zero.
    pub fn evaluate<E: ParallelMap>(
        &self,
        pi_e: &TabularPolicy,
        iterations: usize,
        executor: &E,
    ) -> Result<RobustReport, OpeError> {
        let mut report = RobustReport {
            q: QTable::zeros(self.n_states(), self.n_actions()),
            failures: Vec::new(),
        };
        self.check(&report.q, pi_e)?;
        for sweep in 0..iterations {
            let next = self.sweep(&report.q, pi_e, executor, sweep)?;
            tracing::debug!(
                sweep,
                delta = next.q.max_abs_diff(&report.q),
                failures = next.failures.len(),
                "worst-case sweep"
            );
            report.q = next.q;
            report.failures.extend(next.failures);
        }
        Ok(report)
    }

    fn check(&self, f: &QTable, pi_e: &TabularPolicy) -> Result<(), OpeError> {
        if f.n_states() != self.n_states() || f.n_actions() != self.n_actions() {
            return Err(OpeError::ShapeMismatch {
                what: "q table",
                expected: self.n_states() * self.n_actions(),
                got: f.n_states() * f.n_actions(),
            });
        }
        if pi_e.pi.n_inputs != self.n_states() || pi_e.pi.n_outputs != self.n_actions() {
            return Err(OpeError::ShapeMismatch {
                what: "evaluation policy",
                expected: self.n_states() * self.n_actions(),
                got: pi_e.pi.n_inputs * pi_e.pi.n_outputs,
            });
        }
        Ok(())
    }
}

/// Worst-case FQE of `pi_e` on a dataset.
pub fn worst_case_fqe<E: ParallelMap>(
    pi_e: &TabularPolicy,
    dataset: &Dataset,
    u_dist: &Dist,
    variant: WorstCase,
    fqe: &FqeConfig,
    config: &RobustConfig,
    executor: &E,
) -> Result<RobustReport, OpeError> {
    check_shapes(dataset, &QTable::zeros(dataset.n_states, dataset.n_actions), pi_e)?;
    let model = EmpiricalModel::estimate(dataset)?;
    let robust = WorstCaseFqe::new(&model, u_dist.clone(), variant, fqe.gamma, config.clone())?;
    let report = robust.evaluate(pi_e, fqe.iterations, executor)?;
    tracing::info!(
        variant = ?variant,
        iterations = fqe.iterations,
        failures = report.failures.len(),
        "worst-case fqe finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fqe::fitted_q_evaluation;
    use confound_mdp::{RayonMap, Sequential, Trajectory, Transition};

    fn t(state: usize, action: usize, next_state: usize, reward: f64) -> Transition {
        Transition {
            state,
            action,
            confounder: 0,
            next_state,
            reward,
        }
    }

    /// Two states, two actions; action 0 from state 0 splits between a
    /// rewarding and a neutral next state.
    fn dataset() -> Dataset {
        let mut trajectories = Vec::new();
        for i in 0..40 {
            let next = i % 2;
            let reward = if next == 1 { 1.0 } else { 0.0 };
            trajectories.push(Trajectory {
                steps: vec![t(0, i % 3 % 2, next, reward), t(next, 0, 0, 0.0)],
            });
        }
        Dataset::new(trajectories, 2, 2).unwrap()
    }

    #[test]
    fn test_validate() {
        assert!(WorstCase::default().validate(2).is_ok());
        assert!(WorstCase::NormBall {
            p_bound: 0.5,
            cond_bound: 0.6
        }
        .validate(2)
        .is_err());
        assert!(WorstCase::Sensitivity { gamma_bound: 0.5 }.validate(2).is_err());
        assert!(WorstCase::Bilinear {
            p_bound: 2.0,
            pi_bound: 2.0,
            u_param: 1.5
        }
        .validate(2)
        .is_err());
    }

    #[test]
    fn test_unobserved_cell_is_zero() {
        let d = dataset();
        let model = EmpiricalModel::estimate(&d).unwrap();
        let robust =
            WorstCaseFqe::new(&model, Dist::uniform(2), WorstCase::default(), 0.9, RobustConfig::default())
                .unwrap();
        // state 1 never takes action 1
        let cell = robust.solve_cell(1, 1, &[1.0, 1.0], 3).unwrap();
        assert_eq!(cell.value, 0.0);
        assert!(!cell.failed());
    }

    #[test]
    fn test_more_restarts_never_raise_value() {
        let d = dataset();
        let model = EmpiricalModel::estimate(&d).unwrap();
        let variant = WorstCase::PolicyBound {
            p_bound: 0.5,
            pi_bound: 2.0,
        };
        let robust = WorstCaseFqe::new(&model, Dist::uniform(2), variant, 0.9, RobustConfig::default())
            .unwrap();
        let y = [0.0, 1.0];
        let one = robust.solve_cell(0, 0, &y, 1).unwrap();
        let ten = robust.solve_cell(0, 0, &y, 10).unwrap();
        assert!(ten.value <= one.value);
        assert!(one.value <= one.nominal);
        assert_eq!(ten.restarts, 10);
    }

    #[test]
    fn test_sensitivity_sweep_below_fqe() {
        let d = dataset();
        let pi_e = TabularPolicy::uniform(2, 2);
        let fqe = FqeConfig::new(0.9, 5);
        let naive = fitted_q_evaluation(&pi_e, &d, &fqe).unwrap();
        let report = worst_case_fqe(
            &pi_e,
            &d,
            &Dist::uniform(2),
            WorstCase::Sensitivity { gamma_bound: 2.0 },
            &fqe,
            &RobustConfig::default(),
            &Sequential,
        )
        .unwrap();
        assert!(report.is_clean());
        for s in 0..2 {
            for a in 0..2 {
                assert!(report.q.get(s, a) <= naive.get(s, a) + 1e-9);
            }
        }
        assert!(report.q.get(0, 0) < naive.get(0, 0));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let d = dataset();
        let pi_e = TabularPolicy::uniform(2, 2);
        let fqe = FqeConfig::new(0.9, 2);
        let config = RobustConfig::default().with_restarts(2).with_seed(3);
        let variant = WorstCase::NormBall {
            p_bound: 0.3,
            cond_bound: 0.25,
        };
        let u = Dist::uniform(2);
        let seq = worst_case_fqe(&pi_e, &d, &u, variant, &fqe, &config, &Sequential).unwrap();
        let par = worst_case_fqe(&pi_e, &d, &u, variant, &fqe, &config, &RayonMap::new()).unwrap();
        assert_eq!(seq, par);
    }

    #[test]
    fn test_abort_policy_reports_failure() {
        let d = dataset();
        let model = EmpiricalModel::estimate(&d).unwrap();
        // a single inner step cannot reach the feasible set
        let config = RobustConfig::default()
            .with_restarts(1)
            .with_warm_start(false)
            .with_feasibility_tol(1e-12)
            .with_failure_policy(FailurePolicy::Abort)
            .with_solver(AugLagConfig::default().with_max_outer(1).with_max_inner(1));
        let robust = WorstCaseFqe::new(
            &model,
            Dist::uniform(2),
            WorstCase::PolicyBound {
                p_bound: 0.2,
                pi_bound: 1.5,
            },
            0.9,
            config,
        )
        .unwrap();
        let pi_e = TabularPolicy::uniform(2, 2);
        let err = robust.update(&QTable::zeros(2, 2), &pi_e, &Sequential);
        assert!(matches!(err, Err(OpeError::OptimizationFailure { .. })));
    }

    #[test]
    fn test_config_json() {
        let config: RobustConfig =
            serde_json::from_str(r#"{"restarts": 10, "failure_policy": "Abort"}"#).unwrap();
        assert_eq!(config.restarts, 10);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.seed, 0);
        assert!(config.warm_start);
    }

    #[test]
    fn test_warm_start_keeps_every_variant_clean() {
        let d = dataset();
        let pi_e = TabularPolicy::uniform(2, 2);
        let fqe = FqeConfig::new(0.9, 3);
        let naive = fitted_q_evaluation(&pi_e, &d, &fqe).unwrap();
        let config = RobustConfig::default().with_restarts(1);
        for variant in [
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
                u_param: 0.4,
            },
        ] {
            let report =
                worst_case_fqe(&pi_e, &d, &Dist::uniform(2), variant, &fqe, &config, &Sequential)
                    .unwrap();
            assert!(report.is_clean(), "{variant:?}: {:?}", report.failures);
            for s in 0..2 {
                for a in 0..2 {
                    assert!(report.q.get(s, a) <= naive.get(s, a) + 1e-9, "{variant:?}");
                }
            }
        }
    }
}
