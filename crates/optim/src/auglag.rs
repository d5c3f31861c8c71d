//! # Augmented Lagrangian solver
//!
//! Box bounds are enforced exactly by projection. Every other constraint is
//! moved into the objective with a Powell-Hestenes-Rockafellar augmented
//! Lagrangian and the resulting box-constrained subproblem is minimized by
//! projected gradient descent with Armijo backtracking:
//!
//! ```text
//!   outer k:  x_k  = argmin_{x ∈ box} L_ρ(x; λ, μ)
//!             λ_j ← λ_j + ρ·h_j(x_k)                 (equalities)
//!             μ_j ← max(0, μ_j + ρ·g_j(x_k))         (inequalities g ≤ 0)
//!             ρ   ← growth·ρ  unless the violation fell by 4×
//! ```
//!
//! The solver is deterministic: the same problem and start point always
//! produce the same [`Solution`].

use serde::{Deserialize, Serialize};

use crate::error::OptimError;
use crate::problem::{Bounds, ConstrainedSolver, Constraint, Problem, Solution};

/// Tuning knobs for [`AugmentedLagrangian`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugLagConfig {
    /// Multiplier updates.
    pub max_outer: usize,
    /// Projected gradient steps per subproblem.
    pub max_inner: usize,
    /// Largest constraint violation counted as feasible.
    pub feasibility_tol: f64,
    /// Stop when no coordinate moves more than this.
    pub step_tol: f64,
    pub initial_penalty: f64,
    pub penalty_growth: f64,
    pub max_penalty: f64,
    /// Sufficient-decrease constant of the Armijo test.
    pub armijo: f64,
    /// Step shrink factor while backtracking.
    pub backtrack: f64,
    pub initial_step: f64,
    pub min_step: f64,
}

impl Default for AugLagConfig {
    fn default() -> Self {
        Self {
            max_outer: 40,
            max_inner: 400,
            feasibility_tol: 1e-6,
            step_tol: 1e-10,
            initial_penalty: 10.0,
            penalty_growth: 10.0,
            max_penalty: 1e9,
            armijo: 1e-4,
            backtrack: 0.5,
            initial_step: 1.0,
            min_step: 1e-16,
        }
    }
}

impl AugLagConfig {
    pub fn with_feasibility_tol(mut self, tol: f64) -> Self {
        self.feasibility_tol = tol;
        self
    }

    pub fn with_max_outer(mut self, max_outer: usize) -> Self {
        self.max_outer = max_outer;
        self
    }

    pub fn with_max_inner(mut self, max_inner: usize) -> Self {
        self.max_inner = max_inner;
        self
    }
}

/// Multipliers of one constraint.
#[derive(Debug, Clone, Copy, Default)]
struct Multipliers {
    equality: f64,
    lower: f64,
    upper: f64,
}

/// Augmented-Lagrangian solver with projected-gradient subproblems.
#[derive(Debug, Clone, Default)]
pub struct AugmentedLagrangian {
    pub config: AugLagConfig,
}

impl AugmentedLagrangian {
    pub fn new(config: AugLagConfig) -> Self {
        Self { config }
    }

    /// `L_ρ(x)` and optionally its gradient.
    fn merit(
        problem: &Problem<'_>,
        constraints: &[&dyn Constraint],
        multipliers: &[Multipliers],
        rho: f64,
        x: &[f64],
        with_gradient: bool,
    ) -> (f64, Vec<f64>) {
        let mut value = problem.objective(x);
        let mut grad = if with_gradient {
            problem.gradient(x)
        } else {
            Vec::new()
        };

        for (c, m) in constraints.iter().zip(multipliers) {
            let v = c.value(x);
            // d(term)/d(c): zero means the constraint is inactive
            let mut slope = 0.0;
            if c.is_equality() {
                let h = v - c.lower();
                value += m.equality * h + 0.5 * rho * h * h;
                slope = m.equality + rho * h;
            } else {
                if c.lower().is_finite() {
                    let shifted = (m.lower + rho * (c.lower() - v)).max(0.0);
                    value += (shifted * shifted - m.lower * m.lower) / (2.0 * rho);
                    slope -= shifted;
                }
                if c.upper().is_finite() {
                    let shifted = (m.upper + rho * (v - c.upper())).max(0.0);
                    value += (shifted * shifted - m.upper * m.upper) / (2.0 * rho);
                    slope += shifted;
                }
            }
            if with_gradient && slope != 0.0 {
                for (g, dc) in grad.iter_mut().zip(c.gradient(x)) {
                    *g += slope * dc;
                }
            }
        }
        (value, grad)
    }

    /// Projected gradient descent on `f` over `bounds`, starting from `x`.
    ///
    /// Returns the number of accepted steps.
    fn minimize_box<F>(&self, f: F, bounds: &Bounds, x: &mut Vec<f64>) -> usize
    where
        F: Fn(&[f64], bool) -> (f64, Vec<f64>),
    {
        let cfg = &self.config;
        let (mut fx, mut grad) = f(x.as_slice(), true);
        let mut step = cfg.initial_step;

        for iter in 0..cfg.max_inner {
            let mut t = step;
            let mut accepted = None;
            while t >= cfg.min_step {
                let mut trial: Vec<f64> = x.iter().zip(&grad).map(|(xi, g)| xi - t * g).collect();
                bounds.project(&mut trial);
                let decrease: f64 = grad
                    .iter()
                    .zip(trial.iter().zip(x.iter()))
                    .map(|(g, (a, b))| g * (a - b))
                    .sum();
                if decrease >= 0.0 {
                    // projected gradient vanished
                    return iter;
                }
                let (ft, _) = f(&trial, false);
                if ft <= fx + cfg.armijo * decrease {
                    accepted = Some(trial);
                    break;
                }
                t *= cfg.backtrack;
            }

            let Some(trial) = accepted else {
                return iter;
            };
            let moved = trial
                .iter()
                .zip(x.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            *x = trial;
            if moved < cfg.step_tol {
                return iter + 1;
            }
            (fx, grad) = f(x.as_slice(), true);
            step = (t * 2.0).min(cfg.initial_step * 1e3);
        }
        cfg.max_inner
    }
}

impl ConstrainedSolver for AugmentedLagrangian {
    fn solve(&self, problem: &Problem<'_>, x0: &[f64]) -> Result<Solution, OptimError> {
        problem.check_point(x0)?;
        let cfg = &self.config;
        let constraints: Vec<&dyn Constraint> = problem.constraints().collect();
        let mut multipliers = vec![Multipliers::default(); constraints.len()];
        let mut rho = cfg.initial_penalty;

        let mut x = x0.to_vec();
        problem.bounds().project(&mut x);
        let mut violation = problem.constraint_violation(&x);
        let mut iterations = 0;

        for outer in 0..cfg.max_outer {
            let previous = x.clone();
            iterations += self.minimize_box(
                |z, with_gradient| {
                    Self::merit(problem, &constraints, &multipliers, rho, z, with_gradient)
                },
                problem.bounds(),
                &mut x,
            );

            for (c, m) in constraints.iter().zip(multipliers.iter_mut()) {
                let v = c.value(&x);
                if c.is_equality() {
                    m.equality += rho * (v - c.lower());
                } else {
                    if c.lower().is_finite() {
                        m.lower = (m.lower + rho * (c.lower() - v)).max(0.0);
                    }
                    if c.upper().is_finite() {
                        m.upper = (m.upper + rho * (v - c.upper())).max(0.0);
                    }
                }
            }

            let new_violation = problem.constraint_violation(&x);
            let moved = x
                .iter()
                .zip(&previous)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            tracing::trace!(outer, rho, violation = new_violation, moved, "augmented lagrangian step");
            if new_violation <= cfg.feasibility_tol && moved < cfg.feasibility_tol {
                violation = new_violation;
                break;
            }
            if new_violation > 0.25 * violation {
                rho = (rho * cfg.penalty_growth).min(cfg.max_penalty);
            }
            violation = new_violation;
        }

        let value = problem.objective(&x);
        if !value.is_finite() {
            return Err(OptimError::NonFiniteObjective);
        }
        Ok(Solution {
            value,
            success: violation <= cfg.feasibility_tol,
            constraint_violation: violation,
            x,
            iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{LinearConstraint, NonlinearConstraint};

    fn solver() -> AugmentedLagrangian {
        AugmentedLagrangian::default()
    }

    #[test]
    fn test_unconstrained_quadratic() {
        let problem = Problem::new(
            2,
            |x| (x[0] - 1.0).powi(2) + 2.0 * (x[1] + 0.5).powi(2),
            |x| vec![2.0 * (x[0] - 1.0), 4.0 * (x[1] + 0.5)],
        );
        let sol = solver().solve(&problem, &[0.0, 0.0]).unwrap();
        assert!(sol.success);
        assert!((sol.x[0] - 1.0).abs() < 1e-5);
        assert!((sol.x[1] + 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_box_bounds_are_active() {
        let problem = Problem::new(1, |x| -x[0], |_| vec![-1.0])
            .with_bounds(Bounds::uniform(1, 0.0, 2.0).unwrap())
            .unwrap();
        let sol = solver().solve(&problem, &[0.5]).unwrap();
        assert_eq!(sol.x, vec![2.0]);
        assert_eq!(sol.value, -2.0);
    }

    #[test]
    fn test_linear_on_simplex() {
        // min c·x over the probability simplex puts all mass on argmin c
        let c = [3.0, 1.0, 2.0];
        let problem = Problem::new(
            3,
            move |x| c.iter().zip(x).map(|(a, b)| a * b).sum::<f64>(),
            move |_| c.to_vec(),
        )
        .with_bounds(Bounds::uniform(3, 0.0, 1.0).unwrap())
        .unwrap()
        .with_linear(LinearConstraint::equality(vec![1.0; 3], 1.0))
        .unwrap();
        let sol = solver().solve(&problem, &[0.2, 0.3, 0.5]).unwrap();
        assert!(sol.constraint_violation < 1e-5, "violation {}", sol.constraint_violation);
        assert!((sol.value - 1.0).abs() < 1e-3);
        assert!((sol.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_nonlinear_inequality() {
        // min x + y subject to x² + y² ≤ 1 has optimum -√2 at (-1/√2, -1/√2)
        let problem = Problem::new(2, |x| x[0] + x[1], |_| vec![1.0, 1.0]).with_nonlinear(
            NonlinearConstraint::at_most(
                |x| x[0] * x[0] + x[1] * x[1],
                |x| vec![2.0 * x[0], 2.0 * x[1]],
                1.0,
            ),
        );
        let sol = solver().solve(&problem, &[0.3, -0.1]).unwrap();
        assert!(sol.constraint_violation < 1e-5);
        assert!((sol.value + 2f64.sqrt()).abs() < 1e-3);
    }

    #[test]
    fn test_bilinear_equality() {
        // min x subject to x·y = 1 with y ∈ [0, 4]: best is x = 1/4
        let problem = Problem::new(2, |x| x[0], |_| vec![1.0, 0.0])
            .with_bounds(Bounds::new(vec![0.0, 0.0], vec![10.0, 4.0]).unwrap())
            .unwrap()
            .with_nonlinear(NonlinearConstraint::equality(
                |x| x[0] * x[1],
                |x| vec![x[1], x[0]],
                1.0,
            ));
        let sol = solver().solve(&problem, &[1.0, 1.0]).unwrap();
        assert!(sol.constraint_violation < 1e-4);
        assert!((sol.value - 0.25).abs() < 1e-2);
    }

    #[test]
    fn test_deterministic() {
        let problem = Problem::new(2, |x| x[0] * x[1], |x| vec![x[1], x[0]])
            .with_bounds(Bounds::uniform(2, -1.0, 1.0).unwrap())
            .unwrap();
        let a = solver().solve(&problem, &[0.3, 0.2]).unwrap();
        let b = solver().solve(&problem, &[0.3, 0.2]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_start_dimension() {
        let problem = Problem::new(2, |_| 0.0, |_| vec![0.0, 0.0]);
        assert!(matches!(
            solver().solve(&problem, &[0.0]),
            Err(OptimError::DimensionMismatch { .. })
        ));
    }
}
