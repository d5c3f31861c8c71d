//! Per-(state, action) worst-case programs.
//!
//! Every program chooses confounder-specific next-state rows `P_u` for one
//! cell and minimizes the expected bootstrapped target `y`. Decision
//! vectors are laid out as
//!
//! ```text
//!   [ P_0[0..S] | P_1[0..S] | ... | P_K-1[0..S] | extras ]
//! ```
//!
//! where the extras are mixture weights, confounder-conditioned action
//! probabilities `pi_u`, or a free confounder marginal `p_u`, depending on
//! the variant.

use confound_optim::{
    AugmentedLagrangian, BandLp, Bounds, ConstrainedSolver, LinearConstraint, NonlinearConstraint,
    OptimError, Problem, Solution,
};
use confound_prob::{dot, Sampler};

use crate::error::OpeError;
use crate::robust::WorstCase;

/// The empirical data of one `(state, action)` cell.
#[derive(Debug, Clone, Copy)]
pub struct Cell<'a> {
    /// Bootstrapped target per next state.
    pub y: &'a [f64],
    /// Empirical next-state row `P̂(·|s,a)`.
    pub p_hat: &'a [f64],
    /// Empirical behavior probability `pi_hat(a|s)`.
    pub pi_hat: f64,
    /// Sampling tolerance.
    pub eps: f64,
    /// Confounder marginal.
    pub u_dist: &'a [f64],
}

impl Cell<'_> {
    /// Objective at the unconfounded point `P_u = P̂` for every `u`.
    pub fn nominal_value(&self) -> f64 {
        dot(self.y, self.p_hat)
    }
}

/// Marginal-sensitivity interval for a probability `p` under bound `b ≥ 1`:
/// `[1 / (b/p + 1 − b), min(1, 1 / (1/(b·p) + 1 − 1/b))]`, collapsing to
/// `[0, 0]` when `p = 0`.
pub fn sensitivity_interval(bound: f64, p: f64) -> (f64, f64) {
    if p <= 0.0 {
        return (0.0, 0.0);
    }
    let lower = 1.0 / (bound / p + 1.0 - bound);
    let upper = (1.0 / (1.0 / (bound * p) + 1.0 - 1.0 / bound)).min(1.0);
    (lower.min(p), upper.max(p))
}

// ============================================================================
// Building blocks
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Layout {
    k: usize,
    s: usize,
    extras: usize,
}

impl Layout {
    fn p(&self, u: usize, sp: usize) -> usize {
        u * self.s + sp
    }

    fn extra(&self, j: usize) -> usize {
        self.k * self.s + j
    }

    fn dim(&self) -> usize {
        self.k * self.s + self.extras
    }

    fn row<'x>(&self, x: &'x [f64], u: usize) -> &'x [f64] {
        &x[u * self.s..(u + 1) * self.s]
    }

    fn unit(&self, indices: impl IntoIterator<Item = (usize, f64)>) -> Vec<f64> {
        let mut coeffs = vec![0.0; self.dim()];
        for (i, c) in indices {
            coeffs[i] = c;
        }
        coeffs
    }

    /// `Σ_s' P_u[s'] = 1` for every `u`.
    fn simplex_rows(&self) -> Vec<LinearConstraint> {
        (0..self.k)
            .map(|u| {
                let coeffs = self.unit((0..self.s).map(|sp| (self.p(u, sp), 1.0)));
                LinearConstraint::equality(coeffs, 1.0)
            })
            .collect()
    }
}

/// Weight `w_u` of `P_u` in the reconstructed empirical row.
#[derive(Debug, Clone)]
enum MixWeight {
    /// `w_u = x[offset + u]`
    Free { offset: usize },
    /// `w_u = x[marginal + u] · x[pi + u] / pi_hat`
    Joint {
        pi: usize,
        marginal: usize,
        pi_hat: f64,
    },
    /// `w_u = m_u · x[pi + u] / pi_hat`
    Fixed {
        pi: usize,
        marginal: Vec<f64>,
        pi_hat: f64,
    },
}

impl MixWeight {
    fn value(&self, x: &[f64], u: usize) -> f64 {
        match self {
            Self::Free { offset } => x[*offset + u],
            Self::Joint {
                pi,
                marginal,
                pi_hat,
            } => x[*marginal + u] * x[*pi + u] / *pi_hat,
            Self::Fixed {
                pi,
                marginal,
                pi_hat,
            } => marginal[u] * x[*pi + u] / *pi_hat,
        }
    }

    /// `grad += scale · ∂w_u/∂x`
    fn add_gradient(&self, x: &[f64], u: usize, scale: f64, grad: &mut [f64]) {
        match self {
            Self::Free { offset } => grad[*offset + u] += scale,
            Self::Joint {
                pi,
                marginal,
                pi_hat,
            } => {
                grad[*marginal + u] += scale * x[*pi + u] / *pi_hat;
                grad[*pi + u] += scale * x[*marginal + u] / *pi_hat;
            }
            Self::Fixed {
                pi,
                marginal,
                pi_hat,
            } => grad[*pi + u] += scale * marginal[u] / *pi_hat,
        }
    }
}

/// `Σ_u w_u · P_u[s'] − P̂[s']`
fn residual(layout: &Layout, weight: &MixWeight, p_hat: &[f64], x: &[f64], sp: usize) -> f64 {
    (0..layout.k)
        .map(|u| weight.value(x, u) * x[layout.p(u, sp)])
        .sum::<f64>()
        - p_hat[sp]
}

/// `‖Σ_u w_u P_u − P̂‖² ≤ radius²`
fn mixture_ball<'a>(
    layout: Layout,
    weight: MixWeight,
    p_hat: &'a [f64],
    radius: f64,
) -> NonlinearConstraint<'a> {
    let grad_weight = weight.clone();
    NonlinearConstraint::at_most(
        move |x| {
            (0..layout.s)
                .map(|sp| residual(&layout, &weight, p_hat, x, sp).powi(2))
                .sum::<f64>()
        },
        move |x| {
            let mut grad = vec![0.0; layout.dim()];
            for sp in 0..layout.s {
                let r2 = 2.0 * residual(&layout, &grad_weight, p_hat, x, sp);
                for u in 0..layout.k {
                    grad[layout.p(u, sp)] += r2 * grad_weight.value(x, u);
                    grad_weight.add_gradient(x, u, r2 * x[layout.p(u, sp)], &mut grad);
                }
            }
            grad
        },
        radius * radius,
    )
}

/// `Σ_u w_u · P_u[s'] = P̂[s']`
fn mixture_exact<'a>(
    layout: Layout,
    weight: MixWeight,
    p_hat: &'a [f64],
    sp: usize,
) -> NonlinearConstraint<'a> {
    let grad_weight = weight.clone();
    NonlinearConstraint::equality(
        move |x| residual(&layout, &weight, p_hat, x, sp),
        move |x| {
            let mut grad = vec![0.0; layout.dim()];
            for u in 0..layout.k {
                grad[layout.p(u, sp)] += grad_weight.value(x, u);
                grad_weight.add_gradient(x, u, x[layout.p(u, sp)], &mut grad);
            }
            grad
        },
        0.0,
    )
}

/// `‖P_u − P_v‖² ≤ bound²`
fn pairwise_norm(layout: Layout, u: usize, v: usize, bound: f64) -> NonlinearConstraint<'static> {
    NonlinearConstraint::at_most(
        move |x| {
            layout
                .row(x, u)
                .iter()
                .zip(layout.row(x, v))
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        },
        move |x| {
            let mut grad = vec![0.0; layout.dim()];
            for sp in 0..layout.s {
                let d = 2.0 * (x[layout.p(u, sp)] - x[layout.p(v, sp)]);
                grad[layout.p(u, sp)] = d;
                grad[layout.p(v, sp)] = -d;
            }
            grad
        },
        bound * bound,
    )
}

/// Weight `o_u` of `y · P_u` in the objective.
#[derive(Debug, Clone)]
enum ObjectiveWeight {
    Fixed(Vec<f64>),
    /// `o_u = x[offset + u]`
    Free { offset: usize },
}

impl ObjectiveWeight {
    fn value(&self, x: &[f64], u: usize) -> f64 {
        match self {
            Self::Fixed(m) => m[u],
            Self::Free { offset } => x[*offset + u],
        }
    }
}

/// `Σ_u o_u · y · P_u`
fn objective<'a>(layout: Layout, weight: ObjectiveWeight, y: &'a [f64]) -> Problem<'a> {
    let grad_weight = weight.clone();
    Problem::new(
        layout.dim(),
        move |x| {
            (0..layout.k)
                .map(|u| weight.value(x, u) * dot(y, layout.row(x, u)))
                .sum::<f64>()
        },
        move |x| {
            let mut grad = vec![0.0; layout.dim()];
            for u in 0..layout.k {
                let o = grad_weight.value(x, u);
                for (sp, &ys) in y.iter().enumerate() {
                    grad[layout.p(u, sp)] = o * ys;
                }
                if let ObjectiveWeight::Free { offset } = &grad_weight {
                    grad[*offset + u] = dot(y, layout.row(x, u));
                }
            }
            grad
        },
    )
}

fn with_all<'a>(
    mut problem: Problem<'a>,
    linear: Vec<LinearConstraint>,
    nonlinear: Vec<NonlinearConstraint<'a>>,
) -> Result<Problem<'a>, OpeError> {
    for c in linear {
        problem = problem.with_linear(c)?;
    }
    for c in nonlinear {
        problem = problem.with_nonlinear(c);
    }
    Ok(problem)
}

// ============================================================================
// Programs
// ============================================================================

/// Transition rows within `p_bound` of each other, mixture weights boxed to
/// `[cond_bound, 1 − cond_bound]`, reconstruction within `eps²` of `P̂`.
fn norm_ball<'a>(cell: &Cell<'a>, p_bound: f64, cond_bound: f64) -> Result<Problem<'a>, OpeError> {
    let k = cell.u_dist.len();
    let layout = Layout {
        k,
        s: cell.p_hat.len(),
        extras: k,
    };
    let mut lower = vec![0.0; layout.dim()];
    let mut upper = vec![1.0; layout.dim()];
    for u in 0..k {
        lower[layout.extra(u)] = cond_bound;
        upper[layout.extra(u)] = 1.0 - cond_bound;
    }

    let mut linear = layout.simplex_rows();
    linear.push(LinearConstraint::equality(
        layout.unit((0..k).map(|u| (layout.extra(u), 1.0))),
        1.0,
    ));
    let mut nonlinear = vec![mixture_ball(
        layout,
        MixWeight::Free {
            offset: layout.extra(0),
        },
        cell.p_hat,
        cell.eps,
    )];
    for u in 0..k {
        for v in u + 1..k {
            nonlinear.push(pairwise_norm(layout, u, v, p_bound));
        }
    }

    let problem = objective(layout, ObjectiveWeight::Fixed(cell.u_dist.to_vec()), cell.y)
        .with_bounds(Bounds::new(lower, upper)?)?;
    with_all(problem, linear, nonlinear)
}

/// Free confounder marginal `p_u` and action probabilities `pi_u` with
/// `Σ_u p_u pi_u = pi_hat` and pairwise ratios `pi_u / pi_v ≤ pi_bound`.
fn policy_bound<'a>(cell: &Cell<'a>, p_bound: f64, pi_bound: f64) -> Result<Problem<'a>, OpeError> {
    let k = cell.u_dist.len();
    let layout = Layout {
        k,
        s: cell.p_hat.len(),
        extras: 2 * k,
    };
    let (pi, marginal) = (layout.extra(0), layout.extra(k));
    let pi_hat = cell.pi_hat;

    let mut linear = layout.simplex_rows();
    linear.push(LinearConstraint::equality(
        layout.unit((0..k).map(|u| (marginal + u, 1.0))),
        1.0,
    ));
    for u in 0..k {
        for v in 0..k {
            if u != v {
                // pi_u ≤ bound · pi_v
                linear.push(LinearConstraint::at_most(
                    layout.unit([(pi + u, 1.0), (pi + v, -pi_bound)]),
                    0.0,
                ));
            }
        }
    }

    let mut nonlinear = vec![
        NonlinearConstraint::equality(
            move |x| (0..k).map(|u| x[marginal + u] * x[pi + u]).sum::<f64>(),
            move |x| {
                let mut grad = vec![0.0; layout.dim()];
                for u in 0..k {
                    grad[marginal + u] = x[pi + u];
                    grad[pi + u] = x[marginal + u];
                }
                grad
            },
            pi_hat,
        ),
        mixture_ball(
            layout,
            MixWeight::Joint {
                pi,
                marginal,
                pi_hat,
            },
            cell.p_hat,
            cell.eps,
        ),
    ];
    for u in 0..k {
        for v in u + 1..k {
            nonlinear.push(pairwise_norm(layout, u, v, p_bound));
        }
    }

    let problem = objective(layout, ObjectiveWeight::Free { offset: marginal }, cell.y)
        .with_bounds(Bounds::uniform(layout.dim(), 0.0, 1.0)?)?;
    with_all(problem, linear, nonlinear)
}

/// Known marginal `m`, sensitivity boxes on every `P_u[s']` and `pi_u`,
/// `Σ_u m_u pi_u = pi_hat`. The reconstruction is either within `eps²` or
/// exact per next state.
fn fixed_marginal<'a>(
    cell: &Cell<'a>,
    marginal: Vec<f64>,
    p_bound: f64,
    pi_bound: f64,
    exact: bool,
) -> Result<Problem<'a>, OpeError> {
    let k = marginal.len();
    let layout = Layout {
        k,
        s: cell.p_hat.len(),
        extras: k,
    };
    let pi = layout.extra(0);
    let mut lower = vec![0.0; layout.dim()];
    let mut upper = vec![1.0; layout.dim()];
    for (sp, &p) in cell.p_hat.iter().enumerate() {
        let (lo, hi) = sensitivity_interval(p_bound, p);
        for u in 0..k {
            lower[layout.p(u, sp)] = lo;
            upper[layout.p(u, sp)] = hi;
        }
    }
    let (pi_lo, pi_hi) = sensitivity_interval(pi_bound, cell.pi_hat);
    for u in 0..k {
        lower[pi + u] = pi_lo;
        upper[pi + u] = pi_hi;
    }

    let mut linear = layout.simplex_rows();
    linear.push(LinearConstraint::equality(
        layout.unit(marginal.iter().enumerate().map(|(u, &m)| (pi + u, m))),
        cell.pi_hat,
    ));

    let weight = MixWeight::Fixed {
        pi,
        marginal: marginal.clone(),
        pi_hat: cell.pi_hat,
    };
    let nonlinear = if exact {
        (0..layout.s)
            .map(|sp| mixture_exact(layout, weight.clone(), cell.p_hat, sp))
            .collect()
    } else {
        vec![mixture_ball(layout, weight, cell.p_hat, cell.eps)]
    };

    let problem = objective(layout, ObjectiveWeight::Fixed(marginal), cell.y)
        .with_bounds(Bounds::new(lower, upper)?)?;
    with_all(problem, linear, nonlinear)
}

/// `min Σ_s' P̂[s'] y[s'] w[s']` over sensitivity weights with
/// `|Σ_s' P̂[s'] w[s'] − 1| ≤ eps`.
fn sensitivity_lp(cell: &Cell<'_>, gamma_bound: f64) -> Result<Solution, OpeError> {
    let n = cell.p_hat.len();
    let lower = 1.0 / gamma_bound + (1.0 - 1.0 / gamma_bound) * cell.pi_hat;
    let upper = gamma_bound + (1.0 - gamma_bound) * cell.pi_hat;
    let lp = BandLp {
        cost: cell.p_hat.iter().zip(cell.y).map(|(p, y)| p * y).collect(),
        weights: cell.p_hat.to_vec(),
        lower: vec![lower; n],
        upper: vec![upper; n],
        band_lower: 1.0 - cell.eps,
        band_upper: 1.0 + cell.eps,
    };
    Ok(lp.solve()?)
}

/// Build the program of `variant` for `cell`.
fn build<'a>(variant: &WorstCase, cell: &Cell<'a>) -> Result<Problem<'a>, OpeError> {
    match *variant {
        WorstCase::NormBall {
            p_bound,
            cond_bound,
        } => norm_ball(cell, p_bound, cond_bound),
        WorstCase::PolicyBound { p_bound, pi_bound } => policy_bound(cell, p_bound, pi_bound),
        WorstCase::FixedMarginal { p_bound, pi_bound } => {
            fixed_marginal(cell, cell.u_dist.to_vec(), p_bound, pi_bound, false)
        }
        WorstCase::Bilinear {
            p_bound,
            pi_bound,
            u_param,
        } => fixed_marginal(cell, vec![1.0 - u_param, u_param], p_bound, pi_bound, true),
        WorstCase::Sensitivity { .. } => Err(OpeError::InvalidParameter {
            name: "variant",
            reason: "the sensitivity program is a linear program".to_string(),
        }),
    }
}

/// The unconfounded point `P_u = P̂` with neutral extras: uniform mixture
/// weights, `pi_u = pi_hat` and the known marginal. Feasible for every
/// variant.
pub(crate) fn nominal_start(variant: &WorstCase, cell: &Cell<'_>) -> Vec<f64> {
    let k = match variant {
        WorstCase::Bilinear { .. } => 2,
        _ => cell.u_dist.len(),
    };
    let mut x = cell.p_hat.repeat(k);
    match variant {
        WorstCase::NormBall { .. } => x.extend(vec![1.0 / k as f64; k]),
        WorstCase::PolicyBound { .. } => {
            x.extend(vec![cell.pi_hat; k]);
            x.extend_from_slice(cell.u_dist);
        }
        WorstCase::FixedMarginal { .. } | WorstCase::Bilinear { .. } => {
            x.extend(vec![cell.pi_hat; k]);
        }
        WorstCase::Sensitivity { .. } => x = vec![1.0; cell.p_hat.len()],
    }
    x
}

fn solve_from(
    problem: &Problem<'_>,
    solver: &AugmentedLagrangian,
    x0: Vec<f64>,
) -> Result<Solution, OpeError> {
    match solver.solve(problem, &x0) {
        Ok(solution) => Ok(solution),
        Err(OptimError::NonFiniteObjective) => Ok(Solution {
            value: f64::INFINITY,
            x: x0,
            success: false,
            constraint_violation: f64::INFINITY,
            iterations: 0,
        }),
        Err(err) => Err(err.into()),
    }
}

/// One solve of the cell program from a random start drawn by `sampler`.
///
/// The sensitivity LP is solved exactly and ignores the sampler. A
/// non-finite objective counts as an infeasible solve.
pub(crate) fn solve_once<S: Sampler + ?Sized>(
    variant: &WorstCase,
    cell: &Cell<'_>,
    solver: &AugmentedLagrangian,
    sampler: &mut S,
) -> Result<Solution, OpeError> {
    if let WorstCase::Sensitivity { gamma_bound } = *variant {
        return sensitivity_lp(cell, gamma_bound);
    }
    let problem = build(variant, cell)?;
    let bounds = problem.bounds();
    let x0: Vec<f64> = bounds
        .lower
        .iter()
        .zip(&bounds.upper)
        .map(|(lo, hi)| lo + sampler.uniform() * (hi - lo))
        .collect();
    solve_from(&problem, solver, x0)
}

/// One solve of the cell program started at [`nominal_start`].
pub(crate) fn solve_warm(
    variant: &WorstCase,
    cell: &Cell<'_>,
    solver: &AugmentedLagrangian,
) -> Result<Solution, OpeError> {
    if let WorstCase::Sensitivity { gamma_bound } = *variant {
        return sensitivity_lp(cell, gamma_bound);
    }
    let problem = build(variant, cell)?;
    solve_from(&problem, solver, nominal_start(variant, cell))
}

#[cfg(test)]
mod tests {
    use super::*;
    use confound_optim::Constraint;
    use confound_prob::SeededSampler;

    fn cell<'a>(y: &'a [f64], p_hat: &'a [f64], u_dist: &'a [f64]) -> Cell<'a> {
        Cell {
            y,
            p_hat,
            pi_hat: 0.5,
            eps: 0.05,
            u_dist,
        }
    }

    #[test]
    fn test_sensitivity_interval() {
        let (lo, hi) = sensitivity_interval(1.0, 0.3);
        assert!((lo - 0.3).abs() < 1e-12 && (hi - 0.3).abs() < 1e-12);
        let (lo, hi) = sensitivity_interval(2.0, 0.5);
        assert!((lo - 1.0 / 3.0).abs() < 1e-12);
        assert!((hi - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(sensitivity_interval(2.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn test_nominal_point_is_feasible() {
        let y = [1.0, -1.0, 0.5];
        let p_hat = [0.2, 0.5, 0.3];
        let u = [0.5, 0.5];
        let c = cell(&y, &p_hat, &u);
        let nominal = |extras: &[f64]| {
            let mut x = p_hat.to_vec();
            x.extend_from_slice(&p_hat);
            x.extend_from_slice(extras);
            x
        };
        let cases = [
            (
                WorstCase::NormBall {
                    p_bound: 0.5,
                    cond_bound: 0.25,
                },
                nominal(&[0.5, 0.5]),
            ),
            (
                WorstCase::PolicyBound {
                    p_bound: 0.5,
                    pi_bound: 2.0,
                },
                nominal(&[0.5, 0.5, 0.5, 0.5]),
            ),
            (
                WorstCase::FixedMarginal {
                    p_bound: 2.0,
                    pi_bound: 2.0,
                },
                nominal(&[0.5, 0.5]),
            ),
            (
                WorstCase::Bilinear {
                    p_bound: 2.0,
                    pi_bound: 2.0,
                    u_param: 0.3,
                },
                nominal(&[0.5, 0.5]),
            ),
        ];
        for (variant, x) in cases {
            let problem = build(&variant, &c).unwrap();
            assert_eq!(nominal_start(&variant, &c), x, "{variant:?}");
            assert!(problem.constraint_violation(&x) < 1e-12, "{variant:?}");
            assert!((problem.objective(&x) - c.nominal_value()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let y = [1.0, -1.0, 0.5];
        let p_hat = [0.2, 0.5, 0.3];
        let u = [0.4, 0.6];
        let c = cell(&y, &p_hat, &u);
        let variant = WorstCase::PolicyBound {
            p_bound: 0.5,
            pi_bound: 2.0,
        };
        let problem = build(&variant, &c).unwrap();
        let mut sampler = SeededSampler::new(5);
        let x: Vec<f64> = (0..problem.dim()).map(|_| sampler.uniform()).collect();
        let h = 1e-6;
        let check = |f: &dyn Fn(&[f64]) -> f64, grad: Vec<f64>| {
            for i in 0..x.len() {
                let mut up = x.clone();
                let mut down = x.clone();
                up[i] += h;
                down[i] -= h;
                let numeric = (f(&up) - f(&down)) / (2.0 * h);
                assert!((numeric - grad[i]).abs() < 1e-5, "coordinate {i}");
            }
        };
        check(&|z| problem.objective(z), problem.gradient(&x));
        for constraint in problem.constraints() {
            check(&|z| constraint.value(z), constraint.gradient(&x));
        }
    }

    #[test]
    fn test_norm_ball_moves_mass_to_low_targets() {
        let y = [1.0, 0.0];
        let p_hat = [0.5, 0.5];
        let u = [0.5, 0.5];
        let c = cell(&y, &p_hat, &u);
        let variant = WorstCase::NormBall {
            p_bound: 0.5,
            cond_bound: 0.25,
        };
        let solver = AugmentedLagrangian::default();
        let sol = solve_once(&variant, &c, &solver, &mut SeededSampler::new(1)).unwrap();
        assert!(sol.constraint_violation < 1e-4);
        // the weight box and the row-distance budget limit the drop
        assert!(sol.value <= c.nominal_value() + 1e-6);
        assert!(sol.value >= c.nominal_value() - 0.2);
    }

    #[test]
    fn test_warm_start_stays_feasible_and_below_nominal() {
        let y = [1.0, -1.0, 0.5];
        let p_hat = [0.2, 0.5, 0.3];
        let u = [0.4, 0.6];
        let c = cell(&y, &p_hat, &u);
        let solver = AugmentedLagrangian::default();
        for variant in [
            WorstCase::FixedMarginal {
                p_bound: 2.0,
                pi_bound: 2.0,
            },
            WorstCase::Bilinear {
                p_bound: 2.0,
                pi_bound: 2.0,
                u_param: 0.3,
            },
        ] {
            let sol = solve_warm(&variant, &c, &solver).unwrap();
            assert!(sol.constraint_violation < 1e-4, "{variant:?}");
            assert!(sol.value <= c.nominal_value() + 1e-3, "{variant:?}");
        }
    }

    #[test]
    fn test_sensitivity_lp_lowers_value() {
        let y = [1.0, -1.0];
        let p_hat = [0.5, 0.5];
        let u = [0.5, 0.5];
        let c = cell(&y, &p_hat, &u);
        let sol = sensitivity_lp(&c, 2.0).unwrap();
        assert!(sol.value < c.nominal_value());
        let band: f64 = p_hat.iter().zip(&sol.x).map(|(p, w)| p * w).sum();
        assert!((band - 1.0).abs() <= c.eps + 1e-12);
    }
}
