//! # Problem contract
//!
//! A smooth constrained minimization problem:
//!
//! ```text
//!   minimize    f(x)
//!   subject to  lower_i ≤ x_i ≤ upper_i          (box bounds)
//!               l_j ≤ a_j · x ≤ u_j               (linear constraints)
//!               l_k ≤ c_k(x) ≤ u_k                (nonlinear constraints)
//! ```
//!
//! Equalities are constraints with `l == u`; one-sided inequalities use an
//! infinite bound. Every nonlinear constraint carries its gradient, so a
//! solver only ever sees first-order information.

use crate::error::OptimError;

/// Scalar function of the decision vector.
pub type ScalarFn<'a> = Box<dyn Fn(&[f64]) -> f64 + 'a>;

/// Gradient of a [`ScalarFn`].
pub type GradientFn<'a> = Box<dyn Fn(&[f64]) -> Vec<f64> + 'a>;

// ============================================================================
// Bounds
// ============================================================================

/// Box bounds `lower ≤ x ≤ upper`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, OptimError> {
        if lower.len() != upper.len() {
            return Err(OptimError::DimensionMismatch {
                what: "upper bounds",
                expected: lower.len(),
                got: upper.len(),
            });
        }
        for (index, (&lo, &hi)) in lower.iter().zip(&upper).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(OptimError::InvalidBounds {
                    index,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// No bounds on any of `n` coordinates.
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    /// The same interval on every coordinate.
    pub fn uniform(n: usize, lower: f64, upper: f64) -> Result<Self, OptimError> {
        Self::new(vec![lower; n], vec![upper; n])
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// Clamp `x` into the box in place.
    pub fn project(&self, x: &mut [f64]) {
        for ((xi, &lo), &hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
            *xi = xi.clamp(lo, hi);
        }
    }

    /// Largest distance of any coordinate outside its interval.
    pub fn violation(&self, x: &[f64]) -> f64 {
        x.iter()
            .zip(&self.lower)
            .zip(&self.upper)
            .map(|((&xi, &lo), &hi)| (lo - xi).max(xi - hi).max(0.0))
            .fold(0.0, f64::max)
    }
}

// ============================================================================
// Constraints
// ============================================================================

/// A scalar constraint `lower ≤ value(x) ≤ upper`.
pub trait Constraint {
    fn value(&self, x: &[f64]) -> f64;
    fn gradient(&self, x: &[f64]) -> Vec<f64>;
    fn lower(&self) -> f64;
    fn upper(&self) -> f64;

    fn is_equality(&self) -> bool {
        self.lower() == self.upper()
    }

    /// Distance of `value(x)` outside `[lower, upper]`.
    fn violation(&self, x: &[f64]) -> f64 {
        let v = self.value(x);
        (self.lower() - v).max(v - self.upper()).max(0.0)
    }
}

/// `lower ≤ coeffs · x ≤ upper`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub coeffs: Vec<f64>,
    pub lower: f64,
    pub upper: f64,
}

impl LinearConstraint {
    pub fn new(coeffs: Vec<f64>, lower: f64, upper: f64) -> Self {
        Self {
            coeffs,
            lower,
            upper,
        }
    }

    /// `coeffs · x == value`.
    pub fn equality(coeffs: Vec<f64>, value: f64) -> Self {
        Self::new(coeffs, value, value)
    }

    /// `coeffs · x ≤ upper`.
    pub fn at_most(coeffs: Vec<f64>, upper: f64) -> Self {
        Self::new(coeffs, f64::NEG_INFINITY, upper)
    }
}

impl Constraint for LinearConstraint {
    fn value(&self, x: &[f64]) -> f64 {
        self.coeffs.iter().zip(x).map(|(a, b)| a * b).sum()
    }

    fn gradient(&self, _x: &[f64]) -> Vec<f64> {
        self.coeffs.clone()
    }

    fn lower(&self) -> f64 {
        self.lower
    }

    fn upper(&self) -> f64 {
        self.upper
    }
}

/// `lower ≤ c(x) ≤ upper` for a smooth `c` with a known gradient.
pub struct NonlinearConstraint<'a> {
    value: ScalarFn<'a>,
    gradient: GradientFn<'a>,
    pub lower: f64,
    pub upper: f64,
}

impl<'a> NonlinearConstraint<'a> {
    pub fn new<F, G>(value: F, gradient: G, lower: f64, upper: f64) -> Self
    where
        F: Fn(&[f64]) -> f64 + 'a,
        G: Fn(&[f64]) -> Vec<f64> + 'a,
    {
        Self {
            value: Box::new(value),
            gradient: Box::new(gradient),
            lower,
            upper,
        }
    }

    /// `c(x) == target`.
    pub fn equality<F, G>(value: F, gradient: G, target: f64) -> Self
    where
        F: Fn(&[f64]) -> f64 + 'a,
        G: Fn(&[f64]) -> Vec<f64> + 'a,
    {
        Self::new(value, gradient, target, target)
    }

    /// `c(x) ≤ upper`.
    pub fn at_most<F, G>(value: F, gradient: G, upper: f64) -> Self
    where
        F: Fn(&[f64]) -> f64 + 'a,
        G: Fn(&[f64]) -> Vec<f64> + 'a,
    {
        Self::new(value, gradient, f64::NEG_INFINITY, upper)
    }
}

impl Constraint for NonlinearConstraint<'_> {
    fn value(&self, x: &[f64]) -> f64 {
        (self.value)(x)
    }

    fn gradient(&self, x: &[f64]) -> Vec<f64> {
        (self.gradient)(x)
    }

    fn lower(&self) -> f64 {
        self.lower
    }

    fn upper(&self) -> f64 {
        self.upper
    }
}

impl std::fmt::Debug for NonlinearConstraint<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonlinearConstraint")
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Problem
// ============================================================================

/// Objective, gradient, bounds and constraints of one minimization.
pub struct Problem<'a> {
    dim: usize,
    objective: ScalarFn<'a>,
    gradient: GradientFn<'a>,
    bounds: Bounds,
    linear: Vec<LinearConstraint>,
    nonlinear: Vec<NonlinearConstraint<'a>>,
}

impl<'a> Problem<'a> {
    /// An unconstrained problem over `dim` variables.
    pub fn new<F, G>(dim: usize, objective: F, gradient: G) -> Self
    where
        F: Fn(&[f64]) -> f64 + 'a,
        G: Fn(&[f64]) -> Vec<f64> + 'a,
    {
        Self {
            dim,
            objective: Box::new(objective),
            gradient: Box::new(gradient),
            bounds: Bounds::unbounded(dim),
            linear: Vec::new(),
            nonlinear: Vec::new(),
        }
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Result<Self, OptimError> {
        if bounds.dim() != self.dim {
            return Err(OptimError::DimensionMismatch {
                what: "bounds",
                expected: self.dim,
                got: bounds.dim(),
            });
        }
        self.bounds = bounds;
        Ok(self)
    }

    pub fn with_linear(mut self, constraint: LinearConstraint) -> Result<Self, OptimError> {
        if constraint.coeffs.len() != self.dim {
            return Err(OptimError::DimensionMismatch {
                what: "linear constraint",
                expected: self.dim,
                got: constraint.coeffs.len(),
            });
        }
        self.linear.push(constraint);
        Ok(self)
    }

    pub fn with_nonlinear(mut self, constraint: NonlinearConstraint<'a>) -> Self {
        self.nonlinear.push(constraint);
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn objective(&self, x: &[f64]) -> f64 {
        (self.objective)(x)
    }

    pub fn gradient(&self, x: &[f64]) -> Vec<f64> {
        (self.gradient)(x)
    }

    /// Linear constraints first, then nonlinear ones.
    pub fn constraints(&self) -> impl Iterator<Item = &dyn Constraint> + '_ {
        self.linear
            .iter()
            .map(|c| c as &dyn Constraint)
            .chain(self.nonlinear.iter().map(|c| c as &dyn Constraint))
    }

    pub fn n_constraints(&self) -> usize {
        self.linear.len() + self.nonlinear.len()
    }

    /// Largest violation over bounds and constraints.
    pub fn constraint_violation(&self, x: &[f64]) -> f64 {
        self.constraints()
            .map(|c| c.violation(x))
            .fold(self.bounds.violation(x), f64::max)
    }

    pub(crate) fn check_point(&self, x: &[f64]) -> Result<(), OptimError> {
        if x.len() != self.dim {
            return Err(OptimError::DimensionMismatch {
                what: "initial point",
                expected: self.dim,
                got: x.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Problem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Problem")
            .field("dim", &self.dim)
            .field("bounds", &self.bounds)
            .field("linear", &self.linear)
            .field("nonlinear", &self.nonlinear)
            .finish_non_exhaustive()
    }
}

/// Result of a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Objective at `x`.
    pub value: f64,
    pub x: Vec<f64>,
    /// Whether `x` meets the solver's feasibility tolerance.
    pub success: bool,
    /// [`Problem::constraint_violation`] at `x`.
    pub constraint_violation: f64,
    pub iterations: usize,
}

/// A solver for [`Problem`]s.
///
/// Non-convergence is reported through [`Solution::success`]; errors are
/// reserved for malformed problems.
pub trait ConstrainedSolver {
    fn solve(&self, problem: &Problem<'_>, x0: &[f64]) -> Result<Solution, OptimError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_project_and_violation() {
        let bounds = Bounds::new(vec![0.0, -1.0], vec![1.0, 1.0]).unwrap();
        let mut x = vec![2.0, -3.0];
        assert_eq!(bounds.violation(&x), 2.0);
        bounds.project(&mut x);
        assert_eq!(x, vec![1.0, -1.0]);
        assert_eq!(bounds.violation(&x), 0.0);
        assert!(matches!(
            Bounds::new(vec![1.0], vec![0.0]),
            Err(OptimError::InvalidBounds { index: 0, .. })
        ));
    }

    #[test]
    fn test_constraint_violation() {
        let problem = Problem::new(2, |x| x[0] + x[1], |_| vec![1.0, 1.0])
            .with_linear(LinearConstraint::equality(vec![1.0, 1.0], 1.0))
            .unwrap()
            .with_nonlinear(NonlinearConstraint::at_most(
                |x| x[0] * x[0],
                |x| vec![2.0 * x[0], 0.0],
                0.25,
            ));
        assert_eq!(problem.n_constraints(), 2);
        assert_eq!(problem.constraint_violation(&[0.5, 0.5]), 0.0);
        assert!((problem.constraint_violation(&[1.0, 1.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dimension_checks() {
        let problem = Problem::new(2, |_| 0.0, |_| vec![0.0, 0.0]);
        assert!(problem.check_point(&[0.0]).is_err());
        assert!(Problem::new(2, |_| 0.0, |_| vec![0.0, 0.0])
            .with_linear(LinearConstraint::equality(vec![1.0], 0.0))
            .is_err());
    }
}
