//! # Confound Optim
//!
//! Constrained minimization for worst-case policy evaluation.
//!
//! ## Modules
//!
//! - [`problem`]: the problem contract: objective, gradient, box bounds,
//!   linear and nonlinear constraints, and the [`ConstrainedSolver`] trait
//! - [`auglag`]: [`AugmentedLagrangian`], a first-order solver for any
//!   [`Problem`]
//! - [`lp`]: [`BandLp`], an exact solver for box LPs with one band
//!   constraint
//!
//! ## Example
//!
//! ```rust
//! use confound_optim::{AugmentedLagrangian, Bounds, ConstrainedSolver, LinearConstraint, Problem};
//!
//! // min (x - 2)² + y² subject to x + y = 1, 0 ≤ x, y ≤ 1
//! let problem = Problem::new(
//!     2,
//!     |x| (x[0] - 2.0).powi(2) + x[1] * x[1],
//!     |x| vec![2.0 * (x[0] - 2.0), 2.0 * x[1]],
//! )
//! .with_bounds(Bounds::uniform(2, 0.0, 1.0).unwrap())
//! .unwrap()
//! .with_linear(LinearConstraint::equality(vec![1.0, 1.0], 1.0))
//! .unwrap();
//!
//! let solution = AugmentedLagrangian::default().solve(&problem, &[0.5, 0.5]).unwrap();
//! assert!((solution.x[0] - 1.0).abs() < 1e-3);
//! ```

pub mod auglag;
mod error;
pub mod lp;
pub mod problem;

pub use auglag::{AugLagConfig, AugmentedLagrangian};
pub use error::OptimError;
pub use lp::BandLp;
pub use problem::{
    Bounds, ConstrainedSolver, Constraint, LinearConstraint, NonlinearConstraint, Problem,
    Solution,
};
