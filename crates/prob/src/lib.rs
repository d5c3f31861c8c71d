//! # Prob - Finite distributions and Markov kernels
//!
//! The probability substrate for confounded MDPs:
//!
//! - [`Dist`]: a validated probability simplex over `{0, ..., n-1}`
//! - [`Kernel`]: a row-stochastic matrix, used for transition rows
//!   `P(s' | s)` and tabular policies `pi(a | s)` alike
//! - [`Sampler`]: the injectable source of categorical and uniform draws
//!
//! Validation happens at the boundary: constructing a [`Dist`] or a
//! [`Kernel`], or sampling from a raw vector, fails with an
//! invalid-distribution [`ProbError`] rather than letting a bad simplex
//! flow into an estimator.
//!
//! ## Example
//!
//! ```rust
//! use confound_prob::{Dist, Kernel, Sampler, SeededSampler};
//!
//! let weather = Kernel::new(vec![
//!     vec![0.8, 0.2],
//!     vec![0.4, 0.6],
//! ]).unwrap();
//!
//! let sunny = Dist::point(2, 0);
//! let rain_tomorrow = weather.expect(&[0.0, 1.0]).unwrap();
//! assert!((sunny.expect(&rain_tomorrow).unwrap() - 0.2).abs() < 1e-12);
//!
//! let mut sampler = SeededSampler::new(0);
//! let next = sampler.categorical(weather.row(0)).unwrap();
//! assert!(next < 2);
//! ```

mod dist;
mod error;
mod kernel;
mod sampler;

pub use dist::{argmax, argmin, check_simplex, dot, Dist};
pub use error::ProbError;
pub use kernel::Kernel;
pub use sampler::{Sampler, SeededSampler};

/// Tolerance for probability comparisons.
pub const PROB_TOLERANCE: f64 = 1e-8;
