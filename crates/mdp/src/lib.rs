//! # Confound MDP - Finite MDPs with an unobserved confounder
//!
//! A confounded MDP draws a hidden variable `u` that shifts both the
//! behavior policy and the transition kernel:
//!
//! ```text
//!            u ~ u_dist
//!           ╱          ╲
//!          ▼            ▼
//!   a ~ pi_b(·|u,s)   s' ~ P_u(·|s,a)
//! ```
//!
//! An evaluator that only sees `(s, a, s', r)` therefore confuses the effect
//! of the action with the effect of `u`. This crate provides:
//!
//! - [`ConfoundMdp`]: the immutable model and its exact Bellman evaluator
//! - [`Simulator`]: per-episode state for stepping through a model
//! - [`Policy`], [`TabularPolicy`], [`ConfoundedPolicy`]
//! - [`Trajectory`], [`Dataset`] and [`ConfounderMode`] for logged data
//! - [`sampling`]: batched and parallel dataset collection over a
//!   [`ParallelMap`]
//! - [`confound`] and [`envs`]: confounding operators and the environment
//!   factory
//! - [`stats`]: empirical counts and the empirical model
//!
//! ## Example
//!
//! ```rust
//! use confound_mdp::envs::toy227;
//! use confound_mdp::{collect_sample, ConfounderMode, SamplingConfig, TabularPolicy};
//!
//! let env = toy227(0.5, 0.1).unwrap();
//!
//! // Ground truth for the uniform evaluation policy
//! let pi_e = TabularPolicy::uniform(3, 2);
//! let q = env.mdp.bellman_eval(&pi_e, 50).unwrap();
//! let (_, truth) = env.mdp.get_value(&q, &pi_e).unwrap();
//!
//! // Logged data from the confounded behavior policy
//! let config = SamplingConfig::new(100, 20).with_mode(ConfounderMode::Iid);
//! let data = collect_sample(&env.mdp, &env.behavior, &config).unwrap();
//! assert_eq!(data.len(), 100);
//! assert!(truth.is_finite());
//! ```

pub mod confound;
pub mod envs;
mod error;
mod model;
pub mod parallel;
mod policy;
mod rollout;
pub mod sampling;
mod simulator;
pub mod stats;
mod value;

pub use envs::{BaseDynamics, ConfoundedEnv, GridworldConfig, RandomWalkConfig};
pub use error::MdpError;
pub use model::{ConfoundMdp, RewardTensor};
pub use parallel::{ParallelMap, RayonMap, Sequential};
pub use policy::{ConfoundedPolicy, Policy, TabularPolicy};
pub use rollout::{calc_returns, ConfounderMode, Dataset, Trajectory, Transition};
pub use sampling::{collect_parallel, collect_sample, SamplingConfig};
pub use simulator::Simulator;
pub use stats::EmpiricalModel;
pub use value::QTable;
