//! Rollout: execute a behavior policy in a confounded MDP.
//!
//! ```text
//!    ┌──────────────┐  u   ┌──────────────┐
//!    │   u_dist     │─────▶│   pi_b(·|u,s) │
//!    └──────────────┘  │   └──────────────┘
//!                      │          │ a
//!                      ▼          ▼
//!                 ┌──────────────────────┐
//!                 │  P_u(·|s,a), R(a,s,·) │
//!                 └──────────────────────┘
//!                            │
//!                            ▼
//!        [(s₀,a₀,u₀,s₁,r₀), (s₁,a₁,u₁,s₂,r₁), ...]
//! ```
//!
//! Trajectory generation is a pure function of the model, the policy, the
//! horizon and a sampler: all episode state is local to the call.

use confound_prob::Sampler;
use serde::{Deserialize, Serialize};

use crate::error::MdpError;
use crate::model::ConfoundMdp;
use crate::policy::Policy;
use crate::simulator::Simulator;

/// How the confounder is drawn during a trajectory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfounderMode {
    /// Redrawn from `u_dist` before every action.
    #[default]
    Iid,
    /// Drawn once at the start and held for the whole trajectory.
    Persistent,
}

/// A single logged step `(state, action, confounder, next_state, reward)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: usize,
    pub action: usize,
    /// Only oracle estimators may read this field.
    pub confounder: usize,
    pub next_state: usize,
    pub reward: f64,
}

/// A fixed-length sequence of transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub steps: Vec<Transition>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, step: Transition) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `Σ_t γ^t r_t`.
    pub fn discounted_return(&self, gamma: f64) -> f64 {
        let mut total = 0.0;
        let mut discount = 1.0;
        for step in &self.steps {
            total += discount * step.reward;
            discount *= gamma;
        }
        total
    }

    /// State at time 0.
    pub fn initial_state(&self) -> Option<usize> {
        self.steps.first().map(|t| t.state)
    }

    /// Confounder at time 0; the trajectory's label in persistent mode.
    pub fn initial_confounder(&self) -> Option<usize> {
        self.steps.first().map(|t| t.confounder)
    }
}

/// A collection of equal-length trajectories over a fixed state/action space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub trajectories: Vec<Trajectory>,
    pub n_states: usize,
    pub n_actions: usize,
}

impl Dataset {
    /// Validate trajectory lengths and indices.
    ///
    /// # Errors
    ///
    /// `EmptyDataset` without trajectories, `RaggedDataset` when lengths
    /// differ, and an index error for any out-of-range state or action.
    pub fn new(
        trajectories: Vec<Trajectory>,
        n_states: usize,
        n_actions: usize,
    ) -> Result<Self, MdpError> {
        let expected = trajectories.first().ok_or(MdpError::EmptyDataset)?.len();
        for (index, traj) in trajectories.iter().enumerate() {
            if traj.len() != expected {
                return Err(MdpError::RaggedDataset {
                    index,
                    len: traj.len(),
                    expected,
                });
            }
            for t in &traj.steps {
                for state in [t.state, t.next_state] {
                    if state >= n_states {
                        return Err(MdpError::InvalidState { state, n_states });
                    }
                }
                if t.action >= n_actions {
                    return Err(MdpError::InvalidAction {
                        action: t.action,
                        n_actions,
                    });
                }
            }
        }
        Ok(Self {
            trajectories,
            n_states,
            n_actions,
        })
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Common trajectory length.
    pub fn horizon(&self) -> usize {
        self.trajectories.first().map_or(0, Trajectory::len)
    }

    /// All transitions, flattened in trajectory order.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.trajectories.iter().flat_map(|t| t.steps.iter())
    }

    pub fn n_transitions(&self) -> usize {
        self.len() * self.horizon()
    }

    /// Time-0 confounder of every trajectory (ground-truth cluster labels
    /// for persistent-mode data).
    pub fn confounder_labels(&self) -> Vec<usize> {
        self.trajectories
            .iter()
            .map(|t| t.initial_confounder().unwrap_or(0))
            .collect()
    }

    /// Concatenate datasets collected on the same spaces.
    pub fn concat(parts: Vec<Dataset>) -> Result<Self, MdpError> {
        let first = parts.first().ok_or(MdpError::EmptyDataset)?;
        let (n_states, n_actions) = (first.n_states, first.n_actions);
        let trajectories = parts
            .into_iter()
            .flat_map(|d| d.trajectories.into_iter())
            .collect();
        Self::new(trajectories, n_states, n_actions)
    }
}

impl ConfoundMdp {
    /// Roll out `pi_b` for exactly `horizon` steps.
    ///
    /// In [`ConfounderMode::Iid`] the confounder is redrawn before every
    /// action; in [`ConfounderMode::Persistent`] it is drawn once.
    pub fn generate_trajectory<P, S>(
        &self,
        pi_b: &P,
        horizon: usize,
        mode: ConfounderMode,
        sampler: &mut S,
    ) -> Result<Trajectory, MdpError>
    where
        P: Policy + ?Sized,
        S: Sampler + ?Sized,
    {
        self.check_policy(pi_b)?;
        let mut sim = Simulator::new(self);
        let mut state = sim.reset(sampler)?;
        let mut confounder = sim.draw_confounder(sampler)?;

        let mut traj = Trajectory {
            steps: Vec::with_capacity(horizon),
        };
        for t in 0..horizon {
            if mode == ConfounderMode::Iid && t > 0 {
                confounder = sim.draw_confounder(sampler)?;
            }
            let action = sampler.categorical(pi_b.action_probs(confounder, state))?;
            let (next_state, reward) = sim.step(action, sampler)?;
            traj.push(Transition {
                state,
                action,
                confounder,
                next_state,
                reward,
            });
            state = next_state;
        }
        Ok(traj)
    }
}

/// Discounted return of every trajectory.
pub fn calc_returns(dataset: &Dataset, gamma: f64) -> Vec<f64> {
    dataset
        .trajectories
        .iter()
        .map(|t| t.discounted_return(gamma))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ConfoundedPolicy, TabularPolicy};
    use confound_prob::SeededSampler;

    fn coin_mdp() -> ConfoundMdp {
        // next state = confounder, reward 1 on state 1
        ConfoundMdp::from_rows(
            vec![
                vec![vec![vec![1.0, 0.0], vec![1.0, 0.0]]],
                vec![vec![vec![0.0, 1.0], vec![0.0, 1.0]]],
            ],
            vec![vec![vec![0.0, 1.0], vec![0.0, 1.0]]],
            vec![1.0, 0.0],
            vec![0.5, 0.5],
            0.9,
        )
        .unwrap()
    }

    #[test]
    fn test_trajectory_discounted_return() {
        let mut traj = Trajectory::new();
        for _ in 0..3 {
            traj.push(Transition {
                state: 0,
                action: 0,
                confounder: 0,
                next_state: 0,
                reward: 1.0,
            });
        }
        // 1 + 0.9 + 0.81
        assert!((traj.discounted_return(0.9) - 2.71).abs() < 1e-10);
    }

    #[test]
    fn test_persistent_mode_holds_confounder() {
        let mdp = coin_mdp();
        let pi = TabularPolicy::uniform(2, 1);
        let mut sampler = SeededSampler::new(5);
        for _ in 0..20 {
            let traj = mdp
                .generate_trajectory(&pi, 10, ConfounderMode::Persistent, &mut sampler)
                .unwrap();
            let u = traj.initial_confounder().unwrap();
            assert!(traj.steps.iter().all(|t| t.confounder == u));
            assert!(traj.steps.iter().all(|t| t.next_state == u));
        }
    }

    #[test]
    fn test_iid_mode_redraws_confounder() {
        let mdp = coin_mdp();
        let pi = TabularPolicy::uniform(2, 1);
        let mut sampler = SeededSampler::new(5);
        let traj = mdp
            .generate_trajectory(&pi, 200, ConfounderMode::Iid, &mut sampler)
            .unwrap();
        let ones = traj.steps.iter().filter(|t| t.confounder == 1).count();
        assert!(ones > 50 && ones < 150);
    }

    #[test]
    fn test_chain_consistency() {
        let mdp = coin_mdp();
        let pi_b = ConfoundedPolicy::from_rows(vec![vec![vec![1.0]; 2], vec![vec![1.0]; 2]])
            .unwrap();
        let mut sampler = SeededSampler::new(1);
        let traj = mdp
            .generate_trajectory(&pi_b, 15, ConfounderMode::Iid, &mut sampler)
            .unwrap();
        assert_eq!(traj.len(), 15);
        assert_eq!(traj.initial_state(), Some(0));
        for pair in traj.steps.windows(2) {
            assert_eq!(pair[0].next_state, pair[1].state);
        }
    }

    #[test]
    fn test_dataset_validation() {
        let step = Transition {
            state: 0,
            action: 0,
            confounder: 0,
            next_state: 1,
            reward: 0.0,
        };
        let short = Trajectory { steps: vec![step] };
        let long = Trajectory {
            steps: vec![step, step],
        };
        assert!(matches!(
            Dataset::new(vec![short.clone(), long], 2, 1),
            Err(MdpError::RaggedDataset { index: 1, .. })
        ));
        assert!(matches!(
            Dataset::new(vec![short.clone()], 1, 1),
            Err(MdpError::InvalidState { state: 1, .. })
        ));
        assert_eq!(Dataset::new(vec![], 2, 1), Err(MdpError::EmptyDataset));
        let ok = Dataset::new(vec![short.clone(), short], 2, 1).unwrap();
        assert_eq!(ok.horizon(), 1);
        assert_eq!(calc_returns(&ok, 0.5), vec![0.0, 0.0]);
    }
}
