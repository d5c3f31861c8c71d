//! Per-trajectory next-state fingerprints.
//!
//! For trajectory `m` and a set of time steps `Ω`, the fingerprint of cell
//! `(s, a)` is the empirical next-state distribution over the visits to
//! `(s, a)` inside `Ω`:
//!
//! ```text
//!   h[m, s, a, s'] = #{t ∈ Ω : (s_t, a_t, s_t+1) = (s, a, s')} / norm
//! ```
//!
//! Two fingerprints from disjoint halves of the same trajectory are
//! independent given the trajectory's latent class, which is what makes
//! their products unbiased for the second moment.
//!
//! Fingerprints are stored per cell as an `n_trajectories × n_states`
//! matrix so the projection step is one matrix product per cell.

use confound_mdp::Dataset;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::MixError;

/// Normalizer of the fingerprint counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    /// Divide by the visits to `(s, a)` in the half; unvisited cells are 0.
    #[default]
    VisitCount,
    /// Divide by the number of steps in the half.
    Horizon,
}

/// Contiguous first and second halves of `0..horizon`.
pub fn split_horizon(horizon: usize) -> Result<(Vec<usize>, Vec<usize>), MixError> {
    if horizon < 2 {
        return Err(MixError::InvalidParameter {
            name: "horizon",
            reason: format!("cannot split {horizon} steps into two halves"),
        });
    }
    let mid = horizon / 2;
    Ok(((0..mid).collect(), (mid..horizon).collect()))
}

/// Fingerprints of every trajectory over one set of time steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprints {
    pub n_states: usize,
    pub n_actions: usize,
    /// One `n_trajectories × n_states` matrix per cell, indexed `s * A + a`.
    pub cells: Vec<DMatrix<f64>>,
    /// Visits to each cell, indexed `[cell][trajectory]`.
    pub visits: Vec<Vec<f64>>,
}

impl Fingerprints {
    /// Fingerprint `dataset` over the time steps in `steps`.
    pub fn estimate(
        dataset: &Dataset,
        steps: &[usize],
        normalization: Normalization,
    ) -> Result<Self, MixError> {
        let horizon = dataset.horizon();
        if let Some(&t) = steps.iter().find(|&&t| t >= horizon) {
            return Err(MixError::ShapeMismatch {
                what: "time step",
                expected: horizon,
                got: t + 1,
            });
        }
        let (n_states, n_actions) = (dataset.n_states, dataset.n_actions);
        let n = dataset.len();
        let mut cells = vec![DMatrix::zeros(n, n_states); n_states * n_actions];
        let mut visits = vec![vec![0.0; n]; n_states * n_actions];

        for (m, traj) in dataset.trajectories.iter().enumerate() {
            for &t in steps {
                let step = &traj.steps[t];
                let cell = step.state * n_actions + step.action;
                cells[cell][(m, step.next_state)] += 1.0;
                visits[cell][m] += 1.0;
            }
        }

        for (h, counts) in cells.iter_mut().zip(&visits) {
            for (m, &count) in counts.iter().enumerate() {
                let norm = match normalization {
                    Normalization::VisitCount => count,
                    Normalization::Horizon => steps.len() as f64,
                };
                if norm > 0.0 {
                    h.row_mut(m).unscale_mut(norm);
                }
            }
        }

        Ok(Self {
            n_states,
            n_actions,
            cells,
            visits,
        })
    }

    pub fn n_trajectories(&self) -> usize {
        self.cells.first().map_or(0, |h| h.nrows())
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, state: usize, action: usize) -> &DMatrix<f64> {
        &self.cells[state * self.n_actions + action]
    }
}

/// Fingerprints of the two halves of every trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct HalfFingerprints {
    pub first: Fingerprints,
    pub second: Fingerprints,
}

impl HalfFingerprints {
    /// Split the horizon in two and fingerprint each half.
    pub fn estimate(dataset: &Dataset, normalization: Normalization) -> Result<Self, MixError> {
        let (first, second) = split_horizon(dataset.horizon())?;
        Ok(Self {
            first: Fingerprints::estimate(dataset, &first, normalization)?,
            second: Fingerprints::estimate(dataset, &second, normalization)?,
        })
    }

    pub fn n_trajectories(&self) -> usize {
        self.first.n_trajectories()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confound_mdp::{Trajectory, Transition};

    fn t(state: usize, action: usize, next_state: usize) -> Transition {
        Transition {
            state,
            action,
            confounder: 0,
            next_state,
            reward: 0.0,
        }
    }

    fn dataset() -> Dataset {
        Dataset::new(
            vec![
                Trajectory {
                    steps: vec![t(0, 0, 1), t(1, 0, 0), t(0, 0, 0), t(0, 1, 1)],
                },
                Trajectory {
                    steps: vec![t(1, 1, 1), t(1, 1, 1), t(1, 1, 0), t(0, 0, 1)],
                },
            ],
            2,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_split_horizon() {
        assert_eq!(split_horizon(5).unwrap(), (vec![0, 1], vec![2, 3, 4]));
        assert!(split_horizon(1).is_err());
    }

    #[test]
    fn test_visit_count_fingerprint_is_distribution() {
        let d = dataset();
        let h = Fingerprints::estimate(&d, &[0, 1, 2, 3], Normalization::VisitCount).unwrap();
        // trajectory 0 visits (0, 0) twice, once to each state
        assert_eq!(h.cell(0, 0).row(0).iter().copied().collect::<Vec<_>>(), vec![0.5, 0.5]);
        // trajectory 1 never visits (0, 1)
        assert_eq!(h.cell(0, 1)[(1, 0)], 0.0);
        assert_eq!(h.cell(0, 1)[(1, 1)], 0.0);
        let row: f64 = h.cell(1, 1).row(1).sum();
        assert!((row - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_horizon_normalization() {
        let d = dataset();
        let h = Fingerprints::estimate(&d, &[0, 1], Normalization::Horizon).unwrap();
        assert_eq!(h.cell(1, 1)[(1, 1)], 1.0);
        assert_eq!(h.cell(0, 0)[(0, 1)], 0.5);
    }

    #[test]
    fn test_halves() {
        let halves = HalfFingerprints::estimate(&dataset(), Normalization::VisitCount).unwrap();
        assert_eq!(halves.n_trajectories(), 2);
        assert_eq!(halves.first.visits[0][0], 1.0);
        assert_eq!(halves.second.visits[0][0], 1.0);
        assert!(Fingerprints::estimate(&dataset(), &[4], Normalization::Horizon).is_err());
    }
}
