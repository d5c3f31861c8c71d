//! Tabular action-value functions.

use confound_prob::dot;
use serde::{Deserialize, Serialize};

use crate::policy::TabularPolicy;

/// A table `q[state][action]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTable {
    pub q: Vec<Vec<f64>>,
}

impl QTable {
    /// All-zero table, the starting point of every iterative evaluator.
    pub fn zeros(n_states: usize, n_actions: usize) -> Self {
        Self {
            q: vec![vec![0.0; n_actions]; n_states],
        }
    }

    pub fn n_states(&self) -> usize {
        self.q.len()
    }

    pub fn n_actions(&self) -> usize {
        self.q.first().map_or(0, Vec::len)
    }

    pub fn get(&self, state: usize, action: usize) -> f64 {
        self.q[state][action]
    }

    pub fn set(&mut self, state: usize, action: usize, value: f64) {
        self.q[state][action] = value;
    }

    pub fn row(&self, state: usize) -> &[f64] {
        &self.q[state]
    }

    /// State values under a flat policy: `V(s) = Σ_a pi(a|s) · Q(s, a)`.
    pub fn policy_values(&self, pi: &TabularPolicy) -> Vec<f64> {
        self.q
            .iter()
            .enumerate()
            .map(|(s, row)| dot(pi.row(s), row))
            .collect()
    }

    /// Largest absolute entrywise difference to another table.
    pub fn max_abs_diff(&self, other: &QTable) -> f64 {
        self.q
            .iter()
            .zip(&other.q)
            .flat_map(|(a, b)| a.iter().zip(b).map(|(x, y)| (x - y).abs()))
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_values() {
        let mut q = QTable::zeros(2, 2);
        q.set(0, 0, 1.0);
        q.set(0, 1, 3.0);
        q.set(1, 1, -2.0);
        let pi = TabularPolicy::new(vec![vec![0.5, 0.5], vec![0.0, 1.0]]).unwrap();
        let v = q.policy_values(&pi);
        assert!((v[0] - 2.0).abs() < 1e-12);
        assert!((v[1] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_abs_diff() {
        let a = QTable::zeros(2, 3);
        let mut b = a.clone();
        b.set(1, 2, -0.25);
        assert_eq!(a.max_abs_diff(&b), 0.25);
        assert_eq!(b.n_actions(), 3);
    }
}
