//! # Band-constrained linear program
//!
//! Solves exactly
//!
//! ```text
//!   minimize    c · w
//!   subject to  lower ≤ w ≤ upper
//!               band_lower ≤ a · w ≤ band_upper        (a ≥ 0)
//! ```
//!
//! With a single coupling constraint the LP is a fractional knapsack: start
//! every coordinate at the bound that minimizes its own cost, then, if the
//! band is missed, move coordinates toward the band in order of cost per
//! unit of `a · w` until it is met.

use crate::error::OptimError;
use crate::problem::Solution;

/// A box LP with one two-sided constraint on a non-negative weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct BandLp {
    pub cost: Vec<f64>,
    pub weights: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub band_lower: f64,
    pub band_upper: f64,
}

impl BandLp {
    fn validate(&self) -> Result<(), OptimError> {
        let n = self.cost.len();
        for (what, len) in [
            ("weights", self.weights.len()),
            ("lower bounds", self.lower.len()),
            ("upper bounds", self.upper.len()),
        ] {
            if len != n {
                return Err(OptimError::DimensionMismatch {
                    what,
                    expected: n,
                    got: len,
                });
            }
        }
        for (index, (&lo, &hi)) in self.lower.iter().zip(&self.upper).enumerate() {
            if !(lo.is_finite() && hi.is_finite()) || lo > hi {
                return Err(OptimError::InvalidBounds {
                    index,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(())
    }

    fn band_value(&self, w: &[f64]) -> f64 {
        self.weights.iter().zip(w).map(|(a, x)| a * x).sum()
    }

    /// Exact minimizer.
    pub fn solve(&self) -> Result<Solution, OptimError> {
        self.validate()?;

        let mut w: Vec<f64> = self
            .cost
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(&c, (&lo, &hi))| if c >= 0.0 { lo } else { hi })
            .collect();

        let current = self.band_value(&w);
        if current < self.band_lower {
            self.shift(&mut w, self.band_lower - current, true);
        } else if current > self.band_upper {
            self.shift(&mut w, current - self.band_upper, false);
        }

        let band = self.band_value(&w);
        let residual = (self.band_lower - band).max(band - self.band_upper).max(0.0);
        if residual > 1e-12 * (1.0 + band.abs()) {
            return Err(OptimError::Infeasible { residual });
        }
        let value = self.cost.iter().zip(&w).map(|(c, x)| c * x).sum();
        Ok(Solution {
            value,
            x: w,
            success: true,
            constraint_violation: residual,
            iterations: 1,
        })
    }

    /// Move `a · w` by `amount` (up or down) at least extra cost.
    fn shift(&self, w: &mut [f64], mut amount: f64, up: bool) {
        // marginal cost of one unit of band value through coordinate i
        let mut order: Vec<(usize, f64)> = self
            .weights
            .iter()
            .enumerate()
            .filter(|(_, a)| **a > 0.0)
            .map(|(i, &a)| {
                let rate = self.cost[i] / a;
                (i, if up { rate } else { -rate })
            })
            .collect();
        order.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));

        for (i, _) in order {
            if amount <= 0.0 {
                break;
            }
            let a = self.weights[i];
            let room = if up {
                self.upper[i] - w[i]
            } else {
                w[i] - self.lower[i]
            };
            let delta = room.min(amount / a);
            if up {
                w[i] += delta;
            } else {
                w[i] -= delta;
            }
            amount -= delta * a;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_unconstrained_corner() {
        let lp = BandLp {
            cost: vec![1.0, -2.0],
            weights: vec![0.5, 0.5],
            lower: vec![0.0, 0.0],
            upper: vec![2.0, 2.0],
            band_lower: f64::NEG_INFINITY,
            band_upper: f64::INFINITY,
        };
        let sol = lp.solve().unwrap();
        assert_eq!(sol.x, vec![0.0, 2.0]);
        assert_eq!(sol.value, -4.0);
    }

    #[test]
    fn test_band_forces_cheapest_increase() {
        // both costs positive, band needs a·w ≥ 1: the cheaper per-unit
        // coordinate (index 1: 1/1 vs 3/1) absorbs the whole increase
        let lp = BandLp {
            cost: vec![3.0, 1.0],
            weights: vec![1.0, 1.0],
            lower: vec![0.0, 0.0],
            upper: vec![1.0, 1.0],
            band_lower: 1.0,
            band_upper: 2.0,
        };
        let sol = lp.solve().unwrap();
        assert!((sol.x[1] - 1.0).abs() < 1e-12);
        assert!(sol.x[0].abs() < 1e-12);
        assert!((sol.value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_infeasible_band() {
        let lp = BandLp {
            cost: vec![1.0],
            weights: vec![1.0],
            lower: vec![0.0],
            upper: vec![1.0],
            band_lower: 2.0,
            band_upper: 3.0,
        };
        assert!(matches!(lp.solve(), Err(OptimError::Infeasible { .. })));
    }

    proptest! {
        #[test]
        fn prop_no_feasible_point_beats_solution(
            seed in any::<u64>(),
            n in 1usize..6,
        ) {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let cost: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let weights: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
            let lower: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..0.5)).collect();
            let upper: Vec<f64> = lower.iter().map(|lo| lo + rng.gen_range(0.0..2.0)).collect();
            // a band around a random feasible point keeps the LP feasible
            let anchor: Vec<f64> = lower.iter().zip(&upper).map(|(lo, hi)| rng.gen_range(*lo..=*hi)).collect();
            let center: f64 = weights.iter().zip(&anchor).map(|(a, x)| a * x).sum();
            let lp = BandLp {
                cost: cost.clone(),
                weights: weights.clone(),
                lower: lower.clone(),
                upper: upper.clone(),
                band_lower: center - 0.1,
                band_upper: center + 0.1,
            };
            let sol = lp.solve().unwrap();
            for _ in 0..50 {
                let candidate: Vec<f64> = lower.iter().zip(&upper).map(|(lo, hi)| rng.gen_range(*lo..=*hi)).collect();
                let band: f64 = weights.iter().zip(&candidate).map(|(a, x)| a * x).sum();
                if band < lp.band_lower || band > lp.band_upper {
                    continue;
                }
                let value: f64 = cost.iter().zip(&candidate).map(|(c, x)| c * x).sum();
                prop_assert!(sol.value <= value + 1e-9);
            }
        }
    }
}
