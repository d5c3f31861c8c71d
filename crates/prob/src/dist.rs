//! Probability distributions over finite sets.

use serde::{Deserialize, Serialize};

use crate::error::ProbError;
use crate::PROB_TOLERANCE;

/// Check that `p` is a probability simplex: non-empty, non-negative, sums to 1.
pub fn check_simplex(p: &[f64]) -> Result<(), ProbError> {
    if p.is_empty() {
        return Err(ProbError::EmptyDistribution);
    }

    if let Some(&value) = p.iter().find(|&&x| x < -PROB_TOLERANCE || x.is_nan()) {
        return Err(ProbError::NegativeProbability { value });
    }

    let sum: f64 = p.iter().sum();
    if (sum - 1.0).abs() > PROB_TOLERANCE {
        return Err(ProbError::NotNormalized { sum });
    }

    Ok(())
}

/// A probability distribution over a finite set {0, 1, ..., n-1}.
///
/// Invariants:
/// - All probabilities are non-negative
/// - Probabilities sum to 1 (within tolerance)
///
/// # Example
///
/// ```rust
/// use confound_prob::Dist;
///
/// // Fair coin
/// let coin = Dist::uniform(2);
/// assert!((coin.p[0] - 0.5).abs() < 1e-12);
///
/// // Biased die
/// let die = Dist::new(vec![0.1, 0.1, 0.2, 0.2, 0.2, 0.2]).unwrap();
/// assert_eq!(die.len(), 6);
///
/// // Point mass (certain outcome)
/// let certain = Dist::point(3, 1);
/// assert_eq!(certain.p[1], 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    /// Probability vector (sums to 1).
    pub p: Vec<f64>,
}

impl Dist {
    /// Create a new distribution from a probability vector.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The vector is empty
    /// - Any probability is negative
    /// - The probabilities don't sum to 1 (within tolerance)
    pub fn new(p: Vec<f64>) -> Result<Self, ProbError> {
        check_simplex(&p)?;
        Ok(Self { p })
    }

    /// Create a distribution from unnormalized weights.
    ///
    /// ```rust
    /// use confound_prob::Dist;
    ///
    /// let d = Dist::from_weights(vec![1.0, 2.0, 3.0]).unwrap();
    /// assert!((d.p[0] - 1.0 / 6.0).abs() < 1e-12);
    /// ```
    pub fn from_weights(weights: Vec<f64>) -> Result<Self, ProbError> {
        if weights.is_empty() {
            return Err(ProbError::EmptyDistribution);
        }

        if let Some(&value) = weights.iter().find(|&&x| x < 0.0 || x.is_nan()) {
            return Err(ProbError::NegativeProbability { value });
        }

        let sum: f64 = weights.iter().sum();
        if sum <= 0.0 {
            return Err(ProbError::ZeroWeights);
        }

        let p: Vec<f64> = weights.iter().map(|w| w / sum).collect();
        Ok(Self { p })
    }

    /// Create a uniform distribution over n elements.
    pub fn uniform(n: usize) -> Self {
        assert!(n > 0, "Cannot create uniform distribution over empty set");
        Self {
            p: vec![1.0 / n as f64; n],
        }
    }

    /// Create a point mass (Dirac delta) at index i.
    pub fn point(n: usize, i: usize) -> Self {
        assert!(i < n, "Index {} out of bounds for size {}", i, n);
        let mut p = vec![0.0; n];
        p[i] = 1.0;
        Self { p }
    }

    /// The number of outcomes in the sample space.
    pub fn len(&self) -> usize {
        self.p.len()
    }

    /// Check if the distribution is over an empty set (always false for valid Dist).
    pub fn is_empty(&self) -> bool {
        self.p.is_empty()
    }

    /// Expectation of `values` under this distribution: `Σ p[i] · values[i]`.
    pub fn expect(&self, values: &[f64]) -> Result<f64, ProbError> {
        if values.len() != self.p.len() {
            return Err(ProbError::ShapeMismatch {
                what: "values under a distribution",
                expected: self.p.len(),
                got: values.len(),
            });
        }
        Ok(dot(&self.p, values))
    }

}

/// Dot product of two equal-length slices.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Index of the largest entry; ties go to the first occurrence.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Index of the smallest entry; ties go to the first occurrence.
pub fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v < values[best] {
            best = i;
        }
    }
    best
}

/// Inverse transform sampling over an already-validated simplex.
pub(crate) fn sample_index(p: &[f64], u: f64) -> usize {
    let mut cumsum = 0.0;
    for (i, &x) in p.iter().enumerate() {
        cumsum += x;
        if u < cumsum {
            return i;
        }
    }
    // u close to 1.0: fall back to the last outcome with mass
    p.iter().rposition(|&x| x > 0.0).unwrap_or(p.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dist_new_valid() {
        let d = Dist::new(vec![0.3, 0.7]).unwrap();
        assert_eq!(d.len(), 2);
        assert!((d.p[0] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_dist_new_not_normalized() {
        let result = Dist::new(vec![0.3, 0.6]);
        assert!(matches!(result, Err(ProbError::NotNormalized { .. })));
        assert!(result.unwrap_err().is_invalid_distribution());
    }

    #[test]
    fn test_dist_new_negative() {
        let result = Dist::new(vec![-0.5, 1.5]);
        assert!(matches!(result, Err(ProbError::NegativeProbability { .. })));
    }

    #[test]
    fn test_dist_from_weights() {
        let d = Dist::from_weights(vec![1.0, 2.0, 3.0]).unwrap();
        assert!((d.p[1] - 2.0 / 6.0).abs() < 1e-12);
        assert!((d.p[2] - 3.0 / 6.0).abs() < 1e-12);
        assert!(matches!(
            Dist::from_weights(vec![0.0, 0.0]),
            Err(ProbError::ZeroWeights)
        ));
    }

    #[test]
    fn test_sample_index() {
        let p = [0.3, 0.7];
        assert_eq!(sample_index(&p, 0.0), 0);
        assert_eq!(sample_index(&p, 0.29), 0);
        assert_eq!(sample_index(&p, 0.31), 1);
        assert_eq!(sample_index(&p, 0.99), 1);
    }

    #[test]
    fn test_sample_index_skips_trailing_zero_mass() {
        assert_eq!(sample_index(&[0.5, 0.5, 0.0], 1.0), 1);
    }

    #[test]
    fn test_argmax_argmin_first_occurrence() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 0.0]), 1);
        assert_eq!(argmin(&[2.0, 0.0, 5.0, 0.0]), 1);
    }

    #[test]
    fn test_expect() {
        let d = Dist::new(vec![0.5, 0.5]).unwrap();
        assert!((d.expect(&[1.0, 3.0]).unwrap() - 2.0).abs() < 1e-12);
        assert!(d.expect(&[1.0]).is_err());
    }
}
