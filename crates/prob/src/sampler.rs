//! Injectable randomness.
//!
//! Every stochastic routine in the workspace draws through a [`Sampler`]
//! instead of a global generator, so runs are reproducible from a seed and
//! each worker can own an independent stream.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dist::{check_simplex, sample_index};
use crate::error::ProbError;

/// Source of uniform and categorical draws.
pub trait Sampler {
    /// A uniform draw from `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// A categorical draw from the probability vector `p`.
    ///
    /// # Errors
    ///
    /// Returns an invalid-distribution error if `p` is not a simplex.
    fn categorical(&mut self, p: &[f64]) -> Result<usize, ProbError> {
        check_simplex(p)?;
        Ok(sample_index(p, self.uniform()))
    }

    /// A uniform draw from `[0, high)`, used for tie-breaking noise.
    fn uniform_below(&mut self, high: f64) -> f64 {
        self.uniform() * high
    }
}

/// [`Sampler`] backed by a seeded `StdRng`.
#[derive(Debug, Clone)]
pub struct SeededSampler {
    rng: StdRng,
}

impl SeededSampler {
    /// Create a sampler from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Derive an independent sampler for a sub-task (worker, restart, cell).
    pub fn derive(seed: u64, stream: u64) -> Self {
        // splitmix64 finalizer so nearby (seed, stream) pairs decorrelate
        let mut z = seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        Self::new(z ^ (z >> 31))
    }

    /// Access the underlying generator.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl Sampler for SeededSampler {
    fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}
