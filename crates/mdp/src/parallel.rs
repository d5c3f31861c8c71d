//! # Parallel map
//!
//! Fan-out of independent units of work with index-ordered fan-in:
//!
//! ```text
//!    input₀ ──▶ f(0, input₀) ──┐
//!    input₁ ──▶ f(1, input₁) ──┼──▶ [out₀, out₁, ..., outₙ]
//!    inputₙ ──▶ f(n, inputₙ) ──┘
//! ```
//!
//! Every call receives its own input by value, so workers share no mutable
//! state. Output `i` always corresponds to input `i` regardless of which
//! worker ran it or when it finished.

use rayon::prelude::*;

/// Executes `f(i, input_i)` for every input and returns outputs in input order.
pub trait ParallelMap {
    fn map<T, R, F>(&self, inputs: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> R + Send + Sync;
}

/// Runs every unit on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl ParallelMap for Sequential {
    fn map<T, R, F>(&self, inputs: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> R + Send + Sync,
    {
        inputs
            .into_iter()
            .enumerate()
            .map(|(i, x)| f(i, x))
            .collect()
    }
}

/// Runs units on a rayon pool.
///
/// With `threads = None` the global pool is used; otherwise a dedicated pool
/// of that size is built for the call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonMap {
    pub threads: Option<usize>,
}

impl RayonMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }
}

impl ParallelMap for RayonMap {
    fn map<T, R, F>(&self, inputs: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> R + Send + Sync,
    {
        let run = |inputs: Vec<T>| -> Vec<R> {
            inputs
                .into_par_iter()
                .enumerate()
                .map(|(i, x)| f(i, x))
                .collect()
        };
        match self.threads {
            None => run(inputs),
            Some(n) => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => pool.install(|| run(inputs)),
                Err(err) => {
                    tracing::warn!(%err, threads = n, "falling back to global rayon pool");
                    run(inputs)
                }
            },
        }
    }
}
