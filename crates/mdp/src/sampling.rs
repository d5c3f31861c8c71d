//! Batched and parallel trajectory collection.
//!
//! Trajectory `j` of a collection is always generated from the sampler
//! stream `(start_seed, j)`, so the dataset depends only on the config and
//! never on how many workers split the work.

use confound_prob::SeededSampler;
use serde::{Deserialize, Serialize};

use crate::error::MdpError;
use crate::model::ConfoundMdp;
use crate::parallel::ParallelMap;
use crate::policy::Policy;
use crate::rollout::{ConfounderMode, Dataset, Trajectory};

/// Configuration for collecting a logged dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Number of trajectories.
    pub n_trajectories: usize,
    /// Steps per trajectory.
    pub horizon: usize,
    /// Confounder draw semantics.
    pub mode: ConfounderMode,
    /// Number of work units the collection is split into.
    pub workers: usize,
    /// Base seed for the per-trajectory sampler streams.
    pub start_seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_trajectories: 1000,
            horizon: 100,
            mode: ConfounderMode::Iid,
            workers: 1,
            start_seed: 0,
        }
    }
}

impl SamplingConfig {
    pub fn new(n_trajectories: usize, horizon: usize) -> Self {
        Self {
            n_trajectories,
            horizon,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ConfounderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_seed(mut self, start_seed: u64) -> Self {
        self.start_seed = start_seed;
        self
    }

    /// Split `0..n_trajectories` into `workers` contiguous ranges whose
    /// sizes differ by at most one.
    fn chunks(&self) -> Vec<std::ops::Range<usize>> {
        let workers = self.workers.clamp(1, self.n_trajectories.max(1));
        let base = self.n_trajectories / workers;
        let extra = self.n_trajectories % workers;
        let mut start = 0;
        (0..workers)
            .map(|w| {
                let len = base + usize::from(w < extra);
                let range = start..start + len;
                start += len;
                range
            })
            .collect()
    }
}

fn generate_range<P>(
    mdp: &ConfoundMdp,
    pi_b: &P,
    config: &SamplingConfig,
    range: std::ops::Range<usize>,
) -> Result<Vec<Trajectory>, MdpError>
where
    P: Policy + ?Sized,
{
    range
        .map(|j| {
            let mut sampler = SeededSampler::derive(config.start_seed, j as u64);
            mdp.generate_trajectory(pi_b, config.horizon, config.mode, &mut sampler)
        })
        .collect()
}

/// Collect a dataset on the calling thread.
pub fn collect_sample<P>(
    mdp: &ConfoundMdp,
    pi_b: &P,
    config: &SamplingConfig,
) -> Result<Dataset, MdpError>
where
    P: Policy + ?Sized,
{
    if config.n_trajectories == 0 {
        return Err(MdpError::EmptyDataset);
    }
    let trajectories = generate_range(mdp, pi_b, config, 0..config.n_trajectories)?;
    tracing::info!(
        n = config.n_trajectories,
        horizon = config.horizon,
        mode = ?config.mode,
        "collected dataset"
    );
    Dataset::new(trajectories, mdp.n_states(), mdp.n_actions())
}

/// Collect a dataset by fanning `config.workers` ranges of trajectories out
/// over `executor`.
///
/// The model and the policy are shared read-only; each unit builds its own
/// samplers and simulator. The result equals [`collect_sample`] for the
/// same config.
pub fn collect_parallel<P, E>(
    mdp: &ConfoundMdp,
    pi_b: &P,
    config: &SamplingConfig,
    executor: &E,
) -> Result<Dataset, MdpError>
where
    P: Policy + Sync + ?Sized,
    E: ParallelMap,
{
    if config.n_trajectories == 0 {
        return Err(MdpError::EmptyDataset);
    }
    let chunks = config.chunks();
    let n_chunks = chunks.len();
    let parts = executor.map(chunks, |_, range| generate_range(mdp, pi_b, config, range));

    let mut trajectories = Vec::with_capacity(config.n_trajectories);
    for part in parts {
        trajectories.extend(part?);
    }
    tracing::info!(
        n = config.n_trajectories,
        horizon = config.horizon,
        workers = n_chunks,
        mode = ?config.mode,
        "collected dataset in parallel"
    );
    Dataset::new(trajectories, mdp.n_states(), mdp.n_actions())
}
