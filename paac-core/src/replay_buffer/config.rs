//! Configurations of replay buffers.
use crate::schedule::{linear_schedule, Schedule};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// How importance-sampling weights are normalized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightNormalizer {
    /// Divide by the largest weight over the whole buffer.
    All,

    /// Divide by the largest weight in the sampled batch.
    Batch,
}

/// Configuration of [`ReplayBuffer`](super::ReplayBuffer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayBufferConfig {
    /// Maximum number of transitions over all environments. Each environment
    /// keeps `maxlen / num_envs` of them.
    pub maxlen: usize,

    /// Number of environments feeding the buffer.
    pub num_envs: usize,

    /// Random seed used for sampling.
    pub seed: u64,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            maxlen: 10000,
            num_envs: 1,
            seed: 42,
        }
    }
}

impl ReplayBufferConfig {
    /// Sets the maximum number of transitions.
    pub fn maxlen(mut self, maxlen: usize) -> Self {
        self.maxlen = maxlen;
        self
    }

    /// Sets the number of environments.
    pub fn num_envs(mut self, num_envs: usize) -> Self {
        self.num_envs = num_envs;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Constructs [`ReplayBufferConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ReplayBufferConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Configuration of [`PrioritizedReplayBuffer`](super::PrioritizedReplayBuffer).
///
/// ```
/// use paac_core::{linear_schedule, PrioritizedReplayBufferConfig, ReplayBufferConfig, Schedule};
///
/// let config = PrioritizedReplayBufferConfig::default()
///     .replay(ReplayBufferConfig::default().maxlen(1000).num_envs(4))
///     .pr_factor(Schedule::Constant(0.6))
///     .is_factor(linear_schedule(0.4, 1.0, 100_000));
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PrioritizedReplayBufferConfig {
    /// Underlying replay buffer.
    pub replay: ReplayBufferConfig,

    /// Exponent `alpha` applied to priorities, as a function of the step.
    /// 0 gives uniform sampling.
    pub pr_factor: Schedule,

    /// Exponent `beta` of importance-sampling weights, as a function of the step.
    pub is_factor: Schedule,

    /// Added to the absolute value of updated priorities so that no
    /// transition gets a zero probability.
    pub epsilon: f32,

    /// Normalization of importance-sampling weights.
    pub normalize: WeightNormalizer,
}

impl Default for PrioritizedReplayBufferConfig {
    fn default() -> Self {
        Self {
            replay: ReplayBufferConfig::default(),
            pr_factor: Schedule::Constant(0.6),
            is_factor: linear_schedule(0.4, 1.0, 500_000),
            epsilon: 1e-6,
            normalize: WeightNormalizer::Batch,
        }
    }
}

impl PrioritizedReplayBufferConfig {
    /// Sets the configuration of the underlying replay buffer.
    pub fn replay(mut self, replay: ReplayBufferConfig) -> Self {
        self.replay = replay;
        self
    }

    /// Sets the schedule of the priority exponent.
    pub fn pr_factor(mut self, pr_factor: Schedule) -> Self {
        self.pr_factor = pr_factor;
        self
    }

    /// Sets the schedule of the importance-sampling exponent.
    pub fn is_factor(mut self, is_factor: Schedule) -> Self {
        self.is_factor = is_factor;
        self
    }

    /// Sets the priority offset.
    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Sets the weight normalization.
    pub fn normalize(mut self, normalize: WeightNormalizer) -> Self {
        self.normalize = normalize;
        self
    }

    /// Constructs [`PrioritizedReplayBufferConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`PrioritizedReplayBufferConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
