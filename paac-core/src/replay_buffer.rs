//! Replay buffers over transitions of vectorized environments.
//!
//! Both buffers ingest one transition per environment at a time, i.e. arrays
//! whose leading dimension is `num_envs`, and keep the newest
//! `maxlen / num_envs` transitions of every environment.
//!
//! - [`ReplayBuffer`] samples uniformly with replacement.
//! - [`PrioritizedReplayBuffer`] samples proportionally to
//!   `priority^pr_factor(step)` and returns importance-sampling weights.
//!
//! Sampled batches carry the flat indices of their transitions, which are
//! the indices expected by [`PrioritizedReplayBuffer::update_pr`].
mod base;
mod batch;
mod config;
mod prioritized;
mod sum_tree;
pub use base::ReplayBuffer;
pub use batch::{ReplayBatch, Transition};
pub use config::{PrioritizedReplayBufferConfig, ReplayBufferConfig, WeightNormalizer};
pub use prioritized::PrioritizedReplayBuffer;

use crate::{error::Result, space::Actions};
use ndarray::ArrayViewD;

/// Interface of buffers ingesting transitions of all environments at once.
pub trait ExperienceBufferBase {
    /// Appends one transition per environment.
    ///
    /// `state` is shaped `(num_envs, *state_shape)`; `action`, `reward` and
    /// `done` cover `num_envs` environments.
    fn add_sample(
        &mut self,
        state: ArrayViewD<'_, f32>,
        action: &Actions,
        reward: &[f64],
        done: &[bool],
    ) -> Result<()>;

    /// Number of stored transitions over all environments.
    fn len(&self) -> usize;

    /// Returns `true` if no transition is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
