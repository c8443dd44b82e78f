//! Transitions and sampled batches.
use crate::{
    env::Info,
    space::{Action, Actions},
};
use ndarray::ArrayD;

/// A single transition of a single environment.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// State in which the action was taken.
    pub state: ArrayD<f32>,

    /// Action taken.
    pub action: Action,

    /// Reward received.
    pub reward: f64,

    /// Whether the episode ended with this transition.
    pub done: bool,

    /// Additional information. Replay buffers do not store it.
    pub info: Info,
}

/// A batch sampled from a replay buffer.
///
/// All fields are ordered consistently: entry `i` of every field belongs to
/// the transition stored at `idxs[i]`.
#[derive(Clone, Debug)]
pub struct ReplayBatch {
    /// `(batch_size, *state_shape)`.
    pub states: ArrayD<f32>,

    /// Actions, first dimension `batch_size`.
    pub actions: Actions,

    /// Rewards.
    pub rewards: Vec<f64>,

    /// Termination flags.
    pub dones: Vec<bool>,

    /// Flat indices of the sampled transitions.
    pub idxs: Vec<usize>,

    /// Normalized importance-sampling weights, for prioritized sampling only.
    pub weights: Option<Vec<f32>>,
}

impl ReplayBatch {
    /// Number of transitions in the batch.
    pub fn len(&self) -> usize {
        self.idxs.len()
    }

    /// Returns `true` if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.idxs.is_empty()
    }
}
