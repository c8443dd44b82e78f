//! Transforms applied to batched states before they reach the agent.
use crate::error::Result;
use ndarray::{ArrayD, ArrayViewD};

/// A stateful transform of states shaped `(num_envs, *state_shape)`.
///
/// `training` selects between the training and the evaluation streams, which
/// transforms keep apart (e.g. separate frame stacks).
pub trait StateTransform {
    /// Transforms a batch of states.
    fn transform_state(
        &mut self,
        state: ArrayViewD<'_, f32>,
        training: bool,
    ) -> Result<ArrayD<f32>>;

    /// Called once a batch of transitions has been assembled.
    fn on_batch_end(&mut self, _training: bool) {}
}
