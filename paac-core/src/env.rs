//! Environment.
use crate::space::{Action, ActionRef, Space};
use anyhow::Result;
use std::collections::HashMap;

/// Additional information emitted by an environment step.
///
/// Runners keep one map per environment and clear it before each step.
pub type Info = HashMap<String, f64>;

/// Reward and termination flag of a single environment step.
///
/// The next state is written by the environment into the buffer handed to
/// [`Env::step`], so a step does not allocate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutcome {
    /// Reward.
    pub reward: f64,

    /// Flag denoting that the episode ended with this step.
    pub done: bool,
}

/// Represents an environment, typically an MDP.
///
/// Environments are moved into worker threads, hence `Send`.
pub trait Env: Send {
    /// Configurations.
    type Config: Clone + Send;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Space of states. Must not change over the lifetime of the environment.
    fn state_space(&self) -> Space;

    /// Space of actions. Must not change over the lifetime of the environment.
    fn action_space(&self) -> Space;

    /// Resets the environment and writes the initial state into `state`.
    ///
    /// `state` has `state_space().flat_len()` elements.
    fn reset(&mut self, state: &mut [f32]) -> Result<()>;

    /// Performs an environment step, writing the next state into `next_state`
    /// and any additional information into `info`.
    fn step(
        &mut self,
        action: ActionRef<'_>,
        next_state: &mut [f32],
        info: &mut Info,
    ) -> Result<StepOutcome>;

    /// Draws a random action from the action space.
    fn sample_random_action(&mut self) -> Action;

    /// Releases resources held by the environment.
    fn close(&mut self) {}

    /// Performs an environment step and resets the environment if the episode ends.
    ///
    /// On termination `next_state` holds the initial state of the next
    /// episode while the returned outcome still carries the terminal reward
    /// and `done == true`.
    fn step_with_reset(
        &mut self,
        action: ActionRef<'_>,
        next_state: &mut [f32],
        info: &mut Info,
    ) -> Result<StepOutcome> {
        let outcome = self.step(action, next_state, info)?;
        if outcome.done {
            self.reset(next_state)?;
        }
        Ok(outcome)
    }
}
