//! Interface shared by runners.
use crate::{error::RunnerError, stats::EpisodeStats};
use ndarray::ArrayD;
use paac_core::{Actions, Env, Info, Space};

/// Result of a synchronized step of all environments.
#[derive(Clone, Debug, PartialEq)]
pub struct StepResult {
    /// `(num_envs, *state_shape)`. For environments whose episode ended, the
    /// first state of the next episode.
    pub states: ArrayD<f32>,

    /// Rewards.
    pub rewards: Vec<f64>,

    /// Whether the episode of each environment ended with this step.
    pub dones: Vec<bool>,

    /// Information of each environment for this step.
    pub infos: Vec<Info>,
}

/// Drives a fixed set of environments in lockstep.
///
/// Environments are auto-reset: when an episode ends, the returned state is
/// the initial state of the next episode while reward and done still belong
/// to the terminal step.
pub trait Runner {
    /// Number of environments.
    fn num_envs(&self) -> usize;

    /// Space of the state of a single environment.
    fn state_space(&self) -> &Space;

    /// Space of the action of a single environment.
    fn action_space(&self) -> &Space;

    /// Resets all environments and returns their initial states.
    fn reset(&mut self) -> Result<ArrayD<f32>, RunnerError>;

    /// Steps every environment once with its row of `actions`.
    fn step(&mut self, actions: &Actions) -> Result<StepResult, RunnerError>;

    /// Draws a random action for every environment.
    fn sample_random_action(&mut self) -> Result<Actions, RunnerError>;

    /// Episode statistics.
    fn stats(&self) -> &EpisodeStats;

    /// Closes all environments. Further calls to other methods fail with
    /// [`RunnerError::Closed`]; closing again is a no-op.
    fn close(&mut self) -> Result<(), RunnerError>;
}

/// Builds `num_envs` environments with seeds `seed + i` and checks that they
/// share spaces supported by the runners.
pub(crate) fn build_envs<E: Env>(
    env_config: &E::Config,
    num_envs: usize,
    seed: i64,
) -> Result<(Vec<E>, Space, Space), RunnerError> {
    if num_envs == 0 {
        return Err(RunnerError::Configuration(
            "a runner needs at least one environment".to_string(),
        ));
    }
    let envs = (0..num_envs)
        .map(|i| {
            E::build(env_config, seed + i as i64).map_err(|e| RunnerError::EnvBuild {
                env: i,
                reason: format!("{:#}", e),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let state_space = envs[0].state_space();
    let action_space = envs[0].action_space();
    check_action_space(&action_space)?;
    for (i, env) in envs.iter().enumerate().skip(1) {
        if env.state_space() != state_space || env.action_space() != action_space {
            return Err(RunnerError::Configuration(format!(
                "environment {} has spaces different from environment 0",
                i
            )));
        }
    }
    Ok((envs, state_space, action_space))
}

fn check_action_space(space: &Space) -> Result<(), RunnerError> {
    let supported = match space {
        Space::Continuous { .. } => space.dtype().is_float(),
        Space::Discrete { .. } => space.dtype().is_integer(),
    };
    if !supported {
        return Err(RunnerError::Configuration(format!(
            "unsupported action space for the shared layout: {:?}",
            space
        )));
    }
    Ok(())
}
