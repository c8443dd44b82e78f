//! Assembling fixed-horizon rollouts from a runner.
use crate::{base::Runner, error::RunnerError};
use anyhow::Result as AnyResult;
use log::debug;
use ndarray::{s, Array2, ArrayD, ArrayView2, ArrayViewD, Axis};
use paac_core::{Actions, ExperienceBufferBase, Info, StateTransform};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`RolloutBatcher`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RolloutBatcherConfig {
    /// Number of transitions per batch over all environments. Must be a
    /// multiple of the number of environments.
    pub batch_size: usize,
}

impl Default for RolloutBatcherConfig {
    fn default() -> Self {
        Self { batch_size: 128 }
    }
}

impl RolloutBatcherConfig {
    /// Sets the batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Constructs [`RolloutBatcherConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> AnyResult<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`RolloutBatcherConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> AnyResult<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Trajectories of all environments over `horizon` steps, time first.
#[derive(Clone, Debug)]
pub struct Rollout {
    /// `(horizon + 1, num_envs, *state_shape)`: the states the actions were
    /// taken in, followed by the state after the last step.
    pub states_t_and_tp1: ArrayD<f32>,

    /// Actions, one entry per step.
    pub actions: Vec<Actions>,

    /// `(horizon, num_envs)`.
    pub rewards: Array2<f32>,

    /// `(horizon, num_envs)`.
    pub dones: Array2<bool>,

    /// Infos, `infos[t][env]`.
    pub infos: Vec<Vec<Info>>,
}

impl Rollout {
    /// Number of steps.
    pub fn horizon(&self) -> usize {
        self.actions.len()
    }

    /// States at `t`, `(horizon, num_envs, *state_shape)`.
    pub fn state_t(&self) -> ArrayViewD<'_, f32> {
        self.states_t_and_tp1.slice_axis(Axis(0), (..self.horizon()).into())
    }

    /// States at `t + 1`, `(horizon, num_envs, *state_shape)`.
    pub fn state_tp1(&self) -> ArrayViewD<'_, f32> {
        self.states_t_and_tp1.slice_axis(Axis(0), (1..).into())
    }

    /// Rewards as a view.
    pub fn rewards(&self) -> ArrayView2<'_, f32> {
        self.rewards.view()
    }

    /// Feeds every step of the rollout to a replay buffer, oldest first.
    pub fn push_into<B: ExperienceBufferBase>(&self, buffer: &mut B) -> paac_core::Result<()> {
        for t in 0..self.horizon() {
            let rewards = self
                .rewards
                .slice(s![t, ..])
                .iter()
                .map(|&r| r as f64)
                .collect::<Vec<_>>();
            let dones = self.dones.slice(s![t, ..]).to_vec();
            buffer.add_sample(
                self.states_t_and_tp1.index_axis(Axis(0), t),
                &self.actions[t],
                &rewards,
                &dones,
            )?;
        }
        Ok(())
    }
}

/// Runs a [`Runner`] for `batch_size / num_envs` steps per batch.
///
/// States go through the state transforms, in order, before being handed to
/// the action selector and recorded. The last state of a batch is the first
/// state of the next one; the runner is reset only before the first batch.
pub struct RolloutBatcher<R: Runner> {
    runner: R,
    horizon: usize,
    transforms: Vec<Box<dyn StateTransform>>,
    state_t: Option<ArrayD<f32>>,
}

impl<R: Runner> RolloutBatcher<R> {
    /// Creates a batcher.
    pub fn build(config: &RolloutBatcherConfig, runner: R) -> Result<Self, RunnerError> {
        let num_envs = runner.num_envs();
        if config.batch_size == 0 || config.batch_size % num_envs != 0 {
            return Err(RunnerError::Configuration(format!(
                "batch_size ({}) must be a positive multiple of num_envs ({})",
                config.batch_size, num_envs
            )));
        }
        Ok(Self {
            runner,
            horizon: config.batch_size / num_envs,
            transforms: vec![],
            state_t: None,
        })
    }

    /// Appends a state transform.
    pub fn with_transform(mut self, transform: impl StateTransform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Number of steps per batch.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// The runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The runner, mutably.
    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    /// Consumes the batcher, returning the runner.
    pub fn into_runner(self) -> R {
        self.runner
    }

    fn transform_state(&mut self, state: ArrayD<f32>) -> Result<ArrayD<f32>, RunnerError> {
        let mut state = state;
        for t in self.transforms.iter_mut() {
            state = t.transform_state(state.view(), true)?;
        }
        Ok(state)
    }

    /// Collects one rollout.
    ///
    /// `select_action` receives the current (transformed) states and the
    /// total number of environment steps so far.
    pub fn get_batch<F>(&mut self, mut select_action: F) -> Result<Rollout, RunnerError>
    where
        F: FnMut(ArrayViewD<'_, f32>, usize) -> Actions,
    {
        let mut state_t = match self.state_t.take() {
            Some(s) => s,
            None => {
                let s = self.runner.reset()?;
                self.transform_state(s)?
            }
        };

        let num_envs = self.runner.num_envs();
        let mut states = Vec::with_capacity(self.horizon + 1);
        let mut actions = Vec::with_capacity(self.horizon);
        let mut rewards = Array2::zeros((self.horizon, num_envs));
        let mut dones = Array2::from_elem((self.horizon, num_envs), false);
        let mut infos = Vec::with_capacity(self.horizon);

        for t in 0..self.horizon {
            let action = select_action(state_t.view(), self.runner.stats().num_steps());
            let step = self.runner.step(&action)?;
            rewards
                .row_mut(t)
                .iter_mut()
                .zip(step.rewards.iter())
                .for_each(|(dst, &r)| *dst = r as f32);
            dones
                .row_mut(t)
                .iter_mut()
                .zip(step.dones.iter())
                .for_each(|(dst, &d)| *dst = d);
            infos.push(step.infos);
            actions.push(action);

            let state_tp1 = self.transform_state(step.states)?;
            states.push(std::mem::replace(&mut state_t, state_tp1));
        }
        states.push(state_t.clone());
        self.state_t = Some(state_t);

        let views = states.iter().map(|s| s.view()).collect::<Vec<_>>();
        // Every state has the shape of the first one, transforms included.
        let states_t_and_tp1 = ndarray::stack(Axis(0), &views)
            .map_err(|e| RunnerError::Configuration(format!("inconsistent state shapes: {}", e)))?;
        for t in self.transforms.iter_mut() {
            t.on_batch_end(true);
        }
        debug!(
            "Collected rollout of {} steps, {} env steps in total",
            self.horizon,
            self.runner.stats().num_steps()
        );

        Ok(Rollout {
            states_t_and_tp1,
            actions,
            rewards,
            dones,
            infos,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::SerialRunner;
    use paac_core::{
        dummy::{DummyEnv, DummyEnvConfig},
        FrameStack, FrameStackConfig, ReplayBuffer, ReplayBufferConfig,
    };

    fn runner(num_envs: usize) -> SerialRunner<DummyEnv> {
        let config = DummyEnvConfig::default().state_dim(3).max_episode_len(4);
        SerialRunner::build(&config, num_envs, 0, 10).unwrap()
    }

    fn zeros(n: usize) -> impl FnMut(ArrayViewD<'_, f32>, usize) -> Actions {
        move |_, _| Actions::Discrete(ndarray::Array1::zeros(n))
    }

    #[test]
    fn test_rollout_shapes() {
        let config = RolloutBatcherConfig::default().batch_size(12);
        let mut batcher = RolloutBatcher::build(&config, runner(4)).unwrap();
        assert_eq!(batcher.horizon(), 3);

        let rollout = batcher.get_batch(zeros(4)).unwrap();
        assert_eq!(rollout.states_t_and_tp1.shape(), &[4, 4, 3]);
        assert_eq!(rollout.state_t().shape(), &[3, 4, 3]);
        assert_eq!(rollout.state_tp1().shape(), &[3, 4, 3]);
        assert_eq!(rollout.rewards.shape(), &[3, 4]);
        assert_eq!(rollout.dones.shape(), &[3, 4]);
        assert_eq!(rollout.actions.len(), 3);
        assert_eq!(rollout.infos.len(), 3);
        assert_eq!(batcher.runner().stats().num_steps(), 12);
    }

    #[test]
    fn test_batches_are_contiguous() {
        let config = RolloutBatcherConfig::default().batch_size(4);
        let mut batcher = RolloutBatcher::build(&config, runner(2)).unwrap();
        let first = batcher.get_batch(zeros(2)).unwrap();
        let second = batcher.get_batch(zeros(2)).unwrap();
        assert_eq!(
            first.states_t_and_tp1.index_axis(Axis(0), 2),
            second.states_t_and_tp1.index_axis(Axis(0), 0)
        );
    }

    #[test]
    fn test_select_action_sees_step_count() {
        let config = RolloutBatcherConfig::default().batch_size(6);
        let mut batcher = RolloutBatcher::build(&config, runner(2)).unwrap();
        let mut seen = vec![];
        batcher
            .get_batch(|s, step| {
                assert_eq!(s.shape(), &[2, 3]);
                seen.push(step);
                Actions::Discrete(ndarray::Array1::zeros(2))
            })
            .unwrap();
        assert_eq!(seen, vec![0, 2, 4]);
    }

    #[test]
    fn test_invalid_batch_size() {
        for batch_size in [0, 7] {
            let config = RolloutBatcherConfig::default().batch_size(batch_size);
            assert!(matches!(
                RolloutBatcher::build(&config, runner(2)),
                Err(RunnerError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_frame_stack_transform() {
        let config = DummyEnvConfig::default().state_dim(1);
        let runner = SerialRunner::<DummyEnv>::build(&config, 2, 0, 10).unwrap();
        let fs_config = FrameStackConfig::default().depth(3);
        let config = RolloutBatcherConfig::default().batch_size(4);
        let mut batcher = RolloutBatcher::build(&config, runner)
            .unwrap()
            .with_transform(FrameStack::new(&fs_config).unwrap());
        let rollout = batcher.get_batch(zeros(2)).unwrap();
        assert_eq!(rollout.states_t_and_tp1.shape(), &[3, 2, 3]);
    }

    #[test]
    fn test_push_into_replay_buffer() {
        let config = RolloutBatcherConfig::default().batch_size(6);
        let mut batcher = RolloutBatcher::build(&config, runner(2)).unwrap();
        let rollout = batcher.get_batch(zeros(2)).unwrap();

        let config = ReplayBufferConfig::default().maxlen(100).num_envs(2);
        let mut buffer = ReplayBuffer::build(&config).unwrap();
        rollout.push_into(&mut buffer).unwrap();
        assert_eq!(buffer.len(), 6);
    }
}
