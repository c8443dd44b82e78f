//! Runner stepping environments one after another on the calling thread.
use crate::{
    base::{build_envs, Runner, StepResult},
    error::{Command, RunnerError},
    stats::EpisodeStats,
};
use log::info;
use ndarray::{ArrayD, IxDyn};
use paac_core::{Action, Actions, Env, Info, Space};

/// Sequential counterpart of [`ParallelRunner`](crate::ParallelRunner).
///
/// Same semantics, including auto-reset and episode statistics, without
/// threads. Useful for debugging and as a reference. Environment failures are
/// reported as [`RunnerError::WorkerFatal`] from worker 0 and close the runner.
pub struct SerialRunner<E: Env> {
    envs: Vec<E>,
    state_space: Space,
    action_space: Space,
    state_len: usize,
    states: Vec<f32>,
    infos: Vec<Info>,
    stats: EpisodeStats,
    closed: bool,
}

impl<E: Env> SerialRunner<E> {
    /// Builds `num_envs` environments with seeds `seed + i`.
    pub fn build(
        env_config: &E::Config,
        num_envs: usize,
        seed: i64,
        history_len: usize,
    ) -> Result<Self, RunnerError> {
        let (envs, state_space, action_space) = build_envs::<E>(env_config, num_envs, seed)?;
        let state_len = state_space.flat_len();
        info!("Built serial runner with {} environments", num_envs);
        Ok(Self {
            envs,
            state_len,
            states: vec![0.0; num_envs * state_len],
            infos: vec![Info::new(); num_envs],
            state_space,
            action_space,
            stats: EpisodeStats::new(num_envs, history_len),
            closed: false,
        })
    }

    fn check_running(&self) -> Result<(), RunnerError> {
        if self.closed {
            Err(RunnerError::Closed)
        } else {
            Ok(())
        }
    }

    fn fail(&mut self, env: usize, command: Command, e: anyhow::Error) -> RunnerError {
        let _ = self.close();
        RunnerError::WorkerFatal {
            worker: 0,
            env: Some(env),
            command,
            reason: format!("{:#}", e),
        }
    }

    fn states_array(&self) -> ArrayD<f32> {
        let mut shape = vec![self.envs.len()];
        shape.extend_from_slice(self.state_space.shape());
        ArrayD::from_shape_vec(IxDyn(&shape), self.states.clone())
            .unwrap_or_else(|_| unreachable!())
    }
}

impl<E: Env> Runner for SerialRunner<E> {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn state_space(&self) -> &Space {
        &self.state_space
    }

    fn action_space(&self) -> &Space {
        &self.action_space
    }

    fn reset(&mut self) -> Result<ArrayD<f32>, RunnerError> {
        self.check_running()?;
        let l = self.state_len;
        for i in 0..self.envs.len() {
            let state = &mut self.states[i * l..(i + 1) * l];
            if let Err(e) = self.envs[i].reset(state) {
                return Err(self.fail(i, Command::Reset, e));
            }
            self.infos[i].clear();
        }
        self.stats.clear_accumulators();
        Ok(self.states_array())
    }

    fn step(&mut self, actions: &Actions) -> Result<StepResult, RunnerError> {
        self.check_running()?;
        let n = self.envs.len();
        actions.check(&self.action_space, n)?;

        let l = self.state_len;
        let mut rewards = Vec::with_capacity(n);
        let mut dones = Vec::with_capacity(n);
        for i in 0..n {
            let action = actions.get(i).unwrap_or_else(|| unreachable!());
            let state = &mut self.states[i * l..(i + 1) * l];
            let info = &mut self.infos[i];
            info.clear();
            match self.envs[i].step_with_reset(action.view(), state, info) {
                Ok(outcome) => {
                    rewards.push(outcome.reward);
                    dones.push(outcome.done);
                }
                Err(e) => return Err(self.fail(i, Command::Step, e)),
            }
        }
        self.stats.update(&rewards, &dones);

        Ok(StepResult {
            states: self.states_array(),
            rewards,
            dones,
            infos: self.infos.clone(),
        })
    }

    fn sample_random_action(&mut self) -> Result<Actions, RunnerError> {
        self.check_running()?;
        let actions = self
            .envs
            .iter_mut()
            .map(|env| env.sample_random_action())
            .collect::<Vec<Action>>();
        Ok(Actions::from_actions(&actions)?)
    }

    fn stats(&self) -> &EpisodeStats {
        &self.stats
    }

    fn close(&mut self) -> Result<(), RunnerError> {
        if !self.closed {
            self.envs.iter_mut().for_each(|env| env.close());
            self.closed = true;
        }
        Ok(())
    }
}

impl<E: Env> Drop for SerialRunner<E> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
