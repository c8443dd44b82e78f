//! This module is used for tests.
//!
//! [`DummyEnv`] is a small deterministic environment: given the same seed and
//! the same action sequence it produces the same states, rewards and episode
//! boundaries. It can also be told to fail, panic or stall at a given step to
//! exercise the error paths of runners.
use crate::{
    env::{Env, Info, StepOutcome},
    space::{Action, ActionRef, Space},
};
use anyhow::{anyhow, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// Configuration of [`DummyEnv`].
#[derive(Clone, Debug)]
pub struct DummyEnvConfig {
    /// Dimension of the state vector.
    pub state_dim: usize,

    /// Upper bound of the episode length. The actual length is
    /// `max_episode_len - seed % 3`, so that environments with different seeds
    /// finish episodes at different steps.
    pub max_episode_len: usize,

    /// Number of discrete actions, or `None` for a one-dimensional continuous action.
    pub n_actions: Option<usize>,

    /// Returns an error from `step()` when the total number of steps reaches this value.
    pub fail_at_step: Option<usize>,

    /// Panics in `step()` when the total number of steps reaches this value.
    pub panic_at_step: Option<usize>,

    /// Sleeps in `step()` for the given duration when the total number of steps
    /// reaches the value.
    pub stall_at_step: Option<(usize, Duration)>,

    /// Incremented every time an environment is closed.
    pub close_counter: Arc<AtomicUsize>,
}

impl Default for DummyEnvConfig {
    fn default() -> Self {
        Self {
            state_dim: 3,
            max_episode_len: 5,
            n_actions: Some(2),
            fail_at_step: None,
            panic_at_step: None,
            stall_at_step: None,
            close_counter: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl DummyEnvConfig {
    /// Sets the dimension of the state.
    pub fn state_dim(mut self, v: usize) -> Self {
        self.state_dim = v;
        self
    }

    /// Sets the maximum episode length.
    pub fn max_episode_len(mut self, v: usize) -> Self {
        self.max_episode_len = v;
        self
    }

    /// Sets the number of discrete actions; `None` selects a continuous action.
    pub fn n_actions(mut self, v: Option<usize>) -> Self {
        self.n_actions = v;
        self
    }

    /// Makes `step()` fail at the given step.
    pub fn fail_at_step(mut self, v: Option<usize>) -> Self {
        self.fail_at_step = v;
        self
    }

    /// Makes `step()` panic at the given step.
    pub fn panic_at_step(mut self, v: Option<usize>) -> Self {
        self.panic_at_step = v;
        self
    }

    /// Makes `step()` sleep at the given step.
    pub fn stall_at_step(mut self, v: Option<(usize, Duration)>) -> Self {
        self.stall_at_step = v;
        self
    }

    /// Number of environments closed so far.
    pub fn n_closed(&self) -> usize {
        self.close_counter.load(Ordering::SeqCst)
    }
}

/// Deterministic environment for tests.
pub struct DummyEnv {
    config: DummyEnvConfig,
    rng: StdRng,
    state: Vec<f32>,
    episode_len: usize,
    t: usize,
    total_steps: usize,
}

impl Env for DummyEnv {
    type Config = DummyEnvConfig;

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        if config.state_dim == 0 || config.max_episode_len == 0 {
            return Err(anyhow!("state_dim and max_episode_len must be positive"));
        }
        let offset = seed.unsigned_abs() as usize % 3;
        Ok(Self {
            config: config.clone(),
            rng: StdRng::seed_from_u64(seed as u64),
            state: vec![0.0; config.state_dim],
            episode_len: config.max_episode_len.saturating_sub(offset).max(1),
            t: 0,
            total_steps: 0,
        })
    }

    fn state_space(&self) -> Space {
        Space::Continuous {
            shape: vec![self.config.state_dim],
            low: vec![f32::NEG_INFINITY; self.config.state_dim],
            high: vec![f32::INFINITY; self.config.state_dim],
            dtype: crate::Dtype::F32,
        }
    }

    fn action_space(&self) -> Space {
        match self.config.n_actions {
            Some(n) => Space::Discrete {
                n,
                dtype: crate::Dtype::I64,
            },
            None => Space::Continuous {
                shape: vec![1],
                low: vec![-1.0],
                high: vec![1.0],
                dtype: crate::Dtype::F32,
            },
        }
    }

    fn reset(&mut self, state: &mut [f32]) -> Result<()> {
        self.t = 0;
        for x in self.state.iter_mut() {
            *x = self.rng.gen_range(-1.0..1.0);
        }
        state.copy_from_slice(&self.state);
        Ok(())
    }

    fn step(
        &mut self,
        action: ActionRef<'_>,
        next_state: &mut [f32],
        info: &mut Info,
    ) -> Result<StepOutcome> {
        self.t += 1;
        self.total_steps += 1;

        if self.config.fail_at_step == Some(self.total_steps) {
            return Err(anyhow!("injected failure at step {}", self.total_steps));
        }
        if self.config.panic_at_step == Some(self.total_steps) {
            panic!("injected panic at step {}", self.total_steps);
        }
        if let Some((step, duration)) = self.config.stall_at_step {
            if step == self.total_steps {
                std::thread::sleep(duration);
            }
        }

        let a = match action {
            ActionRef::Discrete(a) => a as f32,
            ActionRef::Continuous(a) => a.iter().sum(),
        };
        for x in self.state.iter_mut() {
            *x = 0.9 * *x + 0.1 * a + self.rng.gen_range(-0.01..0.01);
        }
        next_state.copy_from_slice(&self.state);
        info.insert("t".to_string(), self.t as f64);

        Ok(StepOutcome {
            reward: self.state.iter().sum::<f32>() as f64 + 0.01 * self.t as f64,
            done: self.t >= self.episode_len,
        })
    }

    fn sample_random_action(&mut self) -> Action {
        self.action_space().sample(&mut self.rng)
    }

    fn close(&mut self) {
        self.config.close_counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dummy_env_is_deterministic() {
        let config = DummyEnvConfig::default();
        let run = || {
            let mut env = DummyEnv::build(&config, 11).unwrap();
            let mut s = vec![0.0; 3];
            let mut info = Info::new();
            env.reset(&mut s).unwrap();
            let mut out = vec![];
            for _ in 0..12 {
                let o = env
                    .step_with_reset(ActionRef::Discrete(1), &mut s, &mut info)
                    .unwrap();
                out.push((s.clone(), o));
            }
            out
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_dummy_env_episode_len_depends_on_seed() {
        let config = DummyEnvConfig::default().max_episode_len(5);
        let mut env = DummyEnv::build(&config, 1).unwrap();
        let mut s = vec![0.0; 3];
        let mut info = Info::new();
        env.reset(&mut s).unwrap();
        let dones = (0..8)
            .map(|_| {
                env.step_with_reset(ActionRef::Discrete(0), &mut s, &mut info)
                    .unwrap()
                    .done
            })
            .collect::<Vec<_>>();
        assert_eq!(
            dones,
            vec![false, false, false, true, false, false, false, true]
        );
    }
}
