//! Uniform replay buffer.
use super::{
    batch::{ReplayBatch, Transition},
    config::ReplayBufferConfig,
    ExperienceBufferBase,
};
use crate::{
    env::Info,
    error::{PaacError, Result},
    space::{Action, Actions},
};
use log::debug;
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, IxDyn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::ops::Range;

#[derive(Debug, Clone)]
enum ActionStore {
    Continuous { dim: usize, data: Vec<f32> },
    Discrete(Vec<i64>),
}

/// Circular replay buffer with one ring of `maxlen / num_envs` slots per environment.
///
/// Storage is allocated on the first [`add_sample`](ExperienceBufferBase::add_sample),
/// whose shapes fix those of all later samples. Transitions are stored
/// slot-major: the flat index of environment `env` at slot `slot` is
/// `slot * num_envs + env`. As all environments are written together, the
/// populated flat indices are exactly `0..len()`.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    num_envs: usize,

    /// Slots per environment.
    capacity: usize,

    state_shape: Option<Vec<usize>>,
    state_len: usize,
    states: Vec<f32>,
    actions: Option<ActionStore>,
    rewards: Vec<f64>,
    dones: Vec<bool>,

    /// Next slot to be written.
    slot: usize,

    /// Number of populated slots per environment.
    size: usize,

    rng: StdRng,
}

impl ReplayBuffer {
    /// Builds a replay buffer.
    pub fn build(config: &ReplayBufferConfig) -> Result<Self> {
        if config.num_envs == 0 {
            return Err(PaacError::Configuration(
                "num_envs of a replay buffer must be positive".to_string(),
            ));
        }
        let capacity = config.maxlen / config.num_envs;
        if capacity == 0 {
            return Err(PaacError::Configuration(format!(
                "maxlen ({}) must be at least num_envs ({})",
                config.maxlen, config.num_envs
            )));
        }
        debug!(
            "Build replay buffer with {} slots for each of {} environments",
            capacity, config.num_envs
        );

        Ok(Self {
            num_envs: config.num_envs,
            capacity,
            state_shape: None,
            state_len: 0,
            states: vec![],
            actions: None,
            rewards: vec![0.0; capacity * config.num_envs],
            dones: vec![false; capacity * config.num_envs],
            slot: 0,
            size: 0,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Number of environments.
    pub fn num_envs(&self) -> usize {
        self.num_envs
    }

    /// Transitions kept per environment.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Maximum number of transitions over all environments.
    pub fn maxlen(&self) -> usize {
        self.capacity * self.num_envs
    }

    /// Shape of a single state, once the first sample has been added.
    pub fn state_shape(&self) -> Option<&[usize]> {
        self.state_shape.as_deref()
    }

    /// Environment and slot of a flat index.
    pub fn locate(&self, idx: usize) -> (usize, usize) {
        (idx % self.num_envs, idx / self.num_envs)
    }

    /// Reads the transition at a flat index.
    pub fn get(&self, idx: usize) -> Option<Transition> {
        if idx >= self.len() {
            return None;
        }
        let shape = self.state_shape.as_ref()?;
        let state = self.states[idx * self.state_len..(idx + 1) * self.state_len].to_vec();
        let action = match self.actions.as_ref()? {
            ActionStore::Continuous { dim, data } => {
                Action::Continuous(data[idx * dim..(idx + 1) * dim].to_vec())
            }
            ActionStore::Discrete(data) => Action::Discrete(data[idx]),
        };
        Some(Transition {
            state: ArrayD::from_shape_vec(IxDyn(shape), state).ok()?,
            action,
            reward: self.rewards[idx],
            done: self.dones[idx],
            info: Info::new(),
        })
    }

    /// Samples `batch_size` transitions uniformly with replacement.
    ///
    /// Fails if `batch_size` exceeds [`len`](ExperienceBufferBase::len).
    pub fn sample(&mut self, batch_size: usize) -> Result<ReplayBatch> {
        self.check_batch_size(batch_size)?;
        let len = self.len();
        let idxs = (0..batch_size)
            .map(|_| self.rng.gen_range(0..len))
            .collect::<Vec<_>>();
        self.gather(idxs, None)
    }

    pub(super) fn check_batch_size(&self, batch_size: usize) -> Result<()> {
        if self.is_empty() || batch_size > self.len() {
            return Err(PaacError::Sampling(format!(
                "batch size {} exceeds the number of stored transitions {}",
                batch_size,
                self.len()
            )));
        }
        Ok(())
    }

    pub(super) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Collects the transitions at `idxs` into a batch.
    pub(super) fn gather(
        &self,
        idxs: Vec<usize>,
        weights: Option<Vec<f32>>,
    ) -> Result<ReplayBatch> {
        let (shape, actions) = match (self.state_shape.as_ref(), self.actions.as_ref()) {
            (Some(shape), Some(actions)) => (shape, actions),
            _ => {
                return Err(PaacError::Sampling(
                    "the replay buffer is empty".to_string(),
                ))
            }
        };
        let n = idxs.len();
        let l = self.state_len;

        let mut states = Vec::with_capacity(n * l);
        for &i in idxs.iter() {
            states.extend_from_slice(&self.states[i * l..(i + 1) * l]);
        }
        let mut batch_shape = vec![n];
        batch_shape.extend_from_slice(shape);
        let states = ArrayD::from_shape_vec(IxDyn(&batch_shape), states)
            .map_err(|e| PaacError::Sampling(e.to_string()))?;

        let actions = match actions {
            ActionStore::Continuous { dim, data } => {
                let mut v = Vec::with_capacity(n * dim);
                for &i in idxs.iter() {
                    v.extend_from_slice(&data[i * dim..(i + 1) * dim]);
                }
                Actions::Continuous(
                    Array2::from_shape_vec((n, *dim), v)
                        .map_err(|e| PaacError::Sampling(e.to_string()))?,
                )
            }
            ActionStore::Discrete(data) => {
                Actions::Discrete(idxs.iter().map(|&i| data[i]).collect::<Array1<_>>())
            }
        };

        Ok(ReplayBatch {
            states,
            actions,
            rewards: idxs.iter().map(|&i| self.rewards[i]).collect(),
            dones: idxs.iter().map(|&i| self.dones[i]).collect(),
            idxs,
            weights,
        })
    }

    fn allocate(&mut self, state_shape: &[usize], action: &Actions) {
        let n = self.maxlen();
        self.state_len = state_shape.iter().product();
        self.state_shape = Some(state_shape.to_vec());
        self.states = vec![0.0; n * self.state_len];
        self.actions = Some(match action {
            Actions::Continuous(a) => ActionStore::Continuous {
                dim: a.ncols(),
                data: vec![0.0; n * a.ncols()],
            },
            Actions::Discrete(_) => ActionStore::Discrete(vec![0; n]),
        });
        debug!(
            "Allocate replay buffer storage for states of shape {:?}",
            state_shape
        );
    }

    fn check_sample(
        &self,
        state: &ArrayViewD<'_, f32>,
        action: &Actions,
        reward: &[f64],
        done: &[bool],
    ) -> Result<()> {
        let n = self.num_envs;
        if state.ndim() == 0 || state.shape()[0] != n {
            let mut expected = vec![n];
            expected.extend_from_slice(self.state_shape.as_deref().unwrap_or(&[]));
            return Err(PaacError::Shape {
                expected,
                got: state.shape().to_vec(),
            });
        }
        let lens = [
            (action.len(), "actions"),
            (reward.len(), "rewards"),
            (done.len(), "dones"),
        ];
        for (len, what) in lens {
            if len != n {
                return Err(PaacError::Configuration(format!(
                    "expected {} for {} environments, got {}",
                    what, n, len
                )));
            }
        }
        if let Some(shape) = self.state_shape.as_ref() {
            if &state.shape()[1..] != shape.as_slice() {
                let mut expected = vec![n];
                expected.extend_from_slice(shape);
                return Err(PaacError::Shape {
                    expected,
                    got: state.shape().to_vec(),
                });
            }
        }
        match (self.actions.as_ref(), action) {
            (None, _)
            | (Some(ActionStore::Discrete(_)), Actions::Discrete(_)) => Ok(()),
            (Some(ActionStore::Continuous { dim, .. }), Actions::Continuous(a)) => {
                if a.ncols() == *dim {
                    Ok(())
                } else {
                    Err(PaacError::Shape {
                        expected: vec![n, *dim],
                        got: a.shape().to_vec(),
                    })
                }
            }
            _ => Err(PaacError::Configuration(
                "action kind differs from the one of previously added samples".to_string(),
            )),
        }
    }

    /// Writes one transition per environment and returns the flat indices written.
    pub(super) fn push(
        &mut self,
        state: ArrayViewD<'_, f32>,
        action: &Actions,
        reward: &[f64],
        done: &[bool],
    ) -> Result<Range<usize>> {
        self.check_sample(&state, action, reward, done)?;
        if self.state_shape.is_none() {
            self.allocate(&state.shape()[1..], action);
        }

        let n = self.num_envs;
        let ixs = self.slot * n..(self.slot + 1) * n;
        let l = self.state_len;
        self.states[ixs.start * l..ixs.end * l]
            .iter_mut()
            .zip(state.iter())
            .for_each(|(dst, src)| *dst = *src);
        match (self.actions.as_mut(), action) {
            (Some(ActionStore::Continuous { dim, data }), Actions::Continuous(a)) => {
                let d = *dim;
                data[ixs.start * d..ixs.end * d]
                    .iter_mut()
                    .zip(a.iter())
                    .for_each(|(dst, src)| *dst = *src);
            }
            (Some(ActionStore::Discrete(data)), Actions::Discrete(a)) => {
                data[ixs.clone()]
                    .iter_mut()
                    .zip(a.iter())
                    .for_each(|(dst, src)| *dst = *src);
            }
            _ => unreachable!(),
        }
        self.rewards[ixs.clone()].copy_from_slice(reward);
        self.dones[ixs.clone()].copy_from_slice(done);

        self.slot = (self.slot + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        Ok(ixs)
    }
}

impl ExperienceBufferBase for ReplayBuffer {
    fn add_sample(
        &mut self,
        state: ArrayViewD<'_, f32>,
        action: &Actions,
        reward: &[f64],
        done: &[bool],
    ) -> Result<()> {
        self.push(state, action, reward, done).map(|_| ())
    }

    fn len(&self) -> usize {
        self.size * self.num_envs
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Axis;
    use std::collections::VecDeque;

    type Sample = (ArrayD<f32>, Actions, Vec<f64>, Vec<bool>);

    fn sample_at(i: usize, num_envs: usize, shape: &[usize]) -> Sample {
        let mut full = vec![num_envs];
        full.extend_from_slice(shape);
        let s = ArrayD::from_shape_fn(IxDyn(&full), |ix| (i * 1000 + ix[0]) as f32);
        let a = Actions::Discrete(Array1::from_shape_fn(num_envs, |e| (i * 10 + e) as i64));
        let r = (0..num_envs).map(|e| (i * 100 + e) as f64).collect();
        let d = (0..num_envs).map(|_| i % 10 == 0).collect();
        (s, a, r, d)
    }

    #[test]
    fn test_keeps_newest_per_env() {
        for &num_envs in &[1usize, 4] {
            let maxlen = 100;
            let shape = [1, 3, 2];
            let mut buffer = ReplayBuffer::build(
                &ReplayBufferConfig::default().maxlen(maxlen).num_envs(num_envs),
            )
            .unwrap();
            let capacity = maxlen / num_envs;
            let mut memory: Vec<VecDeque<(f64, bool, i64)>> = vec![VecDeque::new(); num_envs];

            for i in 0..(maxlen * 3 / 2 / num_envs) {
                let (s, a, r, d) = sample_at(i, num_envs, &shape);
                buffer.add_sample(s.view(), &a, &r, &d).unwrap();
                for env in 0..num_envs {
                    memory[env].push_back((r[env], d[env], (i * 10 + env) as i64));
                    if memory[env].len() > capacity {
                        memory[env].pop_front();
                    }
                }
                assert!(buffer.len() <= maxlen);
            }
            assert_eq!(buffer.len(), capacity * num_envs);

            // Every stored transition is one of the newest `capacity` of its env.
            for idx in 0..buffer.len() {
                let (env, _) = buffer.locate(idx);
                let t = buffer.get(idx).unwrap();
                let a = match t.action {
                    Action::Discrete(a) => a,
                    _ => unreachable!(),
                };
                assert!(memory[env].contains(&(t.reward, t.done, a)));
            }
            // And every one of them is stored.
            for env in 0..num_envs {
                for entry in memory[env].iter() {
                    assert!((0..buffer.len()).any(|idx| {
                        let t = buffer.get(idx).unwrap();
                        buffer.locate(idx).0 == env && t.reward == entry.0
                    }));
                }
            }
        }
    }

    #[test]
    fn test_sample_fields_are_consistent() {
        let num_envs = 4;
        let mut buffer = ReplayBuffer::build(
            &ReplayBufferConfig::default().maxlen(40).num_envs(num_envs).seed(3),
        )
        .unwrap();
        for i in 0..25 {
            let (s, a, r, d) = sample_at(i, num_envs, &[2]);
            buffer.add_sample(s.view(), &a, &r, &d).unwrap();
        }

        let batch = buffer.sample(32).unwrap();
        assert_eq!(batch.len(), 32);
        assert_eq!(batch.states.shape(), &[32, 2]);
        assert!(batch.weights.is_none());
        for (k, &idx) in batch.idxs.iter().enumerate() {
            assert!(idx < buffer.len());
            let t = buffer.get(idx).unwrap();
            assert_eq!(batch.states.index_axis(Axis(0), k), t.state.view());
            assert_eq!(batch.actions.get(k), Some(t.action));
            assert_eq!(batch.rewards[k], t.reward);
            assert_eq!(batch.dones[k], t.done);

            // Reward encodes (step, env).
            let (env, _) = buffer.locate(idx);
            assert_eq!(t.reward as usize % 100, env);
        }
    }

    #[test]
    fn test_sampling_errors() {
        let mut buffer =
            ReplayBuffer::build(&ReplayBufferConfig::default().maxlen(10).num_envs(2)).unwrap();
        assert!(matches!(buffer.sample(1), Err(PaacError::Sampling(_))));

        let (s, a, r, d) = sample_at(0, 2, &[1]);
        buffer.add_sample(s.view(), &a, &r, &d).unwrap();
        assert!(buffer.sample(2).is_ok());
        assert!(matches!(buffer.sample(3), Err(PaacError::Sampling(_))));
    }

    #[test]
    fn test_shape_checks() {
        assert!(ReplayBuffer::build(&ReplayBufferConfig::default().maxlen(3).num_envs(4)).is_err());

        let mut buffer =
            ReplayBuffer::build(&ReplayBufferConfig::default().maxlen(10).num_envs(2)).unwrap();
        let (s, a, r, d) = sample_at(0, 2, &[3]);
        buffer.add_sample(s.view(), &a, &r, &d).unwrap();

        let (s, a, r, d) = sample_at(1, 2, &[4]);
        assert!(matches!(
            buffer.add_sample(s.view(), &a, &r, &d),
            Err(PaacError::Shape { .. })
        ));
        let (s, a, r, d) = sample_at(1, 3, &[3]);
        assert!(buffer.add_sample(s.view(), &a, &r, &d).is_err());

        let (s, _, r, d) = sample_at(1, 2, &[3]);
        let a = Actions::Continuous(Array2::zeros((2, 1)));
        assert!(buffer.add_sample(s.view(), &a, &r, &d).is_err());
    }
}
