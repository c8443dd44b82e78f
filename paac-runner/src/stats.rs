//! Episode statistics aggregated by runners.
use log::trace;
use std::collections::VecDeque;

/// Per-environment return and length accumulators and a bounded history of
/// finished episodes.
#[derive(Clone, Debug)]
pub struct EpisodeStats {
    history_len: usize,
    num_steps: usize,
    num_episodes: usize,
    returns_acc: Vec<f64>,
    lengths_acc: Vec<usize>,
    returns: VecDeque<f64>,
    lengths: VecDeque<usize>,
}

impl EpisodeStats {
    /// Creates statistics for `num_envs` environments keeping the last
    /// `history_len` finished episodes.
    pub fn new(num_envs: usize, history_len: usize) -> Self {
        Self {
            history_len,
            num_steps: 0,
            num_episodes: 0,
            returns_acc: vec![0.0; num_envs],
            lengths_acc: vec![0; num_envs],
            returns: VecDeque::with_capacity(history_len),
            lengths: VecDeque::with_capacity(history_len),
        }
    }

    /// Accounts for one step of every environment.
    pub fn update(&mut self, rewards: &[f64], dones: &[bool]) {
        debug_assert_eq!(rewards.len(), self.returns_acc.len());
        self.num_steps += rewards.len();
        for (env, (&r, &d)) in rewards.iter().zip(dones.iter()).enumerate() {
            self.returns_acc[env] += r;
            self.lengths_acc[env] += 1;
            if d {
                let (ret, len) = (self.returns_acc[env], self.lengths_acc[env]);
                trace!("Env {} finished an episode: return={}, length={}", env, ret, len);
                self.push_episode(ret, len);
                self.returns_acc[env] = 0.0;
                self.lengths_acc[env] = 0;
            }
        }
    }

    fn push_episode(&mut self, ret: f64, len: usize) {
        self.num_episodes += 1;
        if self.history_len == 0 {
            return;
        }
        if self.returns.len() == self.history_len {
            self.returns.pop_front();
            self.lengths.pop_front();
        }
        self.returns.push_back(ret);
        self.lengths.push_back(len);
    }

    /// Discards the episodes in progress, e.g. after a reset.
    pub fn clear_accumulators(&mut self) {
        self.returns_acc.iter_mut().for_each(|x| *x = 0.0);
        self.lengths_acc.iter_mut().for_each(|x| *x = 0);
    }

    /// Total number of environment steps, summed over environments.
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Number of finished episodes.
    pub fn num_episodes(&self) -> usize {
        self.num_episodes
    }

    /// Returns of the most recent finished episodes, oldest first.
    pub fn returns(&self) -> &VecDeque<f64> {
        &self.returns
    }

    /// Lengths of the most recent finished episodes, oldest first.
    pub fn lengths(&self) -> &VecDeque<usize> {
        &self.lengths
    }

    /// Mean return of the last `last_k` finished episodes in the history.
    pub fn mean_return(&self, last_k: usize) -> Option<f64> {
        let k = last_k.min(self.returns.len());
        if k == 0 {
            return None;
        }
        Some(self.returns.iter().rev().take(k).sum::<f64>() / k as f64)
    }

    /// Mean length of the last `last_k` finished episodes in the history.
    pub fn mean_length(&self, last_k: usize) -> Option<f64> {
        let k = last_k.min(self.lengths.len());
        if k == 0 {
            return None;
        }
        Some(self.lengths.iter().rev().take(k).sum::<usize>() as f64 / k as f64)
    }
}
