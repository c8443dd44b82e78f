//! Prioritized replay buffer.
use super::{
    base::ReplayBuffer,
    batch::{ReplayBatch, Transition},
    config::{PrioritizedReplayBufferConfig, WeightNormalizer},
    sum_tree::SumTree,
    ExperienceBufferBase,
};
use crate::{
    error::{PaacError, Result},
    schedule::Schedule,
    space::Actions,
};
use log::{debug, trace};
use ndarray::ArrayViewD;
use rand::Rng;
use segment_tree::{ops::MinIgnoreNaN, SegmentPoint};

/// Replay buffer sampling transitions proportionally to `priority^alpha`.
///
/// New transitions get the largest priority seen so far (1 initially), so
/// each is likely to be sampled at least once before its priority is
/// updated. `alpha = pr_factor(step)` and `beta = is_factor(step)` are
/// evaluated at every call to [`sample`](Self::sample); when `alpha`
/// changes, the sum tree is rebuilt from the raw priorities.
///
/// A rebuild costs `O(maxlen)` and reallocates the min tree. With an
/// annealed `pr_factor` this happens on every call to `sample` until the
/// schedule settles, e.g. after `t1` of a linear schedule. Prefer a constant
/// or piecewise constant `pr_factor` when sampling is on a hot path.
///
/// The importance-sampling weight of transition `i` is
/// $w_i = (N \cdot P(i))^{-\beta}$ with $N$ = [`len`](ExperienceBufferBase::len),
/// normalized by the largest weight in the batch ([`WeightNormalizer::Batch`])
/// or in the whole buffer ([`WeightNormalizer::All`]).
pub struct PrioritizedReplayBuffer {
    replay: ReplayBuffer,
    pr_factor: Schedule,
    is_factor: Schedule,
    epsilon: f32,
    normalize: WeightNormalizer,

    /// Raw priorities, indexed like the underlying replay buffer.
    priorities: Vec<f32>,
    max_pr: f32,

    /// Exponent the trees are built with.
    alpha: f64,
    sum_tree: SumTree,
    min_tree: SegmentPoint<f32, MinIgnoreNaN>,
}

impl PrioritizedReplayBuffer {
    /// Builds a prioritized replay buffer.
    pub fn build(config: &PrioritizedReplayBufferConfig) -> Result<Self> {
        config.pr_factor.validate()?;
        config.is_factor.validate()?;
        if config.epsilon.is_nan() || config.epsilon < 0.0 {
            return Err(PaacError::Configuration(format!(
                "epsilon must be non-negative, got {}",
                config.epsilon
            )));
        }
        let replay = ReplayBuffer::build(&config.replay)?;
        let n = replay.maxlen();
        let alpha = config.pr_factor.value(0);
        debug!(
            "Build prioritized replay buffer, maxlen={}, alpha(0)={}",
            n, alpha
        );

        Ok(Self {
            replay,
            pr_factor: config.pr_factor.clone(),
            is_factor: config.is_factor.clone(),
            epsilon: config.epsilon,
            normalize: config.normalize,
            priorities: vec![0.0; n],
            max_pr: 1.0,
            alpha,
            sum_tree: SumTree::new(n),
            min_tree: SegmentPoint::build(vec![f32::MAX; n], MinIgnoreNaN),
        })
    }

    /// Value of the priority exponent at `step`.
    pub fn get_pr_factor(&self, step: usize) -> f64 {
        self.pr_factor.value(step)
    }

    /// Value of the importance-sampling exponent at `step`.
    pub fn get_is_factor(&self, step: usize) -> f64 {
        self.is_factor.value(step)
    }

    /// The underlying uniform buffer.
    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }

    /// Reads the transition at a flat index.
    pub fn get(&self, idx: usize) -> Option<Transition> {
        self.replay.get(idx)
    }

    /// Raw priority of the transition at a flat index.
    pub fn priority(&self, idx: usize) -> Option<f32> {
        if idx < self.len() {
            Some(self.priorities[idx])
        } else {
            None
        }
    }

    /// Largest priority seen so far.
    pub fn max_priority(&self) -> f32 {
        self.max_pr
    }

    /// Sampling probability of the transition at a flat index under the
    /// current exponent.
    pub fn probability(&self, idx: usize) -> Option<f64> {
        if idx < self.len() && self.sum_tree.total() > 0.0 {
            Some(self.sum_tree.get(idx) / self.sum_tree.total())
        } else {
            None
        }
    }

    #[inline]
    fn mass(&self, p: f32) -> f64 {
        (p as f64).powf(self.alpha)
    }

    /// Leaf of the min tree for a given mass. Transitions without mass are
    /// never sampled and must not bound the weights.
    #[inline]
    fn min_leaf(m: f64) -> f32 {
        if m > 0.0 {
            (m as f32).max(f32::MIN_POSITIVE)
        } else {
            f32::MAX
        }
    }

    fn set_priority(&mut self, idx: usize, p: f32) {
        self.priorities[idx] = p;
        let m = self.mass(p);
        self.sum_tree.set(idx, m);
        self.min_tree.modify(idx, Self::min_leaf(m));
    }

    fn set_alpha(&mut self, alpha: f64) {
        if alpha == self.alpha {
            return;
        }
        trace!("Rebuild sum tree for alpha={}", alpha);
        self.alpha = alpha;
        let len = self.len();
        let masses = self.priorities[..len]
            .iter()
            .map(|&p| (p as f64).powf(alpha))
            .collect::<Vec<_>>();
        self.sum_tree.rebuild(masses.iter().copied());
        let mut mins = masses.iter().map(|&m| Self::min_leaf(m)).collect::<Vec<_>>();
        mins.resize(self.priorities.len(), f32::MAX);
        self.min_tree = SegmentPoint::build(mins, MinIgnoreNaN);
    }

    /// Samples `batch_size` transitions with replacement, with probability
    /// proportional to `priority^pr_factor(step)`.
    ///
    /// The batch carries importance-sampling weights with exponent
    /// `is_factor(step)`, all in `(0, 1]`.
    pub fn sample(&mut self, batch_size: usize, step: usize) -> Result<ReplayBatch> {
        self.replay.check_batch_size(batch_size)?;
        self.set_alpha(self.get_pr_factor(step));
        let beta = self.get_is_factor(step);

        let total = self.sum_tree.total();
        if total <= 0.0 || !total.is_finite() {
            return Err(PaacError::Sampling(format!(
                "total priority mass is {}",
                total
            )));
        }
        let idxs = {
            let sum_tree = &self.sum_tree;
            let rng = self.replay.rng();
            (0..batch_size)
                .map(|_| sum_tree.find(rng.gen::<f64>() * total))
                .collect::<Vec<_>>()
        };

        let n = self.len() as f64;
        let weights = idxs
            .iter()
            .map(|&i| (n * self.sum_tree.get(i) / total).powf(-beta))
            .collect::<Vec<_>>();
        let w_max = match self.normalize {
            WeightNormalizer::Batch => weights.iter().cloned().fold(f64::MIN, f64::max),
            WeightNormalizer::All => {
                let p_min = self.min_tree.query(0, self.len()) as f64 / total;
                (n * p_min).powf(-beta)
            }
        };
        let weights = weights
            .iter()
            .map(|w| (w / w_max).min(1.0) as f32)
            .collect();

        self.replay.gather(idxs, Some(weights))
    }

    /// Overwrites the priorities of the transitions at `idxs`.
    ///
    /// The stored priority is `|pr| + epsilon`. All indices are validated
    /// before any priority is changed.
    pub fn update_pr(&mut self, idxs: &[usize], prs: &[f32]) -> Result<()> {
        if idxs.len() != prs.len() {
            return Err(PaacError::Sampling(format!(
                "got {} indices and {} priorities",
                idxs.len(),
                prs.len()
            )));
        }
        let len = self.len();
        if let Some(&ix) = idxs.iter().find(|&&ix| ix >= len) {
            return Err(PaacError::Sampling(format!(
                "index {} is not a stored transition (len={})",
                ix, len
            )));
        }
        if let Some(pr) = prs.iter().find(|pr| !pr.is_finite()) {
            return Err(PaacError::Sampling(format!("priority {} is not finite", pr)));
        }

        for (&ix, &pr) in idxs.iter().zip(prs.iter()) {
            let p = pr.abs() + self.epsilon;
            self.max_pr = self.max_pr.max(p);
            self.set_priority(ix, p);
        }
        Ok(())
    }
}

impl ExperienceBufferBase for PrioritizedReplayBuffer {
    fn add_sample(
        &mut self,
        state: ArrayViewD<'_, f32>,
        action: &Actions,
        reward: &[f64],
        done: &[bool],
    ) -> Result<()> {
        let ixs = self.replay.push(state, action, reward, done)?;
        let p = self.max_pr;
        for ix in ixs {
            self.set_priority(ix, p);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.replay.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{replay_buffer::ReplayBufferConfig, schedule::linear_schedule};
    use ndarray::{Array1, ArrayD, IxDyn};

    fn build(
        maxlen: usize,
        num_envs: usize,
        alpha: f64,
        normalize: WeightNormalizer,
    ) -> PrioritizedReplayBuffer {
        PrioritizedReplayBuffer::build(
            &PrioritizedReplayBufferConfig::default()
                .replay(ReplayBufferConfig::default().maxlen(maxlen).num_envs(num_envs).seed(7))
                .pr_factor(Schedule::Constant(alpha))
                .is_factor(Schedule::Constant(1.0))
                .epsilon(0.0)
                .normalize(normalize),
        )
        .unwrap()
    }

    fn fill(buffer: &mut PrioritizedReplayBuffer, steps: usize, num_envs: usize) {
        for i in 0..steps {
            let s = ArrayD::from_elem(IxDyn(&[num_envs, 2]), i as f32);
            let a = Actions::Discrete(Array1::zeros(num_envs));
            buffer
                .add_sample(s.view(), &a, &vec![i as f64; num_envs], &vec![false; num_envs])
                .unwrap();
        }
    }

    #[test]
    fn test_new_samples_get_max_priority() {
        let mut buffer = build(8, 2, 0.6, WeightNormalizer::Batch);
        fill(&mut buffer, 1, 2);
        assert_eq!(buffer.priority(0), Some(1.0));
        buffer.update_pr(&[0], &[-3.0]).unwrap();
        assert_eq!(buffer.max_priority(), 3.0);
        fill(&mut buffer, 1, 2);
        assert_eq!(buffer.priority(2), Some(3.0));
        assert_eq!(buffer.priority(3), Some(3.0));
        assert_eq!(buffer.priority(4), None);
    }

    #[test]
    fn test_sampling_frequency_follows_priorities() {
        let alpha = 0.7;
        let mut buffer = build(4, 1, alpha, WeightNormalizer::Batch);
        fill(&mut buffer, 4, 1);
        let prs = [0.5f32, 1.0, 2.0, 4.0];
        buffer.update_pr(&[0, 1, 2, 3], &prs).unwrap();

        let n_samples = 200_000;
        let mut counts = [0usize; 4];
        for _ in 0..(n_samples / 4) {
            let batch = buffer.sample(4, 0).unwrap();
            assert!(batch.weights.unwrap().iter().all(|&w| w > 0.0 && w <= 1.0));
            for &ix in batch.idxs.iter() {
                counts[ix] += 1;
            }
        }
        let z: f64 = prs.iter().map(|&p| (p as f64).powf(alpha)).sum();
        for (ix, &p) in prs.iter().enumerate() {
            let expected = (p as f64).powf(alpha) / z;
            let freq = counts[ix] as f64 / n_samples as f64;
            assert!((freq - expected).abs() < 0.01, "{}: {} vs {}", ix, freq, expected);
        }
    }

    #[test]
    fn test_weight_normalization() {
        let mut buffer = build(4, 1, 1.0, WeightNormalizer::All);
        fill(&mut buffer, 4, 1);
        buffer.update_pr(&[0, 1, 2, 3], &[1.0, 1.0, 1.0, 5.0]).unwrap();

        // With beta = 1, w_i = 1 / (N P(i)); the rarest transition has weight 1.
        for _ in 0..20 {
            let batch = buffer.sample(2, 0).unwrap();
            for (&ix, &w) in batch.idxs.iter().zip(batch.weights.as_ref().unwrap()) {
                let expected = if ix == 3 { 0.2 } else { 1.0 };
                assert!((w - expected).abs() < 1e-5);
            }
        }

        let mut buffer = build(4, 1, 1.0, WeightNormalizer::Batch);
        fill(&mut buffer, 4, 1);
        buffer.update_pr(&[0, 1, 2, 3], &[1.0, 1.0, 1.0, 5.0]).unwrap();
        let batch = buffer.sample(3, 0).unwrap();
        let w = batch.weights.unwrap();
        assert!((w.iter().cloned().fold(0.0, f32::max) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_priority_does_not_bound_weights() {
        // epsilon is 0, so transition 0 has no mass and is never sampled.
        let mut buffer = build(4, 1, 1.0, WeightNormalizer::All);
        fill(&mut buffer, 4, 1);
        buffer.update_pr(&[0, 1, 2, 3], &[0.0, 1.0, 2.0, 3.0]).unwrap();

        // p_min = 1/6 over the transitions with mass, so w_i = p_min / P(i).
        for _ in 0..20 {
            let batch = buffer.sample(4, 0).unwrap();
            for (&ix, &w) in batch.idxs.iter().zip(batch.weights.as_ref().unwrap()) {
                assert_ne!(ix, 0);
                assert!((w - 1.0 / ix as f32).abs() < 1e-5, "{}: {}", ix, w);
            }
        }

        // Same after the trees are rebuilt for a new exponent.
        let mut buffer = PrioritizedReplayBuffer::build(
            &PrioritizedReplayBufferConfig::default()
                .replay(ReplayBufferConfig::default().maxlen(4).num_envs(1))
                .pr_factor(linear_schedule(1.0, 2.0, 10))
                .is_factor(Schedule::Constant(1.0))
                .epsilon(0.0)
                .normalize(WeightNormalizer::All),
        )
        .unwrap();
        fill(&mut buffer, 4, 1);
        buffer.update_pr(&[0, 1, 2, 3], &[0.0, 1.0, 2.0, 3.0]).unwrap();
        let batch = buffer.sample(4, 10).unwrap();
        let w = batch.weights.unwrap();
        assert!(w.iter().all(|&w| w > 0.0 && w <= 1.0), "{:?}", w);
    }

    #[test]
    fn test_alpha_schedule_rebuilds_tree() {
        let mut buffer = PrioritizedReplayBuffer::build(
            &PrioritizedReplayBufferConfig::default()
                .replay(ReplayBufferConfig::default().maxlen(2).num_envs(1))
                .pr_factor(linear_schedule(0.0, 1.0, 100))
                .epsilon(0.0),
        )
        .unwrap();
        fill(&mut buffer, 2, 1);
        buffer.update_pr(&[0, 1], &[1.0, 3.0]).unwrap();

        buffer.sample(1, 0).unwrap();
        assert!((buffer.probability(1).unwrap() - 0.5).abs() < 1e-12);
        buffer.sample(1, 100).unwrap();
        assert!((buffer.probability(1).unwrap() - 0.75).abs() < 1e-12);
        assert_eq!(buffer.get_pr_factor(50), 0.5);
    }

    #[test]
    fn test_invalid_updates() {
        let mut buffer = build(8, 2, 0.6, WeightNormalizer::Batch);
        fill(&mut buffer, 2, 2);
        assert!(matches!(
            buffer.update_pr(&[0, 4], &[1.0, 1.0]),
            Err(PaacError::Sampling(_))
        ));
        // Nothing changed by the rejected update.
        assert_eq!(buffer.priority(0), Some(1.0));
        assert!(buffer.update_pr(&[0], &[1.0, 2.0]).is_err());
        assert!(matches!(buffer.sample(5, 0), Err(PaacError::Sampling(_))));
    }
}
