//! Running mean and standard deviation of states.
use crate::{
    error::{PaacError, Result},
    transform::StateTransform,
};
use log::trace;
use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn};

const EPSILON: f64 = 1e-8;

/// Exact running mean and standard deviation over samples of a fixed shape.
///
/// Samples passed to [`MeanStdFilter::normalize`] or [`MeanStdFilter::scale`]
/// are collected and merged into the statistics only when
/// [`MeanStdFilter::update`] is called, using the parallel variance formula.
#[derive(Debug, Clone)]
pub struct MeanStdFilter {
    shape: Vec<usize>,
    clip_range: f64,
    n: usize,
    mean: Array1<f64>,
    // Sum of squared deviations from the mean.
    m2: Array1<f64>,
    pending: Vec<f64>,
}

impl MeanStdFilter {
    /// Creates a filter for samples of the given shape.
    pub fn new(shape: &[usize], clip_range: f64) -> Result<Self> {
        if clip_range <= 0.0 {
            return Err(PaacError::Configuration(format!(
                "clip_range must be positive, got {}",
                clip_range
            )));
        }
        let len: usize = shape.iter().product();
        Ok(Self {
            shape: shape.to_vec(),
            clip_range,
            n: 0,
            mean: Array1::zeros(len),
            m2: Array1::zeros(len),
            pending: vec![],
        })
    }

    /// Number of samples merged into the statistics.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Element-wise mean, flattened.
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Element-wise sample variance, flattened. Ones until two samples are merged.
    pub fn var(&self) -> Array1<f64> {
        if self.n < 2 {
            Array1::ones(self.m2.len())
        } else {
            &self.m2 / (self.n - 1) as f64
        }
    }

    /// Element-wise standard deviation, flattened.
    pub fn std(&self) -> Array1<f64> {
        self.var().mapv(f64::sqrt)
    }

    /// Merges the collected samples into the statistics.
    pub fn update(&mut self) {
        let len = self.mean.len();
        if self.pending.is_empty() || len == 0 {
            self.pending.clear();
            return;
        }
        let n_new = self.pending.len() / len;
        let x = Array1::from(std::mem::take(&mut self.pending));
        let x = x
            .into_shape((n_new, len))
            .unwrap_or_else(|_| unreachable!());

        let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(len));
        let x_m2 = (&x - &x_mean)
            .mapv(|d| d * d)
            .sum_axis(Axis(0));

        let n_old = self.n;
        self.n += n_new;
        if n_old == 0 {
            self.mean = x_mean;
            self.m2 = x_m2;
        } else {
            let n = self.n as f64;
            let delta = &self.mean - &x_mean;
            let new_mean = (&self.mean * n_old as f64 + &x_mean * n_new as f64) / n;
            self.m2 = &self.m2 + &x_m2 + delta.mapv(|d| d * d) * (n_old as f64 * n_new as f64 / n);
            self.mean = new_mean;
        }
        trace!("MeanStdFilter merged {} samples, n={}", n_new, self.n);
    }

    fn collect(&mut self, x: &ArrayViewD<'_, f32>) -> Result<()> {
        if x.ndim() == 0 || &x.shape()[1..] != self.shape.as_slice() {
            let mut expected = vec![x.shape().first().copied().unwrap_or(0)];
            expected.extend_from_slice(&self.shape);
            return Err(PaacError::Shape {
                expected,
                got: x.shape().to_vec(),
            });
        }
        self.pending.extend(x.iter().map(|&v| v as f64));
        Ok(())
    }

    fn apply(&self, x: &ArrayViewD<'_, f32>, center: bool) -> ArrayD<f32> {
        let std = self.std();
        let len = self.mean.len().max(1);
        let c = self.clip_range;
        let data = x
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let j = i % len;
                let m = if center { self.mean[j] } else { 0.0 };
                ((v as f64 - m) / (std[j] + EPSILON)).clamp(-c, c) as f32
            })
            .collect::<Vec<_>>();
        ArrayD::from_shape_vec(IxDyn(x.shape()), data).unwrap_or_else(|_| unreachable!())
    }

    /// Collects the samples of `x` (axis 0) and returns them normalized and
    /// clipped to `[-clip_range, clip_range]`.
    pub fn normalize(&mut self, x: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
        self.collect(&x)?;
        Ok(self.apply(&x, true))
    }

    /// Normalizes `x` without collecting its samples.
    pub fn normalize_frozen(&self, x: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
        if x.ndim() == 0 || &x.shape()[1..] != self.shape.as_slice() {
            return Err(PaacError::Shape {
                expected: self.shape.clone(),
                got: x.shape()[x.ndim().min(1)..].to_vec(),
            });
        }
        Ok(self.apply(&x, true))
    }

    /// Like [`MeanStdFilter::normalize`], without subtracting the mean.
    pub fn scale(&mut self, x: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
        self.collect(&x)?;
        Ok(self.apply(&x, false))
    }
}

/// State transform normalizing states with a [`MeanStdFilter`].
///
/// The filter is created on the first state, which must be shaped
/// `(num_envs, num_features)`. Statistics are updated at the end of every
/// training batch; evaluation states are normalized but not collected.
#[derive(Debug, Clone)]
pub struct StateNormalizer {
    clip_range: f64,
    filter: Option<MeanStdFilter>,
}

impl StateNormalizer {
    /// Creates a normalizer clipping to `[-clip_range, clip_range]`.
    pub fn new(clip_range: f64) -> Self {
        Self {
            clip_range,
            filter: None,
        }
    }

    /// The underlying filter, once a state has been seen.
    pub fn filter(&self) -> Option<&MeanStdFilter> {
        self.filter.as_ref()
    }
}

impl Default for StateNormalizer {
    fn default() -> Self {
        Self::new(5.0)
    }
}

impl StateTransform for StateNormalizer {
    fn transform_state(
        &mut self,
        state: ArrayViewD<'_, f32>,
        training: bool,
    ) -> Result<ArrayD<f32>> {
        if self.filter.is_none() {
            if state.ndim() != 2 {
                return Err(PaacError::Configuration(format!(
                    "states must have shape (num_envs, num_features), got {:?}",
                    state.shape()
                )));
            }
            self.filter = Some(MeanStdFilter::new(&state.shape()[1..], self.clip_range)?);
        }
        let filter = self.filter.as_mut().unwrap_or_else(|| unreachable!());
        if training {
            filter.normalize(state)
        } else {
            filter.normalize_frozen(state)
        }
    }

    fn on_batch_end(&mut self, training: bool) {
        if training {
            if let Some(filter) = self.filter.as_mut() {
                filter.update();
            }
        }
    }
}
