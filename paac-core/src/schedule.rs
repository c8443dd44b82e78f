//! Step-indexed schedules of scalar hyperparameters.
//!
//! Schedules are stateless: the value at a step depends on the step only. They
//! are used for the priority and importance-sampling exponents of
//! [`PrioritizedReplayBuffer`](crate::PrioritizedReplayBuffer) and can be
//! stored in YAML configuration files.
use crate::error::{PaacError, Result};
use serde::{Deserialize, Serialize};

/// A schedule of a scalar value over training steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Schedule {
    /// The same value at every step.
    Constant(f64),

    /// `v0` up to step `t0`, linear to `v1` at step `t1`, `v1` afterwards.
    Linear {
        /// Initial value.
        v0: f64,
        /// Final value.
        v1: f64,
        /// Step where the interpolation starts.
        t0: usize,
        /// Step where the final value is reached.
        t1: usize,
    },

    /// Consecutive linear segments. Segment `i` goes from `values[i]` to
    /// `values[i + 1]` between `boundaries[i - 1]` (or 0) and `boundaries[i]`.
    PiecewiseLinear {
        /// `boundaries.len() + 1` values.
        values: Vec<f64>,
        /// Increasing steps.
        boundaries: Vec<usize>,
    },

    /// `values[i]` for the first `i` with `step <= boundaries[i]`, the last
    /// value beyond the last boundary.
    PiecewiseConst {
        /// `boundaries.len() + 1` values.
        values: Vec<f64>,
        /// Increasing steps.
        boundaries: Vec<usize>,
    },
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Constant(1.0)
    }
}

/// Linear schedule from `v0` at step 0 to `v1` at step `t1`.
pub fn linear_schedule(v0: f64, v1: f64, t1: usize) -> Schedule {
    linear_schedule_from(v0, v1, t1, 0)
}

/// Linear schedule from `v0` at step `t0` to `v1` at step `t1`.
pub fn linear_schedule_from(v0: f64, v1: f64, t1: usize, t0: usize) -> Schedule {
    Schedule::Linear { v0, v1, t0, t1 }
}

/// Junction of linear schedules through `values` at `[0, boundaries..]`.
pub fn piecewise_linear_schedule(values: Vec<f64>, boundaries: Vec<usize>) -> Result<Schedule> {
    let schedule = Schedule::PiecewiseLinear { values, boundaries };
    schedule.validate()?;
    Ok(schedule)
}

/// Piecewise constant schedule.
pub fn piecewise_const_schedule(values: Vec<f64>, boundaries: Vec<usize>) -> Result<Schedule> {
    let schedule = Schedule::PiecewiseConst { values, boundaries };
    schedule.validate()?;
    Ok(schedule)
}

fn interpolate(v0: f64, v1: f64, t0: usize, t1: usize, step: usize) -> f64 {
    if step >= t1 {
        v1
    } else if step <= t0 {
        v0
    } else {
        v0 + (v1 - v0) * (step - t0) as f64 / (t1 - t0) as f64
    }
}

impl Schedule {
    /// Checks the shape of piecewise schedules.
    ///
    /// Schedules deserialized from files should be validated before use;
    /// [`Schedule::value`] falls back to the last value on malformed input.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Constant(_) => Ok(()),
            Self::Linear { t0, t1, .. } => {
                if t1 < t0 {
                    return Err(PaacError::Configuration(format!(
                        "linear schedule ends (t1={}) before it starts (t0={})",
                        t1, t0
                    )));
                }
                Ok(())
            }
            Self::PiecewiseLinear { values, boundaries }
            | Self::PiecewiseConst { values, boundaries } => {
                if values.len() != boundaries.len() + 1 {
                    return Err(PaacError::Configuration(format!(
                        "piecewise schedule needs {} values for {} boundaries, got {}",
                        boundaries.len() + 1,
                        boundaries.len(),
                        values.len()
                    )));
                }
                if boundaries.windows(2).any(|w| w[0] > w[1]) {
                    return Err(PaacError::Configuration(
                        "boundaries of a piecewise schedule must be non-decreasing".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Value at `step`.
    pub fn value(&self, step: usize) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Linear { v0, v1, t0, t1 } => interpolate(*v0, *v1, *t0, *t1, step),
            Self::PiecewiseLinear { values, boundaries } => {
                let mut start = 0;
                for (i, &bound) in boundaries.iter().enumerate() {
                    if step <= bound {
                        return interpolate(values[i], values[i + 1], start, bound, step);
                    }
                    start = bound;
                }
                values.last().copied().unwrap_or(0.0)
            }
            Self::PiecewiseConst { values, boundaries } => boundaries
                .iter()
                .position(|&bound| step <= bound)
                .and_then(|i| values.get(i))
                .or_else(|| values.last())
                .copied()
                .unwrap_or(0.0),
        }
    }
}
