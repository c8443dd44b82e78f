//! State and action spaces of environments.
//!
//! A [`Space`] is resolved once, when a runner or buffer is built, so the hot
//! loops only ever match on the closed [`Action`]/[`Actions`] variants.
use crate::error::{PaacError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Element type reported by an environment for its space.
///
/// Runners always carry states as `f32` and continuous actions as `f32`,
/// discrete actions as `i64`. The dtype is kept for validation and reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Unsigned byte, typical for image frames.
    U8,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
}

impl Dtype {
    /// Returns `true` for floating point types.
    pub fn is_float(&self) -> bool {
        matches!(self, Dtype::F32 | Dtype::F64)
    }

    /// Returns `true` for integer types.
    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }
}

/// Description of a state or action space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Space {
    /// A box in `R^n`, flattened row-major. `low` and `high` have one entry
    /// per element.
    Continuous {
        /// Shape of a single element of the space.
        shape: Vec<usize>,
        /// Element-wise lower bound.
        low: Vec<f32>,
        /// Element-wise upper bound.
        high: Vec<f32>,
        /// Element type.
        dtype: Dtype,
    },

    /// Integers in `[0, n)`.
    Discrete {
        /// Number of choices.
        n: usize,
        /// Element type.
        dtype: Dtype,
    },
}

impl Space {
    /// Builds a continuous `f32` space, checking that the bounds match the shape.
    pub fn continuous(shape: Vec<usize>, low: Vec<f32>, high: Vec<f32>) -> Result<Self> {
        let n: usize = shape.iter().product();
        if low.len() != n || high.len() != n {
            return Err(PaacError::Configuration(format!(
                "bounds of a continuous space of shape {:?} must have {} elements, \
                 got low={} high={}",
                shape,
                n,
                low.len(),
                high.len()
            )));
        }
        if low.iter().zip(high.iter()).any(|(l, h)| l > h) {
            return Err(PaacError::Configuration(
                "low must not exceed high in a continuous space".to_string(),
            ));
        }
        Ok(Space::Continuous {
            shape,
            low,
            high,
            dtype: Dtype::F32,
        })
    }

    /// Builds a continuous space with the same bounds for every element.
    pub fn uniform_box(shape: Vec<usize>, low: f32, high: f32) -> Result<Self> {
        let n: usize = shape.iter().product();
        Self::continuous(shape, vec![low; n], vec![high; n])
    }

    /// Builds a discrete `i64` space with `n` choices.
    pub fn discrete(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(PaacError::Configuration(
                "a discrete space needs at least one choice".to_string(),
            ));
        }
        Ok(Space::Discrete { n, dtype: Dtype::I64 })
    }

    /// Shape of a single element. Empty for discrete spaces.
    pub fn shape(&self) -> &[usize] {
        match self {
            Space::Continuous { shape, .. } => shape,
            Space::Discrete { .. } => &[],
        }
    }

    /// Number of scalars needed to store a single element.
    pub fn flat_len(&self) -> usize {
        match self {
            Space::Continuous { shape, .. } => shape.iter().product(),
            Space::Discrete { .. } => 1,
        }
    }

    /// Element type.
    pub fn dtype(&self) -> Dtype {
        match self {
            Space::Continuous { dtype, .. } | Space::Discrete { dtype, .. } => *dtype,
        }
    }

    /// Returns `true` for discrete spaces.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Space::Discrete { .. })
    }

    /// Draws a uniformly random element.
    ///
    /// Unbounded continuous dimensions are drawn from `[-1, 1)`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Action {
        match self {
            Space::Continuous { low, high, .. } => Action::Continuous(
                low.iter()
                    .zip(high.iter())
                    .map(|(&l, &h)| {
                        if l == h {
                            l
                        } else if l.is_finite() && h.is_finite() {
                            rng.gen_range(l..h)
                        } else {
                            rng.gen_range(-1.0..1.0)
                        }
                    })
                    .collect(),
            ),
            Space::Discrete { n, .. } => Action::Discrete(rng.gen_range(0..*n) as i64),
        }
    }

    /// Returns `true` if `action` is a member of the space.
    pub fn contains(&self, action: ActionRef<'_>) -> bool {
        match (self, action) {
            (Space::Continuous { low, high, .. }, ActionRef::Continuous(a)) => {
                a.len() == low.len()
                    && a.iter()
                        .zip(low.iter().zip(high.iter()))
                        .all(|(x, (l, h))| l <= x && x <= h)
            }
            (Space::Discrete { n, .. }, ActionRef::Discrete(a)) => a >= 0 && (a as usize) < *n,
            _ => false,
        }
    }
}

/// An action for a single environment.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Flattened continuous action.
    Continuous(Vec<f32>),
    /// Index of a discrete action.
    Discrete(i64),
}

impl Action {
    /// Borrows the action.
    pub fn view(&self) -> ActionRef<'_> {
        match self {
            Action::Continuous(a) => ActionRef::Continuous(a),
            Action::Discrete(a) => ActionRef::Discrete(*a),
        }
    }
}

/// A borrowed action, typically pointing into a runner's shared action array.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActionRef<'a> {
    /// Flattened continuous action.
    Continuous(&'a [f32]),
    /// Index of a discrete action.
    Discrete(i64),
}

impl ActionRef<'_> {
    /// Copies the action.
    pub fn into_action(self) -> Action {
        match self {
            ActionRef::Continuous(a) => Action::Continuous(a.to_vec()),
            ActionRef::Discrete(a) => Action::Discrete(a),
        }
    }
}

/// Actions of all environments of a runner, first dimension `num_envs`.
#[derive(Clone, Debug, PartialEq)]
pub enum Actions {
    /// `(num_envs, flat_action_len)`.
    Continuous(Array2<f32>),
    /// `(num_envs,)`.
    Discrete(Array1<i64>),
}

impl Actions {
    /// All-zero actions for `n` environments.
    pub fn zeros(space: &Space, n: usize) -> Self {
        match space {
            Space::Continuous { .. } => Actions::Continuous(Array2::zeros((n, space.flat_len()))),
            Space::Discrete { .. } => Actions::Discrete(Array1::zeros(n)),
        }
    }

    /// Stacks single-environment actions. All of them must be of the same kind
    /// and length.
    pub fn from_actions(actions: &[Action]) -> Result<Self> {
        match actions.first() {
            None => Err(PaacError::Configuration(
                "cannot stack an empty set of actions".to_string(),
            )),
            Some(Action::Discrete(_)) => actions
                .iter()
                .map(|a| match a {
                    Action::Discrete(x) => Ok(*x),
                    Action::Continuous(_) => Err(PaacError::Configuration(
                        "mixed discrete and continuous actions".to_string(),
                    )),
                })
                .collect::<Result<Vec<_>>>()
                .map(|v| Actions::Discrete(Array1::from(v))),
            Some(Action::Continuous(first)) => {
                let dim = first.len();
                let mut data = Vec::with_capacity(dim * actions.len());
                for a in actions.iter() {
                    match a {
                        Action::Continuous(x) if x.len() == dim => data.extend_from_slice(x),
                        Action::Continuous(x) => {
                            return Err(PaacError::Shape {
                                expected: vec![dim],
                                got: vec![x.len()],
                            })
                        }
                        Action::Discrete(_) => {
                            return Err(PaacError::Configuration(
                                "mixed discrete and continuous actions".to_string(),
                            ))
                        }
                    }
                }
                Array2::from_shape_vec((actions.len(), dim), data)
                    .map(Actions::Continuous)
                    .map_err(|e| PaacError::Configuration(e.to_string()))
            }
        }
    }

    /// Number of environments covered.
    pub fn len(&self) -> usize {
        match self {
            Actions::Continuous(a) => a.nrows(),
            Actions::Discrete(a) => a.len(),
        }
    }

    /// Returns `true` if no environment is covered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the action of the `i`-th environment.
    pub fn get(&self, i: usize) -> Option<Action> {
        if i >= self.len() {
            return None;
        }
        Some(match self {
            Actions::Continuous(a) => Action::Continuous(a.row(i).to_vec()),
            Actions::Discrete(a) => Action::Discrete(a[i]),
        })
    }

    /// Row of the `i`-th environment of continuous actions.
    pub fn continuous_row(&self, i: usize) -> Option<ArrayView1<'_, f32>> {
        match self {
            Actions::Continuous(a) if i < a.nrows() => Some(a.row(i)),
            _ => None,
        }
    }

    /// Checks that the actions cover `n` environments of `space`.
    pub fn check(&self, space: &Space, n: usize) -> Result<()> {
        match (self, space) {
            (Actions::Continuous(a), Space::Continuous { .. }) => {
                let expected = vec![n, space.flat_len()];
                if a.shape() != expected.as_slice() {
                    return Err(PaacError::Shape {
                        expected,
                        got: a.shape().to_vec(),
                    });
                }
                Ok(())
            }
            (Actions::Discrete(a), Space::Discrete { .. }) => {
                if a.len() != n {
                    return Err(PaacError::Shape {
                        expected: vec![n],
                        got: vec![a.len()],
                    });
                }
                Ok(())
            }
            _ => Err(PaacError::Configuration(format!(
                "actions of kind {} do not belong to a {} space",
                if self.is_discrete() { "discrete" } else { "continuous" },
                if space.is_discrete() { "discrete" } else { "continuous" },
            ))),
        }
    }

    /// Returns `true` for discrete actions.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Actions::Discrete(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_continuous_bounds_checked() {
        assert!(Space::continuous(vec![2, 2], vec![0.0; 4], vec![1.0; 4]).is_ok());
        assert!(Space::continuous(vec![2, 2], vec![0.0; 3], vec![1.0; 4]).is_err());
        assert!(Space::continuous(vec![1], vec![1.0], vec![0.0]).is_err());
        assert!(Space::discrete(0).is_err());
    }

    #[test]
    fn test_sample_is_contained() {
        let mut rng = StdRng::seed_from_u64(7);
        let spaces = vec![
            Space::uniform_box(vec![3], -2.0, 2.0).unwrap(),
            Space::discrete(5).unwrap(),
        ];
        for space in spaces.iter() {
            for _ in 0..100 {
                let a = space.sample(&mut rng);
                assert!(space.contains(a.view()));
            }
        }
    }

    #[test]
    fn test_actions_stack_and_check() {
        let space = Space::uniform_box(vec![2], -1.0, 1.0).unwrap();
        let acts = Actions::from_actions(&[
            Action::Continuous(vec![0.1, 0.2]),
            Action::Continuous(vec![0.3, 0.4]),
        ])
        .unwrap();
        assert_eq!(acts.len(), 2);
        assert!(acts.check(&space, 2).is_ok());
        assert!(acts.check(&space, 3).is_err());
        assert_eq!(acts.get(1), Some(Action::Continuous(vec![0.3, 0.4])));

        let discrete = Space::discrete(3).unwrap();
        assert!(acts.check(&discrete, 2).is_err());
        assert!(Actions::from_actions(&[Action::Discrete(1), Action::Continuous(vec![])]).is_err());
    }
}
