//! Return and advantage estimators over rollouts.
//!
//! All arrays are shaped `(horizon, num_envs)`, time first. A `done` flag at
//! step `t` means the episode ended with the transition taken at `t`, so no
//! value flows back across it.
use crate::error::{PaacError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

fn check_shape(name: &str, expected: &[usize], got: &[usize]) -> Result<()> {
    if expected != got {
        log::debug!("{} has shape {:?}, expected {:?}", name, got, expected);
        return Err(PaacError::Shape {
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}

/// Discounted sum of rewards, reset at episode boundaries.
///
/// When `last_values` is given, environments whose last step is not terminal
/// bootstrap from it: the return at the last step is `r + gamma * v`.
pub fn discounted_sum_rewards(
    rewards: ArrayView2<'_, f32>,
    dones: ArrayView2<'_, bool>,
    last_values: Option<ArrayView1<'_, f32>>,
    gamma: f32,
) -> Result<Array2<f32>> {
    check_shape("dones", rewards.shape(), dones.shape())?;
    let num_envs = rewards.ncols();
    let mut acc = match last_values {
        Some(v) => {
            check_shape("last_values", &[num_envs], v.shape())?;
            v.to_owned()
        }
        None => Array1::zeros(num_envs),
    };

    let mut returns = Array2::zeros(rewards.raw_dim());
    for t in (0..rewards.nrows()).rev() {
        Zip::from(&mut acc)
            .and(rewards.index_axis(Axis(0), t))
            .and(dones.index_axis(Axis(0), t))
            .for_each(|acc, &r, &d| {
                *acc = r + if d { 0.0 } else { gamma * *acc };
            });
        returns.index_axis_mut(Axis(0), t).assign(&acc);
    }
    Ok(returns)
}

/// One-step TD target `r + gamma * (1 - done) * v_tp1`.
pub fn td_target(
    rewards: ArrayView2<'_, f32>,
    dones: ArrayView2<'_, bool>,
    v_tp1: ArrayView2<'_, f32>,
    gamma: f32,
) -> Result<Array2<f32>> {
    check_shape("dones", rewards.shape(), dones.shape())?;
    check_shape("v_tp1", rewards.shape(), v_tp1.shape())?;
    Ok(Zip::from(&rewards)
        .and(&dones)
        .and(&v_tp1)
        .map_collect(|&r, &d, &v| r + if d { 0.0 } else { gamma * v }))
}

/// Q-learning target, the TD target bootstrapped from `max_a q_tp1`.
///
/// `q_tp1` is shaped `(batch, n_actions)`; the other arrays are `(batch,)`.
pub fn q_learning_target(
    rewards: ArrayView1<'_, f32>,
    dones: ArrayView1<'_, bool>,
    q_tp1: ArrayView2<'_, f32>,
    gamma: f32,
) -> Result<Array1<f32>> {
    check_shape("dones", rewards.shape(), dones.shape())?;
    check_shape("q_tp1", rewards.shape(), &q_tp1.shape()[..1])?;
    let max_q = q_tp1.map_axis(Axis(1), |q| q.fold(f32::NEG_INFINITY, |m, &x| m.max(x)));
    Ok(Zip::from(&rewards)
        .and(&dones)
        .and(&max_q)
        .map_collect(|&r, &d, &v| r + if d { 0.0 } else { gamma * v }))
}

/// Generalized advantage estimation.
///
/// The advantage is the discounted sum, with factor `gamma * lambda`, of the
/// TD residuals `r + gamma * (1 - done) * v_tp1 - v_t`.
pub fn gae_estimation(
    rewards: ArrayView2<'_, f32>,
    dones: ArrayView2<'_, bool>,
    v_t: ArrayView2<'_, f32>,
    v_tp1: ArrayView2<'_, f32>,
    gamma: f32,
    lambda: f32,
) -> Result<Array2<f32>> {
    check_shape("v_t", rewards.shape(), v_t.shape())?;
    let residuals = td_target(rewards, dones, v_tp1, gamma)? - v_t;
    discounted_sum_rewards(residuals.view(), dones, None, gamma * lambda)
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn close(a: &Array2<f32>, b: &Array2<f32>) -> bool {
        a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn test_discounted_sum_rewards() {
        let rewards = array![[1.0f32, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let dones = array![[false, false], [true, false], [false, false]];

        let returns = discounted_sum_rewards(rewards.view(), dones.view(), None, 0.5).unwrap();
        let expected = array![[1.5f32, 1.75], [1.0, 1.5], [1.0, 1.0]];
        assert!(close(&returns, &expected));

        let last = array![2.0f32, 4.0];
        let returns =
            discounted_sum_rewards(rewards.view(), dones.view(), Some(last.view()), 0.5).unwrap();
        let expected = array![[1.5f32, 2.25], [1.0, 2.5], [2.0, 3.0]];
        assert!(close(&returns, &expected));
    }

    #[test]
    fn test_td_target_and_gae() {
        let rewards = array![[1.0f32], [0.0], [1.0]];
        let dones = array![[false], [false], [true]];
        let v_t = array![[0.5f32], [0.5], [0.5]];
        let v_tp1 = array![[0.5f32], [0.5], [9.0]];

        let target = td_target(rewards.view(), dones.view(), v_tp1.view(), 0.9).unwrap();
        assert!(close(&target, &array![[1.45f32], [0.45], [1.0]]));

        // With lambda = 1, GAE equals the discounted return minus the value.
        let adv =
            gae_estimation(rewards.view(), dones.view(), v_t.view(), v_tp1.view(), 0.9, 1.0)
                .unwrap();
        let returns = discounted_sum_rewards(rewards.view(), dones.view(), None, 0.9).unwrap();
        assert!(close(&adv, &(returns - &v_t)));
    }

    #[test]
    fn test_q_learning_target() {
        let rewards = array![1.0f32, 2.0];
        let dones = array![false, true];
        let q = array![[0.0f32, 3.0], [5.0, 1.0]];
        let target = q_learning_target(rewards.view(), dones.view(), q.view(), 0.5).unwrap();
        assert_eq!(target, array![2.5f32, 2.0]);
    }

    #[test]
    fn test_shape_mismatch() {
        let rewards = array![[1.0f32, 1.0]];
        let dones = array![[false]];
        assert!(matches!(
            discounted_sum_rewards(rewards.view(), dones.view(), None, 0.9),
            Err(PaacError::Shape { .. })
        ));
    }
}
