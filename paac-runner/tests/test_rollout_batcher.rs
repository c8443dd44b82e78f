use anyhow::Result;
use ndarray::{Array1, ArrayViewD, Axis};
use paac_core::{
    dummy::{DummyEnv, DummyEnvConfig},
    estimators::discounted_sum_rewards,
    linear_schedule, Actions, PrioritizedReplayBuffer, PrioritizedReplayBufferConfig,
    ReplayBufferConfig, StateNormalizer,
};
use paac_runner::{
    ParallelRunner, ParallelRunnerConfig, RolloutBatcher, RolloutBatcherConfig, Runner,
};
use tempdir::TempDir;
use test_log::test;

fn zeros(n: usize) -> impl FnMut(ArrayViewD<'_, f32>, usize) -> Actions {
    move |_, _| Actions::Discrete(Array1::zeros(n))
}

#[test]
fn test_rollout_from_parallel_runner() -> Result<()> {
    let runner_config = ParallelRunnerConfig::default().num_workers(Some(2));
    let env_config = DummyEnvConfig::default().state_dim(4).max_episode_len(5);
    let runner = ParallelRunner::<DummyEnv>::build(&runner_config, &env_config, 4)?;
    let config = RolloutBatcherConfig::default().batch_size(20);
    let mut batcher =
        RolloutBatcher::build(&config, runner)?.with_transform(StateNormalizer::new(5.0));

    let mut n_dones = 0;
    for _ in 0..3 {
        let rollout = batcher.get_batch(zeros(4))?;
        assert_eq!(rollout.horizon(), 5);
        assert_eq!(rollout.states_t_and_tp1.shape(), &[6, 4, 4]);
        assert!(rollout.states_t_and_tp1.iter().all(|x| x.abs() <= 5.0));
        n_dones += rollout.dones.iter().filter(|&&d| d).count();

        // Environment 0 has episodes of exactly 5 steps.
        let env0 = rollout.dones.index_axis(Axis(1), 0);
        assert_eq!(env0.iter().filter(|&&d| d).count(), 1);

        let returns = discounted_sum_rewards(rollout.rewards(), rollout.dones.view(), None, 0.99)?;
        assert_eq!(returns.shape(), &[5, 4]);
    }
    assert_eq!(batcher.runner().stats().num_steps(), 60);
    assert_eq!(batcher.runner().stats().num_episodes(), n_dones);

    let mut runner = batcher.into_runner();
    runner.close()?;
    assert_eq!(env_config.n_closed(), 4);
    Ok(())
}

#[test]
fn test_rollout_into_prioritized_replay_buffer() -> Result<()> {
    let runner_config = ParallelRunnerConfig::default().num_workers(Some(2));
    let runner = ParallelRunner::<DummyEnv>::build(&runner_config, &DummyEnvConfig::default(), 2)?;
    let config = RolloutBatcherConfig::default().batch_size(16);
    let mut batcher = RolloutBatcher::build(&config, runner)?;

    let replay = ReplayBufferConfig::default().maxlen(20).num_envs(2);
    let config = PrioritizedReplayBufferConfig::default()
        .replay(replay)
        .is_factor(linear_schedule(0.4, 1.0, 100));
    let mut buffer = PrioritizedReplayBuffer::build(&config)?;
    for _ in 0..2 {
        batcher.get_batch(zeros(2))?.push_into(&mut buffer)?;
    }
    // 10 slots for each of 2 environments.
    assert_eq!(paac_core::ExperienceBufferBase::len(&buffer), 20);

    let batch = buffer.sample(8, 0)?;
    assert_eq!(batch.len(), 8);
    let weights = batch.weights.clone().unwrap();
    assert!(weights.iter().all(|&w| w > 0.0 && w <= 1.0));
    buffer.update_pr(&batch.idxs, &[0.5; 8])?;
    Ok(())
}

#[test]
fn test_configs_yaml() -> Result<()> {
    let dir = TempDir::new("paac_runner")?;

    let config = ParallelRunnerConfig::default()
        .num_workers(Some(3))
        .ack_timeout_ms(500)
        .seed(7);
    let path = dir.path().join("runner.yaml");
    config.save(&path)?;
    assert_eq!(ParallelRunnerConfig::load(&path)?, config);

    let config = RolloutBatcherConfig::default().batch_size(64);
    let path = dir.path().join("batcher.yaml");
    config.save(&path)?;
    assert_eq!(RolloutBatcherConfig::load(&path)?, config);
    Ok(())
}
