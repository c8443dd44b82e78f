#![warn(missing_docs)]
//! Synchronous vectorized environment runners.
//!
//! A [`Runner`] steps a fixed set of environments in lockstep. [`ParallelRunner`]
//! splits the environments into contiguous shards, one per worker thread, and
//! exchanges actions and transitions through a block of memory shared with the
//! workers, so a step costs one broadcast and one round of acknowledgements.
//! [`SerialRunner`] has the same semantics on the calling thread.
//!
//! [`RolloutBatcher`] drives a runner for a fixed horizon and returns the
//! trajectories as a [`Rollout`], optionally through the state transforms of
//! [`paac_core`].
//!
//! ```no_run
//! use paac_core::dummy::{DummyEnv, DummyEnvConfig};
//! use paac_runner::{ParallelRunner, ParallelRunnerConfig, Runner};
//!
//! # fn main() -> Result<(), paac_runner::RunnerError> {
//! let config = ParallelRunnerConfig::default().num_workers(Some(2));
//! let mut runner = ParallelRunner::<DummyEnv>::build(&config, &DummyEnvConfig::default(), 8)?;
//! let _states = runner.reset()?;
//! let actions = runner.sample_random_action()?;
//! let step = runner.step(&actions)?;
//! assert_eq!(step.rewards.len(), 8);
//! runner.close()?;
//! # Ok(())
//! # }
//! ```
mod base;
mod batcher;
mod config;
mod error;
mod parallel;
mod rendezvous;
mod serial;
mod shard;
mod shared;
mod stats;
mod worker;
pub use base::{Runner, StepResult};
pub use batcher::{Rollout, RolloutBatcher, RolloutBatcherConfig};
pub use config::ParallelRunnerConfig;
pub use error::{Command, RunnerError};
pub use parallel::ParallelRunner;
pub use serial::SerialRunner;
pub use shard::split_shards;
pub use stats::EpisodeStats;
