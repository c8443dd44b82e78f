//! Configuration of [`ParallelRunner`](crate::ParallelRunner).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
    time::Duration,
};

/// Configuration of [`ParallelRunner`](crate::ParallelRunner).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParallelRunnerConfig {
    /// Number of worker threads. `None` uses the available parallelism.
    /// Clamped to the number of environments.
    pub num_workers: Option<usize>,

    /// How long to wait for the acknowledgements of all workers before the
    /// runner fails, in milliseconds.
    pub ack_timeout_ms: u64,

    /// How long [`close`](crate::Runner::close) waits for workers to exit
    /// before detaching them, in milliseconds.
    pub close_timeout_ms: u64,

    /// Number of finished episodes kept in the statistics.
    pub history_len: usize,

    /// Environment `i` is built with seed `seed + i`.
    pub seed: i64,
}

impl Default for ParallelRunnerConfig {
    fn default() -> Self {
        Self {
            num_workers: None,
            ack_timeout_ms: 30_000,
            close_timeout_ms: 1_000,
            history_len: 100,
            seed: 0,
        }
    }
}

impl ParallelRunnerConfig {
    /// Sets the number of workers.
    pub fn num_workers(mut self, v: Option<usize>) -> Self {
        self.num_workers = v;
        self
    }

    /// Sets the acknowledgement timeout in milliseconds.
    pub fn ack_timeout_ms(mut self, v: u64) -> Self {
        self.ack_timeout_ms = v;
        self
    }

    /// Sets the close timeout in milliseconds.
    pub fn close_timeout_ms(mut self, v: u64) -> Self {
        self.close_timeout_ms = v;
        self
    }

    /// Sets the number of finished episodes kept in the statistics.
    pub fn history_len(mut self, v: usize) -> Self {
        self.history_len = v;
        self
    }

    /// Sets the base seed of environments.
    pub fn seed(mut self, v: i64) -> Self {
        self.seed = v;
        self
    }

    /// Acknowledgement timeout.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Close timeout.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Constructs [`ParallelRunnerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ParallelRunnerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
