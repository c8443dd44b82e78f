//! Errors in the library.
use paac_core::PaacError;
use std::fmt;
use thiserror::Error;

/// Commands broadcast by a runner to its workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reset every environment and write the initial states.
    Reset,

    /// Step every environment with the actions in the shared block.
    Step,

    /// Draw a random action for every environment into the shared block.
    SampleAction,

    /// Close the environments and exit.
    Close,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Reset => "reset",
            Command::Step => "step",
            Command::SampleAction => "sample_action",
            Command::Close => "close",
        };
        write!(f, "{}", s)
    }
}

fn env_label(env: &Option<usize>) -> String {
    env.map_or("unknown".to_string(), |e| e.to_string())
}

/// Errors raised by runners and batchers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunnerError {
    /// Invalid construction parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An environment could not be built.
    #[error("Failed to build environment {env}: {reason}")]
    EnvBuild {
        /// Index of the environment.
        env: usize,
        /// Error reported by the environment.
        reason: String,
    },

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker {worker}: {reason}")]
    Spawn {
        /// Index of the worker.
        worker: usize,
        /// Error reported by the operating system.
        reason: String,
    },

    /// A worker failed or did not acknowledge a command in time. The runner
    /// is unusable afterwards.
    #[error("Worker {worker} failed on '{command}' (env {}): {reason}", env_label(.env))]
    WorkerFatal {
        /// Index of the worker.
        worker: usize,
        /// Global index of the environment, when known.
        env: Option<usize>,
        /// Last command issued to the worker.
        command: Command,
        /// Error message, panic payload or timeout description.
        reason: String,
    },

    /// The runner was closed, or is unusable after a fatal error.
    #[error("Runner is closed")]
    Closed,

    /// Invalid arguments, e.g. actions of the wrong shape.
    #[error(transparent)]
    Core(#[from] PaacError),
}
