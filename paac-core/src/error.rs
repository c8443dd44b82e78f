//! Errors in the library.
use thiserror::Error;

/// Errors raised by buffers, schedules and state transforms.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaacError {
    /// Invalid construction parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Sampling from a replay buffer or updating its priorities failed.
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// An array did not have the shape the receiver was built for.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    Shape {
        /// Shape the receiver was built for.
        expected: Vec<usize>,
        /// Shape of the given array.
        got: Vec<usize>,
    },
}

/// Shorthand for results in this crate.
pub type Result<T> = std::result::Result<T, PaacError>;
