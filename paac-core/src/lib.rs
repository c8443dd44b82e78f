#![warn(missing_docs)]
//! Core types for running vectorized environments and replaying their
//! transitions.
//!
//! This crate has no threads of its own. It defines the [`Env`] adapter
//! driven by the runners of `paac-runner`, the closed [`Space`] and
//! [`Actions`] types shared by runners and buffers, and the single-producer
//! data structures fed by a training loop:
//!
//! - [`RingBuffer`] and [`FrameStack`] for frame stacking,
//! - [`ReplayBuffer`] and [`PrioritizedReplayBuffer`],
//! - [`Schedule`]s of hyperparameters,
//! - return [`estimators`] and the [`MeanStdFilter`].
pub mod dummy;
pub mod error;
pub mod estimators;
pub mod replay_buffer;

mod env;
mod filter;
mod frame_stack;
mod ring_buffer;
mod schedule;
mod space;
mod transform;

pub use env::{Env, Info, StepOutcome};
pub use error::{PaacError, Result};
pub use filter::{MeanStdFilter, StateNormalizer};
pub use frame_stack::{FrameStack, FrameStackConfig};
pub use replay_buffer::{
    ExperienceBufferBase, PrioritizedReplayBuffer, PrioritizedReplayBufferConfig, ReplayBatch,
    ReplayBuffer, ReplayBufferConfig, Transition, WeightNormalizer,
};
pub use ring_buffer::{RingBuffer, StackedFrames};
pub use schedule::{
    linear_schedule, linear_schedule_from, piecewise_const_schedule, piecewise_linear_schedule,
    Schedule,
};
pub use space::{Action, ActionRef, Actions, Dtype, Space};
pub use transform::StateTransform;
