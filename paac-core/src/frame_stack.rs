//! Frame stacking.
use crate::{
    error::{PaacError, Result},
    ring_buffer::RingBuffer,
    transform::StateTransform,
};
use anyhow::Result as AnyResult;
use log::debug;
use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`FrameStack`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameStackConfig {
    /// Number of stacked frames.
    pub depth: usize,

    /// Axis of the state (excluding the environment axis) along which frames
    /// are stacked. Only 1 is supported.
    pub dim: usize,
}

impl Default for FrameStackConfig {
    fn default() -> Self {
        Self { depth: 4, dim: 1 }
    }
}

impl FrameStackConfig {
    /// Sets the number of stacked frames.
    pub fn depth(mut self, v: usize) -> Self {
        self.depth = v;
        self
    }

    /// Sets the stacking axis.
    pub fn dim(mut self, v: usize) -> Self {
        self.dim = v;
        self
    }

    /// Constructs [`FrameStackConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> AnyResult<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`FrameStackConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> AnyResult<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Stacks the latest `depth` frames of every environment.
///
/// States are shaped `(num_envs, 1, *rest)` and transformed into
/// `(num_envs, depth, *rest)`, oldest frame first. Training and evaluation
/// states go to separate ring buffers; the evaluation buffer always holds a
/// single environment.
#[derive(Debug, Clone)]
pub struct FrameStack {
    depth: usize,
    train: Option<RingBuffer>,
    eval: Option<RingBuffer>,
}

impl FrameStack {
    /// Creates a frame stacker.
    pub fn new(config: &FrameStackConfig) -> Result<Self> {
        if config.dim != 1 {
            return Err(PaacError::Configuration(format!(
                "frames can only be stacked along dimension 1, got {}",
                config.dim
            )));
        }
        if config.depth == 0 {
            return Err(PaacError::Configuration(
                "depth of a frame stack must be positive".to_string(),
            ));
        }
        Ok(Self {
            depth: config.depth,
            train: None,
            eval: None,
        })
    }

    /// Number of stacked frames.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Ring buffer of the training stream, once a training state has been seen.
    pub fn train_buffer(&self) -> Option<&RingBuffer> {
        self.train.as_ref()
    }

    /// Ring buffer of the evaluation stream, once an evaluation state has been seen.
    pub fn eval_buffer(&self) -> Option<&RingBuffer> {
        self.eval.as_ref()
    }

    fn buffer(&mut self, shape: &[usize], training: bool) -> Result<&mut RingBuffer> {
        let slot = if training {
            &mut self.train
        } else {
            &mut self.eval
        };
        if slot.is_none() {
            let mut shape = shape.to_vec();
            if !training && !shape.is_empty() {
                shape[0] = 1;
            }
            debug!(
                "Create {} frame stack buffer with input shape {:?}",
                if training { "training" } else { "evaluation" },
                shape
            );
            *slot = Some(RingBuffer::new(&shape, self.depth)?);
        }
        Ok(slot.as_mut().unwrap_or_else(|| unreachable!()))
    }
}

impl StateTransform for FrameStack {
    fn transform_state(
        &mut self,
        state: ArrayViewD<'_, f32>,
        training: bool,
    ) -> Result<ArrayD<f32>> {
        let buffer = self.buffer(state.shape(), training)?;
        buffer.append(state)?;
        Ok(buffer.get_data().to_array())
    }
}
