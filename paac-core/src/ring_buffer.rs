//! Fixed-depth ring buffer used for frame stacking.
//!
//! Frames are appended as arrays of shape `(num_envs, 1, *rest)`. Storage is a
//! single contiguous array of `depth` slots allocated at construction; appending
//! overwrites the oldest slot in place. [`RingBuffer::get_data`] returns a
//! [`StackedFrames`] view of shape `(num_envs, depth, *rest)` that borrows the
//! storage, so no retained frame is ever copied on read.
use crate::error::{PaacError, Result};
use ndarray::{ArrayD, ArrayViewD, IxDyn};

/// Ring buffer of the latest `depth` frames of every environment.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    input_shape: Vec<usize>,
    num_envs: usize,
    frame_len: usize,
    depth: usize,

    // `depth` slots, each holding `num_envs * frame_len` values.
    data: Vec<f32>,

    // Slot holding the oldest frame, which is the next one to be overwritten.
    head: usize,
    n_appended: usize,
}

impl RingBuffer {
    /// Creates a zero-filled ring buffer.
    ///
    /// `input_shape` is the shape of an appended frame, `(num_envs, 1, *rest)`.
    /// Frames are stacked along axis 1, which therefore must have extent 1.
    pub fn new(input_shape: &[usize], depth: usize) -> Result<Self> {
        if input_shape.len() < 2 {
            return Err(PaacError::Configuration(format!(
                "frames must have shape (num_envs, 1, ...), got {:?}",
                input_shape
            )));
        }
        if input_shape[1] != 1 {
            return Err(PaacError::Configuration(format!(
                "the stacking dimension (axis 1) must have extent 1, got {:?}",
                input_shape
            )));
        }
        if depth == 0 || input_shape[0] == 0 {
            return Err(PaacError::Configuration(
                "depth and num_envs of a ring buffer must be positive".to_string(),
            ));
        }

        let num_envs = input_shape[0];
        let frame_len: usize = input_shape[2..].iter().product();
        Ok(Self {
            input_shape: input_shape.to_vec(),
            num_envs,
            frame_len,
            depth,
            data: vec![0.0; depth * num_envs * frame_len],
            head: 0,
            n_appended: 0,
        })
    }

    /// Shape of an appended frame.
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// Number of frames in a window.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of frames appended so far.
    pub fn n_appended(&self) -> usize {
        self.n_appended
    }

    /// Pushes `frame` as the newest timestep of every environment, evicting the oldest.
    pub fn append(&mut self, frame: ArrayViewD<'_, f32>) -> Result<()> {
        if frame.shape() != self.input_shape.as_slice() {
            return Err(PaacError::Shape {
                expected: self.input_shape.clone(),
                got: frame.shape().to_vec(),
            });
        }
        let slot_len = self.num_envs * self.frame_len;
        let start = self.head * slot_len;
        self.data[start..start + slot_len]
            .iter_mut()
            .zip(frame.iter())
            .for_each(|(dst, src)| *dst = *src);
        self.head = (self.head + 1) % self.depth;
        self.n_appended += 1;
        Ok(())
    }

    /// Returns the window of the latest `depth` frames, oldest first.
    ///
    /// Slots that have not been written yet read as zeros.
    pub fn get_data(&self) -> StackedFrames<'_> {
        StackedFrames { buffer: self }
    }

    #[inline]
    fn offset(&self, env: usize, t: usize) -> usize {
        let slot = (self.head + t) % self.depth;
        (slot * self.num_envs + env) * self.frame_len
    }
}

/// Read-only window over a [`RingBuffer`], logically `(num_envs, depth, *rest)`.
#[derive(Debug, Clone, Copy)]
pub struct StackedFrames<'a> {
    buffer: &'a RingBuffer,
}

impl<'a> StackedFrames<'a> {
    /// Logical shape of the window.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.buffer.num_envs, self.buffer.depth];
        shape.extend_from_slice(&self.buffer.input_shape[2..]);
        shape
    }

    /// Frame `t` (0 is the oldest) of environment `env`, shaped `rest`.
    ///
    /// The view points into the ring buffer's storage.
    pub fn frame(&self, env: usize, t: usize) -> ArrayViewD<'a, f32> {
        assert!(env < self.buffer.num_envs && t < self.buffer.depth);
        let start = self.buffer.offset(env, t);
        let data = &self.buffer.data[start..start + self.buffer.frame_len];
        // The slice length equals the product of the shape by construction.
        ArrayViewD::from_shape(IxDyn(&self.buffer.input_shape[2..]), data)
            .unwrap_or_else(|_| unreachable!())
    }

    /// Frame `t` of environment `env` as a flat slice.
    pub fn frame_slice(&self, env: usize, t: usize) -> &'a [f32] {
        assert!(env < self.buffer.num_envs && t < self.buffer.depth);
        let start = self.buffer.offset(env, t);
        &self.buffer.data[start..start + self.buffer.frame_len]
    }

    /// Copies the window into an owned array of shape `(num_envs, depth, *rest)`.
    pub fn to_array(&self) -> ArrayD<f32> {
        let b = self.buffer;
        let mut out = Vec::with_capacity(b.num_envs * b.depth * b.frame_len);
        for env in 0..b.num_envs {
            for t in 0..b.depth {
                out.extend_from_slice(self.frame_slice(env, t));
            }
        }
        ArrayD::from_shape_vec(IxDyn(&self.shape()), out).unwrap_or_else(|_| unreachable!())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Axis;

    fn filled(shape: &[usize], v: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(shape), v)
    }

    #[test]
    fn test_window_order_and_padding() {
        let shape = [8, 1, 4, 4];
        let mut buffer = RingBuffer::new(&shape, 4).unwrap();

        buffer.append(filled(&shape, 1.0).view()).unwrap();
        let s = buffer.get_data().to_array();
        assert_eq!(s.shape(), &[8, 4, 4, 4]);
        for t in 0..3 {
            assert!(s.index_axis(Axis(1), t).iter().all(|&x| x == 0.0));
        }
        assert!(s.index_axis(Axis(1), 3).iter().all(|&x| x == 1.0));

        buffer.append(filled(&shape, 2.0).view()).unwrap();
        buffer.append(filled(&shape, 3.0).view()).unwrap();
        for _ in 0..3 {
            buffer.append(filled(&shape, 42.0).view()).unwrap();
        }
        let s = buffer.get_data().to_array();
        let expected = [3.0, 42.0, 42.0, 42.0];
        for (t, v) in expected.iter().enumerate() {
            assert!(s.index_axis(Axis(1), t).iter().all(|x| x == v));
        }
    }

    #[test]
    fn test_window_matches_last_frames_per_env() {
        let shape = [3, 1, 2];
        let mut buffer = RingBuffer::new(&shape, 3).unwrap();
        let mut history = std::collections::VecDeque::new();
        for i in 0..7 {
            let frame = ArrayD::from_shape_fn(IxDyn(&shape), |ix| {
                (i * 100 + ix[0] * 10 + ix[2]) as f32
            });
            buffer.append(frame.view()).unwrap();
            history.push_back(frame);
            if history.len() > 3 {
                history.pop_front();
            }
        }
        let window = buffer.get_data();
        for env in 0..3 {
            for (t, frame) in history.iter().enumerate() {
                let expected = frame.index_axis(Axis(0), env).index_axis(Axis(0), 0).to_owned();
                assert_eq!(window.frame(env, t), expected.view());
            }
        }
    }

    #[test]
    fn test_previous_window_not_mutated() {
        let shape = [2, 1, 3];
        let mut buffer = RingBuffer::new(&shape, 4).unwrap();
        buffer.append(filled(&shape, 1.0).view()).unwrap();

        let before = buffer.get_data().to_array();
        let mut copy = before.clone();
        copy += 1.0;
        buffer.append(filled(&shape, 42.0).view()).unwrap();
        let after = buffer.get_data().to_array();

        assert_ne!(before, after);
        assert_eq!(before, copy - 1.0);
        // The frame that was newest is still there, one step older.
        assert_eq!(
            before.index_axis(Axis(1), 3),
            after.index_axis(Axis(1), 2)
        );
    }

    #[test]
    fn test_retained_frames_share_storage() {
        let shape = [4, 1, 16, 16];
        let mut buffer = RingBuffer::new(&shape, 4).unwrap();
        buffer.append(filled(&shape, 1.0).view()).unwrap();

        let before = {
            let w = buffer.get_data();
            (0..4)
                .map(|env| (1..4).map(|t| w.frame(env, t).as_ptr() as usize).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        };
        buffer.append(filled(&shape, 42.0).view()).unwrap();
        let w = buffer.get_data();
        for env in 0..4 {
            for t in 0..3 {
                assert_eq!(before[env][t], w.frame(env, t).as_ptr() as usize);
            }
        }
    }

    #[test]
    fn test_invalid_stacking_axis() {
        assert!(matches!(
            RingBuffer::new(&[42, 42], 1),
            Err(PaacError::Configuration(_))
        ));
        assert!(RingBuffer::new(&[4], 2).is_err());
        assert!(RingBuffer::new(&[4, 1, 2], 0).is_err());

        let mut buffer = RingBuffer::new(&[2, 1, 3], 2).unwrap();
        assert!(matches!(
            buffer.append(filled(&[2, 1, 4], 0.0).view()),
            Err(PaacError::Shape { .. })
        ));
    }
}
