//! Transition block shared by a runner and its workers.
//!
//! The block holds one row per environment for states, actions, rewards,
//! done flags and infos. It is allocated once and never resized. Ownership of
//! rows is partitioned statically: each worker holds a [`ShardSlice`] over a
//! disjoint range of rows and is the only one touching them while it executes
//! a command. The runner touches rows only while every worker is idle, i.e.
//! before broadcasting a command or after all workers acknowledged it. The
//! command and acknowledgement channels order these accesses.
use paac_core::{Action, ActionRef, Actions, Info, PaacError, Space};
use ndarray::{Array1, Array2, ArrayD, IxDyn};
use std::{cell::UnsafeCell, ops::Range, sync::Arc};

/// Fixed-size array whose elements may be written through a shared reference.
pub(crate) struct SharedArray<T> {
    data: Box<[UnsafeCell<T>]>,
}

// SAFETY: concurrent accesses are to disjoint ranges, see the module docs.
unsafe impl<T: Send> Sync for SharedArray<T> {}

impl<T: Clone> SharedArray<T> {
    fn new(len: usize, init: T) -> Self {
        Self {
            data: (0..len).map(|_| UnsafeCell::new(init.clone())).collect(),
        }
    }
}

impl<T> SharedArray<T> {
    /// # Safety
    ///
    /// No other thread may write `range` while the returned slice is alive.
    unsafe fn slice(&self, range: Range<usize>) -> &[T] {
        let cells = &self.data[range];
        std::slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()), cells.len())
    }

    /// # Safety
    ///
    /// No other reference into `range` may exist while the returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [T] {
        let cells = &self.data[range];
        std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len())
    }
}

enum SharedActions {
    Continuous(SharedArray<f32>),
    Discrete(SharedArray<i64>),
}

/// Pre-allocated states, actions, rewards, dones and infos of all environments.
pub(crate) struct SharedTransitionBlock {
    num_envs: usize,
    state_shape: Vec<usize>,
    state_len: usize,
    action_len: usize,
    states: SharedArray<f32>,
    actions: SharedActions,
    rewards: SharedArray<f64>,
    dones: SharedArray<bool>,
    infos: SharedArray<Info>,
}

impl SharedTransitionBlock {
    /// Allocates a block for `num_envs` environments of the given spaces.
    pub fn new(num_envs: usize, state_space: &Space, action_space: &Space) -> Self {
        let state_len = state_space.flat_len();
        let action_len = action_space.flat_len();
        let actions = match action_space {
            Space::Continuous { .. } => {
                SharedActions::Continuous(SharedArray::new(num_envs * action_len, 0.0))
            }
            Space::Discrete { .. } => SharedActions::Discrete(SharedArray::new(num_envs, 0)),
        };
        Self {
            num_envs,
            state_shape: state_space.shape().to_vec(),
            state_len,
            action_len,
            states: SharedArray::new(num_envs * state_len, 0.0),
            actions,
            rewards: SharedArray::new(num_envs, 0.0),
            dones: SharedArray::new(num_envs, false),
            infos: SharedArray::new(num_envs, Info::new()),
        }
    }

    /// Splits the block into slices owned by workers.
    ///
    /// The ranges must be disjoint; [`split_shards`](crate::split_shards)
    /// produces such ranges.
    pub fn shard_slices(self: &Arc<Self>, shards: &[Range<usize>]) -> Vec<ShardSlice> {
        shards
            .iter()
            .map(|range| ShardSlice {
                block: self.clone(),
                range: range.clone(),
            })
            .collect()
    }

    /// Copies `actions` into the block.
    ///
    /// # Safety
    ///
    /// Every worker must be idle.
    pub unsafe fn write_actions(&self, actions: &Actions) -> Result<(), PaacError> {
        match (&self.actions, actions) {
            (SharedActions::Continuous(dst), Actions::Continuous(src)) => {
                dst.slice_mut(0..self.num_envs * self.action_len)
                    .iter_mut()
                    .zip(src.iter())
                    .for_each(|(d, s)| *d = *s);
                Ok(())
            }
            (SharedActions::Discrete(dst), Actions::Discrete(src)) => {
                dst.slice_mut(0..self.num_envs)
                    .iter_mut()
                    .zip(src.iter())
                    .for_each(|(d, s)| *d = *s);
                Ok(())
            }
            _ => Err(PaacError::Configuration(
                "action kind does not match the action space".to_string(),
            )),
        }
    }

    /// Copies the actions out of the block.
    ///
    /// # Safety
    ///
    /// Every worker must be idle.
    pub unsafe fn read_actions(&self) -> Actions {
        match &self.actions {
            SharedActions::Continuous(a) => {
                let data = a.slice(0..self.num_envs * self.action_len).to_vec();
                Actions::Continuous(
                    Array2::from_shape_vec((self.num_envs, self.action_len), data)
                        .unwrap_or_else(|_| unreachable!()),
                )
            }
            SharedActions::Discrete(a) => {
                Actions::Discrete(Array1::from(a.slice(0..self.num_envs).to_vec()))
            }
        }
    }

    /// Copies the states out of the block, shaped `(num_envs, *state_shape)`.
    ///
    /// # Safety
    ///
    /// Every worker must be idle.
    pub unsafe fn read_states(&self) -> ArrayD<f32> {
        let mut shape = vec![self.num_envs];
        shape.extend_from_slice(&self.state_shape);
        let data = self.states.slice(0..self.num_envs * self.state_len).to_vec();
        ArrayD::from_shape_vec(IxDyn(&shape), data).unwrap_or_else(|_| unreachable!())
    }

    /// Copies rewards, dones and infos out of the block.
    ///
    /// # Safety
    ///
    /// Every worker must be idle.
    pub unsafe fn read_outcomes(&self) -> (Vec<f64>, Vec<bool>, Vec<Info>) {
        let all = 0..self.num_envs;
        (
            self.rewards.slice(all.clone()).to_vec(),
            self.dones.slice(all.clone()).to_vec(),
            self.infos.slice(all).to_vec(),
        )
    }
}

/// Rows of one environment inside a [`ShardSlice`].
pub(crate) struct EnvSlot<'a> {
    pub action: ActionRef<'a>,
    pub state: &'a mut [f32],
    pub reward: &'a mut f64,
    pub done: &'a mut bool,
    pub info: &'a mut Info,
}

/// Exclusive handle on a contiguous range of rows of a [`SharedTransitionBlock`].
///
/// Not `Clone`: at most one handle exists per range.
pub(crate) struct ShardSlice {
    block: Arc<SharedTransitionBlock>,
    range: Range<usize>,
}

impl ShardSlice {
    /// Global indices of the environments of this shard.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    fn global(&self, i: usize) -> usize {
        debug_assert!(i < self.range.len());
        self.range.start + i
    }

    /// Rows of the `i`-th environment of the shard.
    pub fn slot(&mut self, i: usize) -> EnvSlot<'_> {
        let g = self.global(i);
        let b = &*self.block;
        let (sl, al) = (b.state_len, b.action_len);
        // SAFETY: rows in `self.range` are only accessed through this handle
        // while the worker executes a command, and `&mut self` makes the
        // returned references exclusive.
        unsafe {
            let action = match &b.actions {
                SharedActions::Continuous(a) => {
                    ActionRef::Continuous(a.slice(g * al..(g + 1) * al))
                }
                SharedActions::Discrete(a) => ActionRef::Discrete(a.slice(g..g + 1)[0]),
            };
            EnvSlot {
                action,
                state: b.states.slice_mut(g * sl..(g + 1) * sl),
                reward: &mut b.rewards.slice_mut(g..g + 1)[0],
                done: &mut b.dones.slice_mut(g..g + 1)[0],
                info: &mut b.infos.slice_mut(g..g + 1)[0],
            }
        }
    }

    /// Writes the action of the `i`-th environment of the shard.
    pub fn write_action(&mut self, i: usize, action: &Action) -> Result<(), PaacError> {
        let g = self.global(i);
        let b = &*self.block;
        let al = b.action_len;
        // SAFETY: as in `slot`.
        unsafe {
            match (&b.actions, action) {
                (SharedActions::Continuous(dst), Action::Continuous(src)) if src.len() == al => {
                    dst.slice_mut(g * al..(g + 1) * al).copy_from_slice(src);
                    Ok(())
                }
                (SharedActions::Discrete(dst), Action::Discrete(src)) => {
                    dst.slice_mut(g..g + 1)[0] = *src;
                    Ok(())
                }
                _ => Err(PaacError::Configuration(format!(
                    "environment {} produced an action outside its action space: {:?}",
                    g, action
                ))),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::split_shards;

    // A shard slice moves into a worker thread.
    const _: fn() = || {
        fn assert_send<T: Send>() {}
        assert_send::<ShardSlice>();
    };

    #[test]
    fn test_slices_cover_block() {
        let state_space = Space::uniform_box(vec![2], -1.0, 1.0).unwrap();
        let action_space = Space::discrete(3).unwrap();
        let block = Arc::new(SharedTransitionBlock::new(5, &state_space, &action_space));
        let mut slices = block.shard_slices(&split_shards(5, 2));

        for slice in slices.iter_mut() {
            for i in 0..slice.range().len() {
                let g = (slice.range().start + i) as f32;
                slice.write_action(i, &Action::Discrete(g as i64)).unwrap();
                let slot = slice.slot(i);
                slot.state.iter_mut().for_each(|x| *x = g);
                *slot.reward = g as f64;
                *slot.done = g as usize % 2 == 0;
                slot.info.insert("g".to_string(), g as f64);
            }
        }
        assert!(slices[0].write_action(0, &Action::Continuous(vec![0.0])).is_err());

        let (states, actions, (rewards, dones, infos)) =
            unsafe { (block.read_states(), block.read_actions(), block.read_outcomes()) };
        assert_eq!(states.shape(), &[5, 2]);
        for g in 0..5 {
            assert_eq!(states[[g, 0]], g as f32);
            assert_eq!(actions.get(g), Some(Action::Discrete(g as i64)));
            assert_eq!(rewards[g], g as f64);
            assert_eq!(dones[g], g % 2 == 0);
            assert_eq!(infos[g]["g"], g as f64);
        }
    }
}
