//! Sum tree for prioritized sampling.
//!
//! A complete binary tree over a power-of-two number of leaves. Node `i` has
//! children `2i` and `2i + 1`; leaves start at index `n_leaves`. Sums are kept
//! in `f64` so that long runs of updates do not drift.
#[derive(Debug, Clone)]
pub struct SumTree {
    capacity: usize,
    n_leaves: usize,
    tree: Vec<f64>,
}

impl SumTree {
    pub fn new(capacity: usize) -> Self {
        let n_leaves = capacity.max(1).next_power_of_two();
        Self {
            capacity,
            n_leaves,
            tree: vec![0.0; 2 * n_leaves],
        }
    }

    pub fn total(&self) -> f64 {
        self.tree[1]
    }

    pub fn get(&self, ix: usize) -> f64 {
        self.tree[ix + self.n_leaves]
    }

    /// Sets the mass of leaf `ix`.
    pub fn set(&mut self, ix: usize, p: f64) {
        debug_assert!(ix < self.capacity && p >= 0.0);
        let mut i = ix + self.n_leaves;
        self.tree[i] = p;
        while i > 1 {
            i /= 2;
            self.tree[i] = self.tree[2 * i] + self.tree[2 * i + 1];
        }
    }

    /// Sets the mass of all leaves at once.
    pub fn rebuild(&mut self, ps: impl Iterator<Item = f64>) {
        self.tree.iter_mut().for_each(|x| *x = 0.0);
        for (ix, p) in ps.take(self.capacity).enumerate() {
            self.tree[ix + self.n_leaves] = p;
        }
        for i in (1..self.n_leaves).rev() {
            self.tree[i] = self.tree[2 * i] + self.tree[2 * i + 1];
        }
    }

    /// Leaf at which the prefix sum of masses first exceeds `s`.
    ///
    /// Only leaves with positive mass are returned as long as the total is
    /// positive, even when `s` is at or beyond the total due to rounding.
    pub fn find(&self, s: f64) -> usize {
        let mut i = 1;
        let mut s = s.max(0.0);
        while i < self.n_leaves {
            let left = 2 * i;
            let (l, r) = (self.tree[left], self.tree[left + 1]);
            if l > 0.0 && (s < l || r <= 0.0) {
                i = left;
            } else {
                s -= l;
                i = left + 1;
            }
        }
        i - self.n_leaves
    }
}
