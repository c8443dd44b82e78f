//! Partition of environments among workers.
use std::ops::Range;

/// Splits `0..num_envs` into `num_workers` contiguous shards.
///
/// With `num_envs = q * num_workers + r`, the first `r` shards hold `q + 1`
/// environments and the others `q`. Shards are returned in order and cover
/// `0..num_envs` exactly; some are empty when `num_workers > num_envs`.
pub fn split_shards(num_envs: usize, num_workers: usize) -> Vec<Range<usize>> {
    if num_workers == 0 {
        return vec![];
    }
    let (q, r) = (num_envs / num_workers, num_envs % num_workers);
    (0..num_workers)
        .map(|i| i * q + i.min(r)..(i + 1) * q + (i + 1).min(r))
        .collect()
}
