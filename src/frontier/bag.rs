//! Multi-producer append-only bag with a running element count.
//!
//! Pushes from rayon worker threads land in per-thread shards so that the
//! hot path takes an uncontended lock. Duplicates are permitted; consumers
//! that need set semantics deduplicate through a bitmap.

use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct VertexBag<T> {
    shards: Vec<Mutex<Vec<T>>>,
    count: AtomicUsize,
}

impl<T: Copy + Send + Sync> VertexBag<T> {
    /// Creates an empty bag with one shard per pool thread.
    ///
    /// # Returns
    /// A bag ready for concurrent pushes.
    pub fn new() -> Self {
        let num_shards = rayon::current_num_threads().max(1);
        let mut shards = Vec::with_capacity(num_shards);
        shards.resize_with(num_shards, || Mutex::new(Vec::new()));
        Self {
            shards,
            count: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn shard_index(&self) -> usize {
        rayon::current_thread_index().unwrap_or(0) % self.shards.len()
    }

    /// Appends `val`. Concurrent pushes are safe from any thread.
    ///
    /// # Arguments
    /// * `val` - The element to append; duplicates are permitted
    pub fn push(&self, val: T) {
        let mut shard = self.shards[self.shard_index()]
            .lock()
            .expect("vertex bag shard poisoned");
        shard.push(val);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of pushed elements, duplicates included.
    ///
    /// # Returns
    /// The running element count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().expect("vertex bag shard poisoned").clear();
        }
        self.count.store(0, Ordering::Relaxed);
    }

    /// Invokes `f` on every element, processing shards in parallel.
    ///
    /// Must not be called concurrently with `push`; bags alternate between a
    /// fill phase and a scan phase.
    ///
    /// # Arguments
    /// * `f` - Function invoked with each element, duplicates included
    pub fn for_each<F>(&self, f: F)
    where
        F: Fn(T) + Sync,
    {
        self.shards.par_iter().for_each(|shard| {
            let shard = shard.lock().expect("vertex bag shard poisoned");
            for &val in shard.iter() {
                f(val);
            }
        });
    }

    /// Copies all elements into a single vector.
    ///
    /// # Returns
    /// Every element in shard order, duplicates included.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.count());
        for shard in &self.shards {
            let shard = shard.lock().expect("vertex bag shard poisoned");
            out.extend_from_slice(&shard);
        }
        out
    }
}

impl<T: Copy + Send + Sync> Default for VertexBag<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_push_count_collect() {
        let bag = VertexBag::new();
        for v in [0u32, 3, 17, 17, 64] {
            bag.push(v);
        }
        assert_eq!(bag.count(), 5);
        let set: HashSet<u32> = bag.to_vec().into_iter().collect();
        assert_eq!(set, HashSet::from([0, 3, 17, 64]));
    }

    #[test]
    fn test_parallel_push() {
        let bag = VertexBag::new();
        (0u32..10_000).into_par_iter().for_each(|v| bag.push(v));
        assert_eq!(bag.count(), 10_000);
        let mut all = bag.to_vec();
        all.sort_unstable();
        assert_eq!(all, (0u32..10_000).collect::<Vec<_>>());
    }

    #[test]
    fn test_clear() {
        let bag = VertexBag::new();
        bag.push(1u32);
        bag.clear();
        assert!(bag.is_empty());
        assert!(bag.to_vec().is_empty());
    }
}
