//! Benchmark drivers built on the `edge_map` / `vertex_map` primitives.
//!
//! Each module pairs the per-edge function objects with a driver that owns
//! the vertex state arrays and the round loop, in the style of a thin shell
//! over the engine.

use std::sync::atomic::{AtomicU32, Ordering};

pub mod bc;
pub mod bfs;
pub mod kcore;
pub mod pagerank;
pub mod spmv;
pub mod wcc;

/// Atomically lowers `slot` to `val` if `val` is smaller.
///
/// # Arguments
/// * `slot` - The cell to lower
/// * `val` - The candidate minimum
///
/// # Returns
/// True iff this call performed the write.
pub(crate) fn write_min(slot: &AtomicU32, val: u32) -> bool {
    let mut cur = slot.load(Ordering::Relaxed);
    while val < cur {
        match slot.compare_exchange_weak(cur, val, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return true,
            Err(seen) => cur = seen,
        }
    }
    false
}

/// An `f32` with atomic load/store and compare-and-swap addition, stored as
/// its raw bits.
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// Creates a new cell holding `val`.
    pub fn new(val: f32) -> Self {
        Self(AtomicU32::new(val.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, val: f32) {
        self.0.store(val.to_bits(), Ordering::Relaxed);
    }

    /// Adds `add` with a compare-and-swap loop.
    ///
    /// # Arguments
    /// * `add` - The addend
    ///
    /// # Returns
    /// The value held before the addition.
    pub fn fetch_add(&self, add: f32) -> f32 {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            let new = f32::from_bits(cur) + add;
            match self.0.compare_exchange_weak(
                cur,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return f32::from_bits(cur),
                Err(seen) => cur = seen,
            }
        }
    }
}

/// Allocates `n` atomic floats initialized to `val`.
pub(crate) fn atomic_f32_array(n: usize, val: f32) -> Vec<AtomicF32> {
    (0..n).map(|_| AtomicF32::new(val)).collect()
}

/// Allocates `n` atomic u32 cells initialized to `val`.
pub(crate) fn atomic_u32_array(n: usize, val: u32) -> Vec<AtomicU32> {
    (0..n).map(|_| AtomicU32::new(val)).collect()
}
