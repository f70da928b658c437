//! Frontier: the set of vertices active in one round.
//!
//! A frontier is logically a subset of `[0, n)` with two physical forms: a
//! dense bitmap and a sparse bag of vertex ids. Exactly one form is
//! authoritative at a time (`is_dense`); the orchestrator converts between
//! them per round based on how many edges the frontier activates.

use crate::frontier::bag::VertexBag;
use crate::frontier::bitmap::Bitmap;
use crate::types::Vid;

pub mod bag;
pub mod bitmap;

pub struct Frontier {
    n: usize,
    dense: Option<Bitmap>,
    sparse: Option<VertexBag<Vid>>,
    is_dense: bool,
}

impl Frontier {
    /// An empty sparse frontier over `n` vertices.
    ///
    /// # Arguments
    /// * `n` - Number of vertices the frontier ranges over
    ///
    /// # Returns
    /// A frontier with an empty bag and no bitmap allocated yet.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            dense: None,
            sparse: Some(VertexBag::new()),
            is_dense: false,
        }
    }

    /// A dense frontier adopting an existing bitmap.
    ///
    /// # Arguments
    /// * `bitmap` - The membership bitmap; its size becomes `n`
    pub fn from_dense(bitmap: Bitmap) -> Self {
        Self {
            n: bitmap.size(),
            dense: Some(bitmap),
            sparse: None,
            is_dense: true,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.n
    }

    pub fn is_dense(&self) -> bool {
        self.is_dense
    }

    /// Marks `v` active in the authoritative form.
    ///
    /// Concurrent activations are safe in both forms; sparse activation
    /// may record duplicates.
    ///
    /// # Arguments
    /// * `v` - Vertex to activate, must be below `n`
    pub fn activate(&self, v: Vid) {
        debug_assert!((v as usize) < self.n, "vertex {} out of range {}", v, self.n);
        if self.is_dense {
            self.dense
                .as_ref()
                .expect("dense frontier without bitmap")
                .set_bit_atomic(v as usize);
        } else {
            self.sparse
                .as_ref()
                .expect("sparse frontier without bag")
                .push(v);
        }
    }

    /// Activates every vertex, switching to the dense form.
    pub fn activate_all(&mut self) {
        if !self.is_dense {
            self.to_dense();
        }
        self.dense
            .as_ref()
            .expect("dense frontier without bitmap")
            .set_all_parallel();
    }

    /// Membership test.
    ///
    /// # Arguments
    /// * `v` - Vertex to test
    ///
    /// # Returns
    /// Whether `v` is active.
    ///
    /// # Panics
    /// * If the dense form has not been materialized; the authoritative
    ///   form may still be sparse after `fill_dense`
    pub fn contains(&self, v: Vid) -> bool {
        self.dense
            .as_ref()
            .expect("contains() requires a materialized bitmap")
            .get_bit(v as usize)
    }

    /// Number of active vertices.
    ///
    /// # Returns
    /// The popcount of the bitmap in dense form; the number of pushes,
    /// duplicates included, in sparse form.
    pub fn count(&self) -> usize {
        if self.is_dense {
            self.dense.as_ref().map_or(0, |d| d.count())
        } else {
            self.sparse.as_ref().map_or(0, |s| s.count())
        }
    }

    pub fn is_empty(&self) -> bool {
        if self.is_dense {
            self.dense.as_ref().map_or(true, |d| d.empty())
        } else {
            self.sparse.as_ref().map_or(true, |s| s.is_empty())
        }
    }

    /// Rebuilds the bitmap from the sparse bag without changing which form
    /// is authoritative. Used when workers need `contains` on a frontier
    /// that stays sparse.
    pub fn fill_dense(&mut self) {
        if let Some(dense) = &self.dense {
            dense.reset_parallel();
        } else {
            self.dense = Some(Bitmap::new(self.n));
        }
        let dense = self.dense.as_ref().expect("bitmap just ensured");
        if let Some(sparse) = &self.sparse {
            sparse.for_each(|v| dense.set_bit_atomic(v as usize));
        }
    }

    /// Converts to the dense form.
    pub fn to_dense(&mut self) {
        self.fill_dense();
        self.is_dense = true;
    }

    /// Converts to the sparse form by scanning bitmap words in parallel.
    pub fn to_sparse(&mut self) {
        if let Some(sparse) = &self.sparse {
            sparse.clear();
        } else {
            self.sparse = Some(VertexBag::new());
        }
        let sparse = self.sparse.as_ref().expect("bag just ensured");
        if let Some(dense) = &self.dense {
            dense.for_each_set(|pos| sparse.push(pos as Vid));
        }
        self.is_dense = false;
    }

    /// Overrides the authority flag without converting. Callers must have
    /// already materialized the matching form.
    pub fn set_dense(&mut self, dense: bool) {
        self.is_dense = dense;
    }

    pub fn dense(&self) -> Option<&Bitmap> {
        self.dense.as_ref()
    }

    pub fn sparse(&self) -> Option<&VertexBag<Vid>> {
        self.sparse.as_ref()
    }

    /// Replaces the sparse bag, e.g. after filtering.
    pub fn set_sparse(&mut self, bag: VertexBag<Vid>) {
        self.sparse = Some(bag);
    }
}

#[cfg(test)]
mod test_frontier {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sparse_roundtrip() {
        // Start from sparse {0, 3, 17, 17, 64} over n = 128.
        let frontier = Frontier::new(128);
        for v in [0u32, 3, 17, 17, 64] {
            frontier.activate(v);
        }
        assert_eq!(frontier.count(), 5);

        let mut frontier = frontier;
        frontier.to_dense();
        assert!(frontier.is_dense());
        assert_eq!(frontier.count(), 4);
        for v in [0u32, 3, 17, 64] {
            assert!(frontier.contains(v));
        }
        assert!(!frontier.contains(1));

        frontier.to_sparse();
        assert!(!frontier.is_dense());
        let set: HashSet<u32> = frontier
            .sparse()
            .expect("sparse form after to_sparse")
            .to_vec()
            .into_iter()
            .collect();
        assert_eq!(set, HashSet::from([0, 3, 17, 64]));
    }

    #[test]
    fn test_dense_roundtrip_preserves_set() {
        let mut frontier = Frontier::new(200);
        frontier.to_dense();
        for v in [5u32, 66, 199] {
            frontier.activate(v);
        }
        frontier.to_sparse();
        frontier.to_dense();
        assert_eq!(frontier.count(), 3);
        assert!(frontier.contains(199));
    }

    #[test]
    fn test_fill_dense_keeps_sparse_authority() {
        let mut frontier = Frontier::new(64);
        frontier.activate(7);
        frontier.activate(9);
        frontier.fill_dense();
        assert!(!frontier.is_dense());
        assert!(frontier.contains(7));
        assert!(frontier.contains(9));
        assert!(!frontier.contains(8));
        // Count still reflects the sparse bag.
        assert_eq!(frontier.count(), 2);
    }

    #[test]
    fn test_activate_all() {
        let mut frontier = Frontier::new(100);
        frontier.activate_all();
        assert_eq!(frontier.count(), 100);
        assert!(!frontier.is_empty());
    }

    #[test]
    fn test_empty() {
        let frontier = Frontier::new(10);
        assert!(frontier.is_empty());
        assert_eq!(frontier.count(), 0);
    }
}
