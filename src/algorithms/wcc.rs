//! Weakly connected components.
//!
//! Label propagation to a fixed point: every vertex carries the smallest
//! vertex id seen in its component, pushed across out- and in-edges each
//! round, followed by a pointer-jumping shortcut pass. The undirected graph
//! is represented by running over both the forward and the transposed
//! store.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::algorithms::{atomic_u32_array, write_min};
use crate::engine::edge_map::edge_map;
use crate::engine::vertex_ops::vertex_filter_all;
use crate::runtime::Runtime;
use crate::storage::DiskGraph;
use crate::types::{DirectEdgeOp, EdgeOp, Vid, NO_OUTPUT};
use crate::Frontier;

/// Edge function of one propagation round: push the smaller of the two
/// endpoint labels onto the destination.
struct WccOp<'a> {
    ids: &'a [AtomicU32],
}

impl EdgeOp for WccOp<'_> {}

impl DirectEdgeOp for WccOp<'_> {
    #[inline]
    fn update(&self, src: Vid, dst: Vid) -> bool {
        let src_id = self.ids[src as usize].load(Ordering::Relaxed);
        let dst_id = self.ids[dst as usize].load(Ordering::Relaxed);
        if src_id < dst_id {
            self.ids[dst as usize].store(src_id, Ordering::Relaxed);
        }
        true
    }

    #[inline]
    fn update_atomic(&self, src: Vid, dst: Vid) -> bool {
        let src_id = self.ids[src as usize].load(Ordering::Relaxed);
        write_min(&self.ids[dst as usize], src_id);
        true
    }
}

/// Runs label propagation over `out_graph` and its transpose `in_graph`
/// until no label changes.
///
/// Every round pushes labels across both edge directions, then a shortcut
/// pass jumps each label one level and keeps only the vertices whose label
/// still moved.
///
/// # Arguments
/// * `rt` - Runtime owning the worker pools and fan-out queues
/// * `out_graph` - Forward edge store
/// * `in_graph` - Transposed edge store of the same graph
///
/// # Returns
/// The component label of every vertex: the smallest vertex id of its
/// component.
///
/// # Panics
/// * If the two stores disagree on the vertex count
pub fn wcc(rt: &Runtime, out_graph: &DiskGraph, in_graph: &DiskGraph) -> Vec<u32> {
    let n = out_graph.num_nodes();
    assert_eq!(n, in_graph.num_nodes(), "graph and transpose disagree on size");

    let ids = atomic_u32_array(n, 0);
    let prev_ids = atomic_u32_array(n, 0);
    (0..n as Vid).into_par_iter().for_each(|v| {
        ids[v as usize].store(v, Ordering::Relaxed);
        prev_ids[v as usize].store(v, Ordering::Relaxed);
    });

    let mut active = Frontier::new(n);
    active.activate_all();

    while !active.is_empty() {
        let func = WccOp { ids: &ids };
        edge_map(rt, out_graph, Some(&mut active), &func, NO_OUTPUT);
        edge_map(rt, in_graph, Some(&mut active), &func, NO_OUTPUT);

        // Shortcut: jump each label to its label's label, and keep only the
        // vertices whose label still moved this round.
        active = vertex_filter_all(n, |v| {
            let id = ids[v as usize].load(Ordering::Relaxed);
            let jumped = ids[id as usize].load(Ordering::Relaxed);
            if id != jumped {
                ids[v as usize].store(jumped, Ordering::Relaxed);
            }
            let now = ids[v as usize].load(Ordering::Relaxed);
            if prev_ids[v as usize].load(Ordering::Relaxed) != now {
                prev_ids[v as usize].store(now, Ordering::Relaxed);
                true
            } else {
                false
            }
        });
    }

    ids.into_iter().map(AtomicU32::into_inner).collect()
}

/// Lock-free union-find over vertex ids with incremental path compression.
/// Merges always point the larger representative at the smaller one.
pub struct UnionFind {
    parent: Vec<AtomicU32>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        let parent = (0..n as Vid).map(AtomicU32::new).collect();
        Self { parent }
    }

    /// Representative of `v`'s set, halving the path as it walks.
    ///
    /// # Arguments
    /// * `v` - The vertex to resolve
    ///
    /// # Returns
    /// The root vertex of `v`'s set.
    pub fn find(&self, v: Vid) -> Vid {
        let mut v = v;
        loop {
            let p = self.parent[v as usize].load(Ordering::Relaxed);
            if p == v {
                return v;
            }
            let gp = self.parent[p as usize].load(Ordering::Relaxed);
            if gp != p {
                // Compress one step at a time; full compression from two
                // racing paths could form a cycle.
                let _ = self.parent[v as usize].compare_exchange(
                    p,
                    gp,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
            v = p;
        }
    }

    /// Merges the sets of `a` and `b`.
    ///
    /// # Arguments
    /// * `a` - A member of the first set
    /// * `b` - A member of the second set
    pub fn union(&self, a: Vid, b: Vid) {
        let mut a = a;
        let mut b = b;
        loop {
            a = self.find(a);
            b = self.find(b);
            if a == b {
                return;
            }
            // Consistent direction: the larger representative links under
            // the smaller.
            if a < b {
                std::mem::swap(&mut a, &mut b);
            }
            if self.parent[a as usize]
                .compare_exchange(a, b, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }
}

/// Groups vertices by component label and reports the largest component.
///
/// Builds a union-find over the labels, sizes the classes with a
/// concurrent map, and prints the component summary.
///
/// # Arguments
/// * `ids` - Component label per vertex, as produced by [`wcc`]
///
/// # Returns
/// `(representative, size)` of the largest component; ties go to the
/// smaller representative.
///
/// # Panics
/// * If `ids` is empty
pub fn find_largest(ids: &[u32]) -> (Vid, usize) {
    let n = ids.len();
    assert!(n > 0, "empty graph has no components");

    let uf = UnionFind::new(n);
    (0..n as Vid)
        .into_par_iter()
        .for_each(|v| uf.union(v, ids[v as usize]));

    let sizes: DashMap<Vid, usize> = DashMap::new();
    (0..n as Vid).into_par_iter().for_each(|v| {
        *sizes.entry(uf.find(v)).or_insert(0) += 1;
    });

    let num_components = sizes.len();
    let non_trivial = AtomicUsize::new(0);
    let mut largest = (0, 0usize);
    for entry in sizes.iter() {
        if *entry.value() > 1 {
            non_trivial.fetch_add(1, Ordering::Relaxed);
        }
        if *entry.value() > largest.1 || (*entry.value() == largest.1 && *entry.key() < largest.0) {
            largest = (*entry.key(), *entry.value());
        }
    }

    println!("Total components: {}", num_components);
    println!(
        "Number of non-trivial components: {} (largest component: {}, size: {} [{:.4}])",
        non_trivial.load(Ordering::Relaxed),
        largest.0,
        largest.1,
        largest.1 as f64 / n as f64
    );

    largest
}

#[cfg(test)]
mod test_wcc {
    use super::*;

    #[test]
    fn test_union_find_merges_and_compresses() {
        let uf = UnionFind::new(6);
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(3, 4);
        assert_eq!(uf.find(2), 0);
        assert_eq!(uf.find(1), 0);
        assert_eq!(uf.find(4), 3);
        assert_ne!(uf.find(2), uf.find(4));
        assert_eq!(uf.find(5), 5);
    }

    #[test]
    fn test_union_find_parallel_chain() {
        let n = 5000;
        let uf = UnionFind::new(n);
        (1..n as Vid).into_par_iter().for_each(|v| uf.union(v - 1, v));
        let root = uf.find(0);
        assert_eq!(root, 0);
        for v in (0..n as Vid).step_by(97) {
            assert_eq!(uf.find(v), root);
        }
    }

    #[test]
    fn test_find_largest_counts_labels() {
        // Components {0,1,2} and {3,4}.
        let ids = vec![0, 0, 0, 3, 3];
        let (rep, size) = find_largest(&ids);
        assert_eq!(rep, 0);
        assert_eq!(size, 3);
    }
}
