//! Vertex-side primitives: apply a function over a frontier or over the
//! whole vertex range, and filter into a fresh frontier.

use rayon::prelude::*;

use crate::frontier::Frontier;
use crate::types::Vid;

/// Applies `f` to every vertex in the frontier, in its current form.
///
/// Dense frontiers are scanned word by word in parallel; sparse frontiers
/// iterate their bag shards in parallel and may invoke `f` more than once
/// for a duplicated vertex.
///
/// # Arguments
/// * `frontier` - The set of vertices to visit
/// * `f` - Function invoked with each active vertex id
pub fn vertex_map<F>(frontier: &Frontier, f: F)
where
    F: Fn(Vid) + Sync,
{
    if frontier.is_dense() {
        frontier
            .dense()
            .expect("dense frontier without bitmap")
            .for_each_set(|pos| f(pos as Vid));
    } else {
        frontier
            .sparse()
            .expect("sparse frontier without bag")
            .for_each(f);
    }
}

/// Applies `f` to every vertex id in `[0, num_nodes)`.
///
/// # Arguments
/// * `num_nodes` - Size of the id range
/// * `f` - Function invoked with each vertex id
pub fn vertex_map_all<F>(num_nodes: usize, f: F)
where
    F: Fn(Vid) + Sync + Send,
{
    (0..num_nodes as Vid).into_par_iter().for_each(f);
}

/// Builds a new frontier holding the members of `frontier` for which `f`
/// returns true.
///
/// # Arguments
/// * `frontier` - The input set
/// * `f` - Predicate deciding membership in the output
///
/// # Returns
/// A fresh frontier in the input's representation.
pub fn vertex_filter<F>(frontier: &Frontier, f: F) -> Frontier
where
    F: Fn(Vid) -> bool + Sync,
{
    let mut out = Frontier::new(frontier.num_vertices());
    if frontier.is_dense() {
        out.to_dense();
    }
    vertex_map(frontier, |v| {
        if f(v) {
            out.activate(v);
        }
    });
    out
}

/// Builds a dense frontier holding every vertex id in `[0, num_nodes)` for
/// which `f` returns true.
///
/// # Arguments
/// * `num_nodes` - Size of the id range
/// * `f` - Predicate deciding membership in the output
///
/// # Returns
/// A fresh dense frontier.
pub fn vertex_filter_all<F>(num_nodes: usize, f: F) -> Frontier
where
    F: Fn(Vid) -> bool + Sync,
{
    let mut out = Frontier::new(num_nodes);
    out.to_dense();
    vertex_map_all(num_nodes, |v| {
        if f(v) {
            out.activate(v);
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_vertex_map_sparse_and_dense() {
        let mut frontier = Frontier::new(100);
        for v in [1u32, 5, 9] {
            frontier.activate(v);
        }
        let hits = AtomicUsize::new(0);
        vertex_map(&frontier, |_| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 3);

        frontier.to_dense();
        let hits = AtomicUsize::new(0);
        vertex_map(&frontier, |_| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_vertex_filter_preserves_representation() {
        let mut frontier = Frontier::new(64);
        for v in 0..10u32 {
            frontier.activate(v);
        }
        let sparse_out = vertex_filter(&frontier, |v| v % 2 == 0);
        assert!(!sparse_out.is_dense());
        assert_eq!(sparse_out.count(), 5);

        frontier.to_dense();
        let dense_out = vertex_filter(&frontier, |v| v < 3);
        assert!(dense_out.is_dense());
        assert_eq!(dense_out.count(), 3);
    }

    #[test]
    fn test_vertex_filter_all() {
        let out = vertex_filter_all(50, |v| v >= 40);
        assert!(out.is_dense());
        assert_eq!(out.count(), 10);
        assert!(out.contains(49));
        assert!(!out.contains(39));
    }
}
