//! Betweenness centrality from a single source, Brandes style.
//!
//! A forward phase runs BFS rounds over the out-graph accumulating the
//! number of shortest paths per vertex and keeping each round's frontier.
//! The backward phase replays the rounds in reverse over the in-graph,
//! accumulating dependency scores.

use rayon::prelude::*;

use crate::algorithms::{atomic_f32_array, AtomicF32};
use crate::engine::edge_map::edge_map;
use crate::engine::vertex_ops::vertex_map;
use crate::frontier::bitmap::Bitmap;
use crate::runtime::Runtime;
use crate::storage::DiskGraph;
use crate::types::{DirectEdgeOp, EdgeOp, Vid, NO_OUTPUT};
use crate::Frontier;

/// Configuration for one betweenness-centrality run.
///
/// # Fields
/// * `start_node` - Source of the shortest-path exploration
pub struct BcConfig {
    pub start_node: Vid,
}

/// Forward-phase edge function: accumulate shortest-path counts into
/// unvisited destinations.
struct BcForward<'a> {
    num_paths: &'a [AtomicF32],
    visited: &'a Bitmap,
}

impl EdgeOp for BcForward<'_> {
    #[inline]
    fn cond(&self, dst: Vid) -> bool {
        !self.visited.get_bit(dst as usize)
    }
}

impl DirectEdgeOp for BcForward<'_> {
    #[inline]
    fn update_atomic(&self, src: Vid, dst: Vid) -> bool {
        let old = self.num_paths[dst as usize].fetch_add(self.num_paths[src as usize].load());
        old == 0.0
    }
}

/// Backward-phase edge function: accumulate dependency mass over the
/// transposed edges.
struct BcBackward<'a> {
    dependencies: &'a [AtomicF32],
    visited: &'a Bitmap,
}

impl EdgeOp for BcBackward<'_> {
    #[inline]
    fn cond(&self, dst: Vid) -> bool {
        !self.visited.get_bit(dst as usize)
    }
}

impl DirectEdgeOp for BcBackward<'_> {
    #[inline]
    fn update_atomic(&self, src: Vid, dst: Vid) -> bool {
        let old =
            self.dependencies[dst as usize].fetch_add(self.dependencies[src as usize].load());
        old == 0.0
    }
}

/// Computes the dependency score of every vertex for shortest paths from
/// `config.start_node`.
///
/// The forward phase runs BFS rounds over the out-graph, counting
/// shortest paths and recording each level's frontier. The backward phase
/// replays the levels deepest-first over the in-graph, accumulating
/// dependencies, and finally rescales them into the standard scores.
///
/// # Arguments
/// * `rt` - Runtime owning the worker pools and fan-out queues
/// * `out_graph` - Forward edge store
/// * `in_graph` - Transposed edge store of the same graph
/// * `config` - Source vertex
///
/// # Returns
/// One dependency score per vertex; vertices unreachable from the source
/// end up with a NaN score.
///
/// # Panics
/// * If the stores disagree on the vertex count or the start vertex is out
///   of range
pub fn bc(rt: &Runtime, out_graph: &DiskGraph, in_graph: &DiskGraph, config: BcConfig) -> Vec<f32> {
    let n = out_graph.num_nodes();
    assert_eq!(n, in_graph.num_nodes(), "graph and transpose disagree on size");
    assert!((config.start_node as usize) < n, "start node out of range");

    let num_paths = atomic_f32_array(n, 0.0);
    let dependencies = atomic_f32_array(n, 0.0);
    let inverse_num_paths = atomic_f32_array(n, 0.0);
    let visited = Bitmap::new(n);

    num_paths[config.start_node as usize].store(1.0);
    visited.set_bit(config.start_node as usize);

    let mut frontier = Frontier::new(n);
    frontier.activate(config.start_node);

    // Forward phase: BFS rounds, keeping every round's frontier.
    let mut levels: Vec<Frontier> = Vec::new();
    levels.push(frontier);
    loop {
        let current = levels.last_mut().expect("levels never empty");
        if current.is_empty() {
            break;
        }
        let func = BcForward {
            num_paths: &num_paths,
            visited: &visited,
        };
        let output = edge_map(rt, out_graph, Some(current), &func, 0)
            .expect("forward rounds request an output frontier");
        vertex_map(&output, |v| visited.set_bit_atomic(v as usize));
        levels.push(output);
    }
    // The final, empty frontier is not a level.
    levels.pop();

    (0..n).into_par_iter().for_each(|v| {
        dependencies[v].store(0.0);
        inverse_num_paths[v].store(1.0 / num_paths[v].load());
    });

    visited.reset_parallel();

    let back_vertex = |v: Vid| {
        visited.set_bit_atomic(v as usize);
        dependencies[v as usize].fetch_add(inverse_num_paths[v as usize].load());
    };

    let mut frontier = levels.pop().expect("source level always exists");
    vertex_map(&frontier, back_vertex);

    // Backward phase over the transposed graph, deepest level first.
    while let Some(previous) = levels.pop() {
        let func = BcBackward {
            dependencies: &dependencies,
            visited: &visited,
        };
        edge_map(rt, in_graph, Some(&mut frontier), &func, NO_OUTPUT);
        frontier = previous;
        vertex_map(&frontier, back_vertex);
    }

    (0..n)
        .map(|v| {
            let inv = inverse_num_paths[v].load();
            (dependencies[v].load() - inv) / inv
        })
        .collect()
}

#[cfg(test)]
mod test_bc {
    use super::*;

    #[test]
    fn test_forward_op_counts_paths() {
        let num_paths = atomic_f32_array(3, 0.0);
        num_paths[0].store(1.0);
        num_paths[1].store(2.0);
        let visited = Bitmap::new(3);
        let func = BcForward {
            num_paths: &num_paths,
            visited: &visited,
        };

        // First contribution reports a fresh vertex, later ones do not.
        assert!(func.update_atomic(0, 2));
        assert!(!func.update_atomic(1, 2));
        assert_eq!(num_paths[2].load(), 3.0);

        visited.set_bit(2);
        assert!(!func.cond(2));
    }
}
