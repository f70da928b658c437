//! Iterated sparse matrix-vector product.
//!
//! Treats the adjacency structure as a sparse matrix with a uniform weight
//! of 2 on every stored entry: each iteration every vertex scatters twice
//! its value along its out edges and then replaces its value with the sum
//! received from its in-neighbours. Runs over the propagation-blocking
//! pathway with no frontier, so every page is streamed each iteration.

use crate::algorithms::{atomic_f32_array, AtomicF32};
use crate::engine::bins::Bins;
use crate::engine::edge_map::edge_map_pb;
use crate::engine::vertex_ops::vertex_map_all;
use crate::runtime::Runtime;
use crate::storage::DiskGraph;
use crate::types::{EdgeOp, PbEdgeOp, Vid, NO_OUTPUT};

/// Uniform weight applied to every matrix entry.
const ENTRY_WEIGHT: f32 = 2.0;

/// Configuration for one SpMV run.
///
/// # Fields
/// * `max_iterations` - Number of products applied to the vector.
pub struct SpmvConfig {
    pub max_iterations: u32,
}

impl Default for SpmvConfig {
    fn default() -> Self {
        Self { max_iterations: 20 }
    }
}

/// Edge function of the product: scatter carries the weighted source value,
/// gather folds it into the destination's running sum.
struct SpmvOp<'a> {
    value: &'a [AtomicF32],
    ngh_sum: &'a [AtomicF32],
    bins: &'a Bins,
}

impl EdgeOp for SpmvOp<'_> {}

impl PbEdgeOp for SpmvOp<'_> {
    type Value = f32;

    /// Produces the payload propagated along one matrix entry.
    ///
    /// # Arguments
    /// * `src` - Row vertex whose current value is being propagated
    ///
    /// # Returns
    /// The source value scaled by the uniform entry weight.
    #[inline]
    fn scatter(&self, src: Vid, _dst: Vid) -> f32 {
        self.value[src as usize].load() * ENTRY_WEIGHT
    }

    /// Accumulates one propagated value into the destination's sum.
    ///
    /// # Arguments
    /// * `dst` - Column vertex receiving the contribution
    /// * `val` - Payload produced by `scatter`
    ///
    /// # Returns
    /// Always true; activation is irrelevant under `NO_OUTPUT`.
    #[inline]
    fn gather(&self, dst: Vid, val: f32) -> bool {
        self.ngh_sum[dst as usize].fetch_add(val);
        true
    }

    fn bins(&self) -> &Bins {
        self.bins
    }
}

/// Runs `max_iterations` products starting from the all-ones vector.
///
/// Each iteration streams the whole edge file (no frontier), accumulates
/// the weighted neighbour sums through the bins, and then swaps the sums in
/// as the next vector.
///
/// # Arguments
/// * `rt` - Runtime owning the worker pools and fan-out queues
/// * `graph` - On-disk matrix in adjacency form
/// * `bins` - Destination-range bins used by the scatter/gather pathway
/// * `config` - Iteration count
///
/// # Returns
/// The vector after the final iteration, one `f32` per vertex.
pub fn spmv(rt: &Runtime, graph: &DiskGraph, bins: &Bins, config: SpmvConfig) -> Vec<f32> {
    let n = graph.num_nodes();
    let value = atomic_f32_array(n, 1.0);
    let ngh_sum = atomic_f32_array(n, 0.0);

    for _ in 0..config.max_iterations {
        let func = SpmvOp {
            value: &value,
            ngh_sum: &ngh_sum,
            bins,
        };
        edge_map_pb(rt, graph, None, &func, NO_OUTPUT);

        // The accumulated sum becomes the next vector.
        vertex_map_all(n, |v| {
            let v = v as usize;
            value[v].store(ngh_sum[v].load());
            ngh_sum[v].store(0.0);
        });

        bins.reset();
    }

    value.into_iter().map(|v| v.load()).collect()
}
