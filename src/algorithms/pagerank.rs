//! Delta PageRank over the propagation-blocking pathway.
//!
//! Each round scatters every active vertex's delta split across its out
//! edges; gather accumulates neighbour sums, and a vertex-side apply turns
//! them into the next round's deltas. Iteration stops when the total
//! absolute delta falls under a global threshold.

use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::algorithms::{atomic_f32_array, AtomicF32};
use crate::engine::bins::Bins;
use crate::engine::edge_map::edge_map_pb;
use crate::engine::vertex_ops::vertex_filter_all;
use crate::runtime::Runtime;
use crate::storage::DiskGraph;
use crate::types::{EdgeOp, PbEdgeOp, Vid, NO_OUTPUT};
use crate::Frontier;

/// Configuration for one PageRank run.
///
/// # Fields
/// * `damping` - Damping factor applied to propagated mass
/// * `epsilon` - Per-vertex activation threshold, relative to the vertex's
///   current score
/// * `epsilon2` - Global termination threshold on the total absolute delta
/// * `max_iterations` - Hard cap on the number of rounds
pub struct PageRankConfig {
    pub damping: f32,
    /// Per-vertex activation threshold, relative to the vertex's score.
    pub epsilon: f32,
    /// Global termination threshold on the total absolute delta.
    pub epsilon2: f32,
    pub max_iterations: u32,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            epsilon: 1.0e-2,
            epsilon2: 1.0e-7,
            max_iterations: 1000,
        }
    }
}

/// Edge function of one round: scatter divides the source's delta across
/// its out edges, gather folds the share into the destination's sum.
struct PrOp<'a> {
    graph: &'a DiskGraph,
    delta: &'a [AtomicF32],
    ngh_sum: &'a [AtomicF32],
    bins: &'a Bins,
}

impl EdgeOp for PrOp<'_> {}

impl PbEdgeOp for PrOp<'_> {
    type Value = f32;

    /// Produces the delta share carried along one edge.
    ///
    /// # Arguments
    /// * `src` - Source vertex whose delta is being distributed
    ///
    /// # Returns
    /// The source's delta divided by its out-degree.
    #[inline]
    fn scatter(&self, src: Vid, _dst: Vid) -> f32 {
        self.delta[src as usize].load() / self.graph.degree(src) as f32
    }

    /// Accumulates one delta share into the destination's neighbour sum.
    ///
    /// # Arguments
    /// * `dst` - Destination vertex receiving the share
    /// * `val` - Payload produced by `scatter`
    ///
    /// # Returns
    /// Always true; activation is decided by the vertex apply, not here.
    #[inline]
    fn gather(&self, dst: Vid, val: f32) -> bool {
        self.ngh_sum[dst as usize].fetch_add(val);
        true
    }

    fn bins(&self) -> &Bins {
        self.bins
    }
}

/// Runs PageRank until convergence or `max_iterations`.
///
/// Starts from the uniform distribution and iterates: one edge-map round
/// over the active frontier, then a whole-graph vertex apply that turns
/// the accumulated neighbour sums into the next deltas and keeps only the
/// vertices whose delta is still significant relative to their score.
///
/// # Arguments
/// * `rt` - Runtime owning the worker pools and fan-out queues
/// * `graph` - On-disk graph whose out edges distribute the mass
/// * `bins` - Destination-range bins used by the scatter/gather pathway
/// * `config` - Damping, thresholds and the iteration cap
///
/// # Returns
/// The converged score of every vertex.
pub fn pagerank(
    rt: &Runtime,
    graph: &DiskGraph,
    bins: &Bins,
    config: PageRankConfig,
) -> Vec<f32> {
    let n = graph.num_nodes();
    let one_over_n = 1.0 / n as f32;

    let score = atomic_f32_array(n, 0.0);
    let delta = atomic_f32_array(n, one_over_n);
    let ngh_sum = atomic_f32_array(n, 0.0);

    let mut frontier = Frontier::new(n);
    frontier.activate_all();

    let mut iter = 0u32;
    while iter < config.max_iterations {
        iter += 1;

        let func = PrOp {
            graph,
            delta: &delta,
            ngh_sum: &ngh_sum,
            bins,
        };
        edge_map_pb(rt, graph, Some(&mut frontier), &func, NO_OUTPUT);

        let damping = config.damping;
        let epsilon = config.epsilon;
        let added_constant = (1.0 - damping) * one_over_n;

        // The first round folds in the teleport constant and re-centers the
        // delta; later rounds only damp the received sum.
        let active = if iter == 1 {
            vertex_filter_all(n, |v| {
                let v = v as usize;
                let mut d = damping * self_sum(&ngh_sum[v]) + added_constant;
                score[v].fetch_add(d);
                d -= one_over_n;
                delta[v].store(d);
                d.abs() > epsilon * score[v].load()
            })
        } else {
            vertex_filter_all(n, |v| {
                let v = v as usize;
                let d = self_sum(&ngh_sum[v]) * damping;
                if d.abs() > epsilon * score[v].load() {
                    delta[v].store(d);
                    score[v].fetch_add(d);
                    true
                } else {
                    delta[v].store(d);
                    false
                }
            })
        };

        let total_delta: f32 = (0..n)
            .into_par_iter()
            .map(|v| delta[v].load().abs())
            .sum();
        if total_delta < config.epsilon2 {
            break;
        }

        frontier = active;
        bins.reset();
    }

    score.into_iter().map(|s| s.load()).collect()
}

/// Takes the accumulated neighbour sum and clears the cell.
#[inline]
fn self_sum(cell: &AtomicF32) -> f32 {
    let sum = cell.load();
    cell.store(0.0);
    sum
}

/// Prints the `topn` highest-scoring vertices, best first.
///
/// NaN scores are skipped. When scores tie at the cutoff, higher ids are
/// evicted first, so the lower ids survive into the printed set; tied
/// survivors are printed in ascending id order.
///
/// # Arguments
/// * `scores` - One score per vertex, indexed by vertex id
/// * `topn` - Number of entries to keep and print
pub fn print_top(scores: &[f32], topn: usize) {
    let mut heap: BinaryHeap<Reverse<(OrderedScore, Reverse<Vid>)>> = BinaryHeap::new();
    for (v, &s) in scores.iter().enumerate() {
        if s.is_nan() {
            continue;
        }
        heap.push(Reverse((OrderedScore(s), Reverse(v as Vid))));
        if heap.len() > topn {
            heap.pop();
        }
    }
    let mut top: Vec<(f32, Vid)> = heap
        .into_iter()
        .map(|Reverse((s, Reverse(v)))| (s.0, v))
        .collect();
    top.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    println!("Rank Score Id");
    for (rank, (value, node)) in top.into_iter().enumerate() {
        println!("{:3}: {:20.10} {:10}", rank + 1, value, node);
    }
}

/// Total-order wrapper so scores can live in a heap.
#[derive(PartialEq, Clone, Copy)]
struct OrderedScore(f32);

impl Eq for OrderedScore {}

impl PartialOrd for OrderedScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[cfg(test)]
mod test_pagerank {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PageRankConfig::default();
        assert_eq!(config.damping, 0.85);
        assert!(config.epsilon > config.epsilon2);
    }

    #[test]
    fn test_self_sum_clears_cell() {
        let cell = AtomicF32::new(2.5);
        assert_eq!(self_sum(&cell), 2.5);
        assert_eq!(cell.load(), 0.0);
    }

    #[test]
    fn test_tied_scores_keep_lower_ids() {
        // Five tied scores into a top-3: the survivors are the three
        // lowest ids.
        let scores = vec![1.0f32; 5];
        let mut heap: BinaryHeap<Reverse<(OrderedScore, Reverse<Vid>)>> = BinaryHeap::new();
        for (v, &s) in scores.iter().enumerate() {
            heap.push(Reverse((OrderedScore(s), Reverse(v as Vid))));
            if heap.len() > 3 {
                heap.pop();
            }
        }
        let mut kept: Vec<Vid> = heap.into_iter().map(|Reverse((_, Reverse(v)))| v).collect();
        kept.sort_unstable();
        assert_eq!(kept, vec![0, 1, 2]);
    }
}
