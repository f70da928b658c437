//! k-core decomposition by iterated peeling.
//!
//! For each k, vertices whose remaining undirected degree drops below k are
//! removed and their neighbours' degrees decremented through `edge_map`
//! rounds over both edge directions, until a fixed point. The last k with a
//! non-empty remainder is the largest core.

use std::sync::atomic::{AtomicI32, Ordering};

use rustc_hash::FxHashMap;

use crate::algorithms::atomic_u32_array;
use crate::engine::edge_map::edge_map;
use crate::engine::vertex_ops::vertex_filter;
use crate::runtime::Runtime;
use crate::storage::DiskGraph;
use crate::types::{DirectEdgeOp, EdgeOp, Vid, NO_OUTPUT};
use crate::Frontier;

/// Configuration for one k-core run.
///
/// # Fields
/// * `min_k` - First peeling level probed
/// * `max_k` - Last peeling level probed
pub struct KcoreConfig {
    pub min_k: u32,
    pub max_k: u32,
}

impl Default for KcoreConfig {
    fn default() -> Self {
        Self {
            min_k: 1,
            max_k: 10000,
        }
    }
}

/// Edge function of the peeling rounds: each edge from a removed vertex
/// decrements its destination's remaining degree.
struct UpdateDegree<'a> {
    degrees: &'a [AtomicI32],
}

impl EdgeOp for UpdateDegree<'_> {
    #[inline]
    fn cond(&self, dst: Vid) -> bool {
        self.degrees[dst as usize].load(Ordering::Relaxed) > 0
    }
}

impl DirectEdgeOp for UpdateDegree<'_> {
    #[inline]
    fn update(&self, _src: Vid, dst: Vid) -> bool {
        self.degrees[dst as usize].fetch_sub(1, Ordering::Relaxed);
        true
    }

    #[inline]
    fn update_atomic(&self, _src: Vid, dst: Vid) -> bool {
        self.degrees[dst as usize].fetch_sub(1, Ordering::Relaxed);
        true
    }
}

/// Peels the graph level by level.
///
/// For each k, vertices whose remaining undirected degree falls below k
/// are removed and their neighbours decremented over both edge directions
/// until a fixed point; the loop ends when the remainder empties or
/// `max_k` is exhausted.
///
/// # Arguments
/// * `rt` - Runtime owning the worker pools and fan-out queues
/// * `out_graph` - Forward edge store
/// * `in_graph` - Transposed edge store of the same graph
/// * `config` - Peeling level range
///
/// # Returns
/// `(largest_core, core_numbers)`: the last non-empty level and the level
/// at which each vertex was removed.
///
/// # Panics
/// * If the two stores disagree on the vertex count
pub fn kcore(
    rt: &Runtime,
    out_graph: &DiskGraph,
    in_graph: &DiskGraph,
    config: KcoreConfig,
) -> (u32, Vec<u32>) {
    let n = out_graph.num_nodes();
    assert_eq!(n, in_graph.num_nodes(), "graph and transpose disagree on size");

    let core_numbers = atomic_u32_array(n, 0);
    let degrees: Vec<AtomicI32> = (0..n)
        .map(|v| {
            AtomicI32::new(
                out_graph.degree(v as Vid) as i32 + in_graph.degree(v as Vid) as i32,
            )
        })
        .collect();

    let mut frontier = Frontier::new(n);
    frontier.activate_all();

    let mut k = config.min_k;
    while k <= config.max_k {
        loop {
            let mut to_remove = vertex_filter(&frontier, |v| {
                let v = v as usize;
                if degrees[v].load(Ordering::Relaxed) < k as i32 {
                    core_numbers[v].store(k - 1, Ordering::Relaxed);
                    degrees[v].store(0, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            });
            frontier = vertex_filter(&frontier, |v| {
                degrees[v as usize].load(Ordering::Relaxed) >= k as i32
            });

            // Fixed point for this k.
            if to_remove.count() == 0 {
                break;
            }

            let func = UpdateDegree { degrees: &degrees };
            edge_map(rt, out_graph, Some(&mut to_remove), &func, NO_OUTPUT);
            edge_map(rt, in_graph, Some(&mut to_remove), &func, NO_OUTPUT);
        }
        if frontier.count() == 0 {
            break;
        }
        k += 1;
    }
    let largest_core = k.saturating_sub(1);

    println!("Largest core is {}", largest_core);
    print_core_histogram(&core_numbers);

    (
        largest_core,
        core_numbers
            .into_iter()
            .map(std::sync::atomic::AtomicU32::into_inner)
            .collect(),
    )
}

fn print_core_histogram(core_numbers: &[std::sync::atomic::AtomicU32]) {
    let mut histogram: FxHashMap<u32, u64> = FxHashMap::default();
    for core in core_numbers {
        *histogram.entry(core.load(Ordering::Relaxed)).or_default() += 1;
    }
    let mut levels: Vec<_> = histogram.into_iter().collect();
    levels.sort_unstable();
    for (core, count) in levels {
        println!("core {}: {} vertices", core, count);
    }
}
