//! Breadth-first search.
//!
//! Every vertex records the vertex it was first reached from. The direct
//! variant claims parents with a compare-and-swap per edge; the
//! propagation-blocking variant scatters the source id and lets gather
//! perform the first-writer-wins store.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::algorithms::atomic_u32_array;
use crate::engine::bins::Bins;
use crate::engine::edge_map::{edge_map, edge_map_pb};
use crate::runtime::Runtime;
use crate::storage::DiskGraph;
use crate::types::{DirectEdgeOp, EdgeOp, PbEdgeOp, Vid};
use crate::Frontier;

/// Parent value of vertices the search has not reached.
pub const UNVISITED: Vid = Vid::MAX;

/// Configuration for one BFS run.
///
/// With `bins` set, rounds go through the propagation-blocking pathway;
/// otherwise the direct pathway claims parents in place.
///
/// # Fields
/// * `start_node` - Source vertex of the search
/// * `bins` - Bins collection for the propagation-blocking variant, or
///   `None` for the direct variant
pub struct BfsConfig<'a> {
    pub start_node: Vid,
    pub bins: Option<&'a Bins>,
}

/// Direct-path edge function: each edge tries to claim an unvisited
/// destination with a compare-and-swap on its parent slot.
struct BfsDirect<'a> {
    parents: &'a [AtomicU32],
}

impl EdgeOp for BfsDirect<'_> {
    #[inline]
    fn cond(&self, dst: Vid) -> bool {
        self.parents[dst as usize].load(Ordering::Relaxed) == UNVISITED
    }
}

impl DirectEdgeOp for BfsDirect<'_> {
    #[inline]
    fn update(&self, src: Vid, dst: Vid) -> bool {
        if self.parents[dst as usize].load(Ordering::Relaxed) == UNVISITED {
            self.parents[dst as usize].store(src, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    #[inline]
    fn update_atomic(&self, src: Vid, dst: Vid) -> bool {
        self.parents[dst as usize]
            .compare_exchange(UNVISITED, src, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

/// Propagation-blocking edge function: scatter carries the source id and
/// gather performs the first-writer-wins parent store.
struct BfsPb<'a> {
    parents: &'a [AtomicU32],
    bins: &'a Bins,
}

impl EdgeOp for BfsPb<'_> {
    #[inline]
    fn cond(&self, dst: Vid) -> bool {
        self.parents[dst as usize].load(Ordering::Relaxed) == UNVISITED
    }
}

impl PbEdgeOp for BfsPb<'_> {
    type Value = u32;

    #[inline]
    fn scatter(&self, src: Vid, _dst: Vid) -> u32 {
        src
    }

    #[inline]
    fn gather(&self, dst: Vid, val: u32) -> bool {
        if self.parents[dst as usize].load(Ordering::Relaxed) == UNVISITED {
            self.parents[dst as usize].store(val, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn bins(&self) -> &Bins {
        self.bins
    }
}

/// Runs a breadth-first search from `config.start_node`.
///
/// One `edge_map` round per BFS level; the output frontier of each round
/// is the next level. The source is its own parent.
///
/// # Arguments
/// * `rt` - Runtime owning the worker pools and fan-out queues
/// * `graph` - On-disk graph whose out edges are traversed
/// * `config` - Source vertex and optional bins
///
/// # Returns
/// The parent of every vertex; unreached vertices keep [`UNVISITED`].
///
/// # Panics
/// * If the start vertex is out of range
pub fn bfs(rt: &Runtime, graph: &DiskGraph, config: BfsConfig<'_>) -> Vec<Vid> {
    let n = graph.num_nodes();
    assert!((config.start_node as usize) < n, "start node out of range");

    let parents = atomic_u32_array(n, UNVISITED);
    parents[config.start_node as usize].store(config.start_node, Ordering::Relaxed);

    let mut frontier = Frontier::new(n);
    frontier.activate(config.start_node);

    while !frontier.is_empty() {
        let output = match config.bins {
            Some(bins) => {
                let func = BfsPb {
                    parents: &parents,
                    bins,
                };
                edge_map_pb(rt, graph, Some(&mut frontier), &func, 0)
            }
            None => {
                let func = BfsDirect { parents: &parents };
                edge_map(rt, graph, Some(&mut frontier), &func, 0)
            }
        };
        frontier = output.expect("bfs rounds always request an output frontier");
    }

    parents.into_iter().map(AtomicU32::into_inner).collect()
}

#[cfg(test)]
mod test_bfs {
    use super::*;

    #[test]
    fn test_direct_update_claims_parent_exactly_once() {
        let parents = atomic_u32_array(4, UNVISITED);
        let func = BfsDirect { parents: &parents };
        assert!(func.cond(2));
        assert!(func.update_atomic(0, 2));
        // The second claim must lose.
        assert!(!func.update_atomic(1, 2));
        assert!(!func.cond(2));
        assert_eq!(parents[2].load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_gather_is_first_writer_wins() {
        let parents = atomic_u32_array(4, UNVISITED);
        let bins = Bins::new(4, 2 * 2 * 16 * 8, 2, 2);
        let func = BfsPb {
            parents: &parents,
            bins: &bins,
        };
        assert!(func.gather(3, 1));
        assert!(!func.gather(3, 2));
        assert_eq!(parents[3].load(Ordering::Relaxed), 1);
    }
}
