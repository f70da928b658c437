//! End-to-end rounds over real on-disk graphs: algorithm scenarios, the
//! direct/propagation-blocking equivalence, and the flow-control
//! invariants of the I/O pipeline.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use riptide::algorithms::bc::{bc, BcConfig};
use riptide::algorithms::bfs::{bfs, BfsConfig, UNVISITED};
use riptide::algorithms::kcore::{kcore, KcoreConfig};
use riptide::algorithms::pagerank::{pagerank, PageRankConfig};
use riptide::algorithms::spmv::{spmv, SpmvConfig};
use riptide::algorithms::wcc::{find_largest, wcc};
use riptide::config::PAGE_SIZE;
use riptide::engine::bins::Bins;
use riptide::storage::convert::GraphData;
use riptide::types::{DirectEdgeOp, EdgeOp, Vid, NO_OUTPUT};
use riptide::{edge_map, DiskGraph, Frontier, Runtime};

/// Writes `graph` into a temp dir and opens it striped over `devices`.
fn open_graph(graph: &GraphData, devices: usize) -> (tempfile::TempDir, DiskGraph) {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = dir.path().join("g.index");
    let adj: Vec<_> = (0..devices)
        .map(|i| dir.path().join(format!("g.adj.{}.{}", devices, i)))
        .collect();
    graph.write_files(&index, &adj);
    let disk = DiskGraph::build(index, &adj);
    (dir, disk)
}

fn open_with_transpose(
    graph: &GraphData,
    devices: usize,
) -> (tempfile::TempDir, DiskGraph, DiskGraph) {
    let dir = tempfile::tempdir().expect("tempdir");
    let out_index = dir.path().join("out.index");
    let out_adj: Vec<_> = (0..devices)
        .map(|i| dir.path().join(format!("out.adj.{}.{}", devices, i)))
        .collect();
    graph.write_files(&out_index, &out_adj);

    let transposed = graph.transpose();
    let in_index = dir.path().join("in.index");
    let in_adj: Vec<_> = (0..devices)
        .map(|i| dir.path().join(format!("in.adj.{}.{}", devices, i)))
        .collect();
    transposed.write_files(&in_index, &in_adj);

    let out_graph = DiskGraph::build(out_index, &out_adj);
    let in_graph = DiskGraph::build(in_index, &in_adj);
    (dir, out_graph, in_graph)
}

fn diamond() -> GraphData {
    GraphData::from_edges(5, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)])
}

/// Deterministic pseudo-random graph.
fn random_graph(num_nodes: usize, num_edges: usize, seed: u64) -> GraphData {
    let mut state = seed;
    let mut next = || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 33) as u32
    };
    let edges: Vec<(Vid, Vid)> = (0..num_edges)
        .map(|_| (next() % num_nodes as u32, next() % num_nodes as u32))
        .collect();
    GraphData::from_edges(num_nodes, &edges)
}

fn small_bins(num_nodes: usize) -> Bins {
    // 16 bins of 2x256 records each.
    Bins::new(num_nodes, 16 * 2 * 256 * 8, 16, 8)
}

#[test]
fn test_bfs_diamond_parents() {
    let (_dir, graph) = open_graph(&diamond(), 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);

    let parents = bfs(
        &rt,
        &graph,
        BfsConfig {
            start_node: 0,
            bins: None,
        },
    );

    assert_eq!(parents[0], 0);
    assert_eq!(parents[1], 0);
    assert_eq!(parents[2], 0);
    assert!(parents[3] == 1 || parents[3] == 2);
    assert_eq!(parents[4], 3);
}

#[test]
fn test_bfs_diamond_parents_prop_blocking() {
    let (_dir, graph) = open_graph(&diamond(), 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);
    let bins = small_bins(5);

    let parents = bfs(
        &rt,
        &graph,
        BfsConfig {
            start_node: 0,
            bins: Some(&bins),
        },
    );

    assert_eq!(parents[0], 0);
    assert_eq!(parents[1], 0);
    assert_eq!(parents[2], 0);
    assert!(parents[3] == 1 || parents[3] == 2);
    assert_eq!(parents[4], 3);
}

#[test]
fn test_bfs_ignores_other_component_and_isolated_vertices() {
    // Vertex 5 is isolated, vertices 6/7 form a separate component.
    let graph = GraphData::from_edges(8, &[(0, 1), (1, 2), (6, 7)]);
    let (_dir, disk) = open_graph(&graph, 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);

    let parents = bfs(
        &rt,
        &disk,
        BfsConfig {
            start_node: 0,
            bins: None,
        },
    );

    assert_eq!(parents[2], 1);
    for v in [3usize, 4, 5, 6, 7] {
        assert_eq!(parents[v], UNVISITED, "vertex {} must stay unreached", v);
    }
}

#[test]
fn test_wcc_two_components() {
    // Undirected {(0,1),(1,2),(3,4)} stored as both directions.
    let graph = GraphData::from_edges(5, &[(0, 1), (1, 0), (1, 2), (2, 1), (3, 4), (4, 3)]);
    let (_dir, out_graph, in_graph) = open_with_transpose(&graph, 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);

    let ids = wcc(&rt, &out_graph, &in_graph);
    assert_eq!(ids, vec![0, 0, 0, 3, 3]);

    let (largest, size) = find_largest(&ids);
    assert_eq!(largest, 0);
    assert_eq!(size, 3);
}

#[test]
fn test_pagerank_ring_converges_symmetric() {
    let ring = GraphData::from_edges(4, &[(0, 1), (1, 2), (2, 3), (3, 0)]);
    let (_dir, graph) = open_graph(&ring, 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);
    let bins = small_bins(4);

    let scores = pagerank(
        &rt,
        &graph,
        &bins,
        PageRankConfig {
            damping: 0.85,
            epsilon: 1e-2,
            epsilon2: 1e-7,
            max_iterations: 100,
        },
    );

    let max = scores.iter().cloned().fold(f32::MIN, f32::max);
    let min = scores.iter().cloned().fold(f32::MAX, f32::min);
    assert!(
        max - min < 1e-2,
        "ring scores must agree within epsilon: {:?}",
        scores
    );
    // Scores on a ring stay near the uniform distribution.
    for s in scores {
        assert!((s - 0.25).abs() < 0.05, "score {} far from 1/4", s);
    }
}

#[test]
fn test_kcore_k4_minus_edge() {
    // K4 without the (0,1) edge, one direction per undirected edge.
    let graph = GraphData::from_edges(4, &[(0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
    let (_dir, out_graph, in_graph) = open_with_transpose(&graph, 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);

    let (largest, cores) = kcore(
        &rt,
        &out_graph,
        &in_graph,
        KcoreConfig {
            min_k: 1,
            max_k: 100,
        },
    );
    assert_eq!(largest, 2);
    assert_eq!(cores.len(), 4);
}

#[test]
fn test_spmv_weighted_in_degrees_on_first_iteration() {
    // One iteration over the all-ones vector yields each vertex's
    // in-degree times the uniform entry weight of 2.
    let graph = GraphData::from_edges(4, &[(0, 1), (2, 1), (3, 1), (1, 2)]);
    let (_dir, disk) = open_graph(&graph, 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);
    let bins = small_bins(4);

    let result = spmv(&rt, &disk, &bins, SpmvConfig { max_iterations: 1 });
    assert_eq!(result, vec![0.0, 6.0, 2.0, 0.0]);
}

#[test]
fn test_bc_diamond_dependencies() {
    let (_dir, out_graph, in_graph) = open_with_transpose(&diamond(), 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);

    let scores = bc(&rt, &out_graph, &in_graph, BcConfig { start_node: 0 });

    let expected = [4.0f32, 1.0, 1.0, 1.0, 0.0];
    for (v, (&got, &want)) in scores.iter().zip(expected.iter()).enumerate() {
        assert!(
            (got - want).abs() < 1e-4,
            "vertex {}: dependency {} != {}",
            v,
            got,
            want
        );
    }
}

#[test]
fn test_direct_and_pb_paths_agree_on_random_graph() {
    let graph = random_graph(512, 8000, 0xfeed);
    let (_dir, disk) = open_graph(&graph, 2);
    let rt = Runtime::new(4, 2, 64 * PAGE_SIZE as u64);
    let bins = small_bins(512);

    let direct = bfs(
        &rt,
        &disk,
        BfsConfig {
            start_node: 0,
            bins: None,
        },
    );
    let pb = bfs(
        &rt,
        &disk,
        BfsConfig {
            start_node: 0,
            bins: Some(&bins),
        },
    );

    let reached_direct: HashSet<usize> = direct
        .iter()
        .enumerate()
        .filter(|(_, &p)| p != UNVISITED)
        .map(|(v, _)| v)
        .collect();
    let reached_pb: HashSet<usize> = pb
        .iter()
        .enumerate()
        .filter(|(_, &p)| p != UNVISITED)
        .map(|(v, _)| v)
        .collect();
    assert_eq!(reached_direct, reached_pb);

    // Parents form a tree inside the component: every reached vertex other
    // than the root is a disk-backed out-neighbour of its parent.
    for &v in &reached_direct {
        if v == 0 {
            continue;
        }
        let parent = direct[v];
        assert!(reached_direct.contains(&(parent as usize)));
        assert!(
            disk.edges_of(parent).contains(&(v as Vid)),
            "parent {} has no edge to {}",
            parent,
            v
        );
    }
}

#[test]
fn test_multi_device_striping_matches_single_device() {
    let graph = random_graph(300, 6000, 0xabcd);
    let (_dir1, one) = open_graph(&graph, 1);
    let (_dir3, three) = open_graph(&graph, 3);
    let rt1 = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);
    let rt3 = Runtime::new(3, 3, 64 * PAGE_SIZE as u64);

    let a = bfs(&rt1, &one, BfsConfig { start_node: 7, bins: None });
    let b = bfs(&rt3, &three, BfsConfig { start_node: 7, bins: None });

    let reached = |p: &[Vid]| {
        p.iter()
            .enumerate()
            .filter(|(_, &x)| x != UNVISITED)
            .map(|(v, _)| v)
            .collect::<HashSet<_>>()
    };
    assert_eq!(reached(&a), reached(&b));
}

/// Visits every admitted edge, counting hits per destination. Never
/// transitions state.
struct CountingOp<'a> {
    hits: &'a [AtomicU32],
    edges_seen: &'a AtomicU64,
    slow: bool,
}

impl EdgeOp for CountingOp<'_> {}

impl DirectEdgeOp for CountingOp<'_> {
    fn update_atomic(&self, _src: Vid, dst: Vid) -> bool {
        self.hits[dst as usize].fetch_add(1, Ordering::Relaxed);
        let seen = self.edges_seen.fetch_add(1, Ordering::Relaxed);
        if self.slow && seen % 1024 == 0 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        false
    }
}

#[test]
fn test_every_frontier_edge_visited_exactly_once() {
    let graph = random_graph(400, 9000, 0x5eed);
    let (_dir, disk) = open_graph(&graph, 2);
    let rt = Runtime::new(4, 2, 64 * PAGE_SIZE as u64);

    let members: Vec<Vid> = (0..400).filter(|v| v % 3 == 0).collect();
    let mut frontier = Frontier::new(400);
    for &v in &members {
        frontier.activate(v);
    }

    let n = disk.num_nodes();
    let hits: Vec<AtomicU32> = (0..n).map(|_| AtomicU32::new(0)).collect();
    let edges_seen = AtomicU64::new(0);
    let func = CountingOp {
        hits: &hits,
        edges_seen: &edges_seen,
        slow: false,
    };
    edge_map(&rt, &disk, Some(&mut frontier), &func, NO_OUTPUT);

    // Expected in-hits per destination, counting only frontier sources.
    let member_set: HashSet<Vid> = members.into_iter().collect();
    let mut expected = vec![0u32; n];
    for (src, neighbors) in graph.adj.iter().enumerate() {
        if member_set.contains(&(src as Vid)) {
            for &dst in neighbors {
                expected[dst as usize] += 1;
            }
        }
    }
    let got: Vec<u32> = hits.iter().map(|h| h.load(Ordering::Relaxed)).collect();
    assert_eq!(got, expected);

    // Invariant: page activations are cleared once the round returns.
    for device in 0..disk.num_devices() {
        assert_eq!(disk.activated_pages(device).count(), 0);
    }
}

#[test]
fn test_page_buffer_quota_never_exceeded() {
    // Graph large enough for ~100 pages on a single device.
    let graph = random_graph(256, 110_000, 0xbeef);
    let (_dir, disk) = open_graph(&graph, 1);
    assert!(disk.num_pages(0) >= 100);

    // Two pages of quota against a deliberately slow consumer.
    let rt = Runtime::new(1, 1, 2 * PAGE_SIZE as u64);

    let n = disk.num_nodes();
    let hits: Vec<AtomicU32> = (0..n).map(|_| AtomicU32::new(0)).collect();
    let edges_seen = AtomicU64::new(0);
    let func = CountingOp {
        hits: &hits,
        edges_seen: &edges_seen,
        slow: true,
    };
    edge_map(&rt, &disk, None, &func, NO_OUTPUT);

    // Every edge was delivered despite the tiny quota.
    assert_eq!(edges_seen.load(Ordering::Relaxed), disk.num_edges());

    // The free-page counter never went below zero: at no instant were more
    // than two pages outstanding.
    let marks = rt.last_min_free_pages();
    assert_eq!(marks.len(), 1);
    assert!(marks[0] >= 0, "quota overdrawn: min free pages {}", marks[0]);
}

#[test]
fn test_stateless_round_leaves_frontiers_reusable() {
    let graph = diamond();
    let (_dir, disk) = open_graph(&graph, 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);

    let n = disk.num_nodes();
    let hits: Vec<AtomicU32> = (0..n).map(|_| AtomicU32::new(0)).collect();
    let edges_seen = AtomicU64::new(0);

    let mut frontier = Frontier::new(n);
    frontier.activate(0);
    frontier.activate(3);

    let func = CountingOp {
        hits: &hits,
        edges_seen: &edges_seen,
        slow: false,
    };
    let out = edge_map(&rt, &disk, Some(&mut frontier), &func, 0);

    // The op never reports a transition, so nothing is activated.
    let out = out.expect("output requested");
    assert_eq!(out.count(), 0);
    assert!(out.is_empty());
    assert_eq!(edges_seen.load(Ordering::Relaxed), 3);

    // A second identical round over the same input frontier sees the same
    // edges again.
    edge_map(&rt, &disk, Some(&mut frontier), &func, NO_OUTPUT);
    assert_eq!(edges_seen.load(Ordering::Relaxed), 6);
}

#[test]
fn test_empty_frontier_round_is_a_no_op() {
    let (_dir, disk) = open_graph(&diamond(), 1);
    let rt = Runtime::new(2, 1, 64 * PAGE_SIZE as u64);

    let n = disk.num_nodes();
    let hits: Vec<AtomicU32> = (0..n).map(|_| AtomicU32::new(0)).collect();
    let edges_seen = AtomicU64::new(0);
    let func = CountingOp {
        hits: &hits,
        edges_seen: &edges_seen,
        slow: false,
    };

    let mut frontier = Frontier::new(n);
    let out = edge_map(&rt, &disk, Some(&mut frontier), &func, 0);
    assert!(out.expect("empty output frontier").is_empty());
    assert_eq!(edges_seen.load(Ordering::Relaxed), 0);
}
