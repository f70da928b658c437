//! The `edge_map` orchestrator.
//!
//! One call is one round: decide the frontier representation, mark the
//! pages to fetch, run the I/O + compute (or I/O + scatter + gather)
//! pipeline to completion, and hand back the freshly activated frontier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::DENSE_THRESHOLD;
use crate::engine::compute::ComputeWorker;
use crate::engine::io::{IoMode, IoWorker};
use crate::engine::pb::{GatherWorker, ScatterWorker};
use crate::engine::sync::Synchronization;
use crate::engine::vertex_ops::vertex_map;
use crate::frontier::bag::VertexBag;
use crate::frontier::Frontier;
use crate::runtime::Runtime;
use crate::storage::DiskGraph;
use crate::types::{should_output, DirectEdgeOp, Flags, PageId, PbEdgeOp, Vid};

/// How the input frontier is consumed this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontierKind {
    /// No input frontier: every page of the graph is read.
    DenseAll,
    /// Bitmap frontier driving the activated-page bitmaps.
    Dense,
    /// Bag frontier driving per-device sparse page lists.
    Sparse,
}

impl FrontierKind {
    fn name(self) -> &'static str {
        match self {
            FrontierKind::DenseAll => "dense_all",
            FrontierKind::Dense => "dense",
            FrontierKind::Sparse => "sparse",
        }
    }
}

/// Runs one direct-path round.
///
/// Prepares the frontier, marks the pages to fetch, then runs the I/O and
/// compute workers to completion and resets the page activations.
///
/// # Arguments
/// * `rt` - Runtime owning the worker pools and fan-out queues
/// * `graph` - Graph store the round streams from
/// * `frontier` - Active vertices, or `None` to activate every vertex
/// * `func` - User function applied to every admitted edge
/// * `flags` - `NO_OUTPUT` suppresses the output frontier
///
/// # Returns
/// The freshly activated frontier, or `None` when `NO_OUTPUT` suppressed
/// it. A round with no active edges returns an empty frontier.
///
/// # Panics
/// * If the frontier covers a different vertex count than the graph
/// * If there are fewer compute workers than devices
pub fn edge_map<F: DirectEdgeOp>(
    rt: &Runtime,
    graph: &DiskGraph,
    mut frontier: Option<&mut Frontier>,
    func: &F,
    flags: Flags,
) -> Option<Frontier> {
    assert!(
        rt.num_compute_workers() >= graph.num_devices(),
        "every device's fan-out queue needs a compute worker"
    );

    let Some(prep) = prepare_round(rt, graph, &mut frontier, flags) else {
        return Some(Frontier::new(graph.num_nodes()));
    };
    let RoundPrep {
        kind,
        activated_nodes,
        activated_edges,
        sparse_pages,
        out_frontier,
    } = prep;
    let in_frontier: Option<&Frontier> = frontier.map(|f| &*f);
    let out_ref = out_frontier.as_ref();

    let k = graph.num_devices();
    let sync = Synchronization::new(k);
    let mut page_lists = split_page_lists(sparse_pages);
    let mut io_bytes = 0u64;
    let mut io_time = 0.0f64;
    let mut compute_time = 0.0f64;
    let mut per_device_bytes = vec![0u64; k];

    std::thread::scope(|s| {
        let compute_start = Instant::now();
        let mut compute_handles = Vec::with_capacity(rt.num_compute_workers());
        for wid in 0..rt.num_compute_workers() {
            let worker = ComputeWorker::new(wid, graph, rt.queues(), in_frontier, out_ref);
            let sync = &sync;
            compute_handles.push(s.spawn(move || worker.run(func, sync)));
        }

        let mut io_handles = Vec::with_capacity(k);
        for device in 0..k {
            let mode = make_io_mode(kind, &mut page_lists, device);
            let worker = IoWorker::new(device, graph, rt.queue(device), rt.buffer_bytes_per_device());
            let sync = &sync;
            io_handles.push(s.spawn(move || worker.run(mode, sync)));
        }

        let io_start = Instant::now();
        sync.notify_io_start();
        for (device, handle) in io_handles.into_iter().enumerate() {
            let bytes = handle.join().expect("io worker panicked");
            per_device_bytes[device] = bytes;
            io_bytes += bytes;
        }
        sync.mark_io_done();
        io_time = io_start.elapsed().as_secs_f64();

        for handle in compute_handles {
            handle.join().expect("compute worker panicked");
        }
        compute_time = compute_start.elapsed().as_secs_f64();
    });

    graph.reset_page_activation();
    rt.record_round(&sync, io_bytes, activated_edges, io_time);
    print_round(
        rt,
        kind,
        activated_nodes,
        activated_edges,
        io_bytes,
        compute_time,
        io_time,
        skew(per_device_bytes.iter().map(|&b| b as f64)),
        None,
    );

    out_frontier
}

/// Runs one propagation-blocking round. The `PROP_BLOCKING` pathway is
/// implied by the function type; `flags` still controls output allocation.
///
/// Scatter workers feed the function's bins from the fetched pages; once
/// they exit, the bins are flushed and the gather workers drain them into
/// destination state.
///
/// # Arguments
/// * `rt` - Runtime owning the worker pools and fan-out queues
/// * `graph` - Graph store the round streams from
/// * `frontier` - Active vertices, or `None` to activate every vertex
/// * `func` - User scatter/gather function carrying the bins
/// * `flags` - `NO_OUTPUT` suppresses the output frontier
///
/// # Returns
/// The freshly activated frontier, or `None` when `NO_OUTPUT` suppressed
/// it.
///
/// # Panics
/// * If fewer than two compute workers are configured, or the scatter
///   share does not cover every device's queue
pub fn edge_map_pb<F: PbEdgeOp>(
    rt: &Runtime,
    graph: &DiskGraph,
    mut frontier: Option<&mut Frontier>,
    func: &F,
    flags: Flags,
) -> Option<Frontier> {
    assert!(
        rt.num_compute_workers() >= 2,
        "propagation blocking needs at least one scatter and one gather worker"
    );
    assert!(
        rt.num_scatter_workers() >= graph.num_devices(),
        "every device's fan-out queue needs a scatter worker"
    );

    let Some(prep) = prepare_round(rt, graph, &mut frontier, flags) else {
        return Some(Frontier::new(graph.num_nodes()));
    };
    let RoundPrep {
        kind,
        activated_nodes,
        activated_edges,
        sparse_pages,
        out_frontier,
    } = prep;
    let in_frontier: Option<&Frontier> = frontier.map(|f| &*f);
    let out_ref = out_frontier.as_ref();

    let k = graph.num_devices();
    let sync = Synchronization::new(k);
    let mut page_lists = split_page_lists(sparse_pages);
    let mut io_bytes = 0u64;
    let mut io_time = 0.0f64;
    let mut compute_time = 0.0f64;
    let mut per_device_bytes = vec![0u64; k];
    let mut scatter_times = Vec::new();
    let mut gather_times = Vec::new();

    std::thread::scope(|s| {
        let compute_start = Instant::now();

        let mut scatter_handles = Vec::with_capacity(rt.num_scatter_workers());
        for wid in 0..rt.num_scatter_workers() {
            let worker = ScatterWorker::new(wid, graph, rt.queues(), in_frontier);
            let sync = &sync;
            scatter_handles.push(s.spawn(move || worker.run(func, sync)));
        }

        let mut gather_handles = Vec::with_capacity(rt.num_gather_workers());
        for wid in 0..rt.num_gather_workers() {
            let worker = GatherWorker::new(wid, out_ref);
            let sync = &sync;
            gather_handles.push(s.spawn(move || worker.run(func, sync)));
        }

        let mut io_handles = Vec::with_capacity(k);
        for device in 0..k {
            let mode = make_io_mode(kind, &mut page_lists, device);
            let worker = IoWorker::new(device, graph, rt.queue(device), rt.buffer_bytes_per_device());
            let sync = &sync;
            io_handles.push(s.spawn(move || worker.run(mode, sync)));
        }

        let io_start = Instant::now();
        sync.notify_io_start();
        for (device, handle) in io_handles.into_iter().enumerate() {
            let bytes = handle.join().expect("io worker panicked");
            per_device_bytes[device] = bytes;
            io_bytes += bytes;
        }
        sync.mark_io_done();
        io_time = io_start.elapsed().as_secs_f64();

        for handle in scatter_handles {
            scatter_times.push(handle.join().expect("scatter worker panicked"));
        }

        // Every scatter worker has flushed its write buffers; push the
        // still-open bins and release the gather side.
        func.bins().flush_all();
        sync.mark_binning_done();

        for handle in gather_handles {
            gather_times.push(handle.join().expect("gather worker panicked"));
        }
        compute_time = compute_start.elapsed().as_secs_f64();
    });

    graph.reset_page_activation();
    rt.record_round(&sync, io_bytes, activated_edges, io_time);
    print_round(
        rt,
        kind,
        activated_nodes,
        activated_edges,
        io_bytes,
        compute_time,
        io_time,
        skew(per_device_bytes.iter().map(|&b| b as f64)),
        Some((
            skew(scatter_times.iter().copied()),
            skew(gather_times.iter().copied()),
        )),
    );

    out_frontier
}

/// Everything the pipeline needs from the preparation half of a round.
///
/// # Fields
/// * `kind` - Chosen frontier representation
/// * `activated_nodes` / `activated_edges` - Round statistics
/// * `sparse_pages` - Per-device page lists for sparse rounds
/// * `out_frontier` - Pre-allocated output frontier, unless suppressed
struct RoundPrep {
    kind: FrontierKind,
    activated_nodes: u64,
    activated_edges: u64,
    sparse_pages: Option<Vec<Vec<PageId>>>,
    out_frontier: Option<Frontier>,
}

/// Splits the per-device page lists so each I/O worker can take ownership
/// of its own.
///
/// # Returns
/// One takeable slot per device, or an empty vector for dense rounds.
fn split_page_lists(sparse_pages: Option<Vec<Vec<PageId>>>) -> Vec<Option<Vec<PageId>>> {
    match sparse_pages {
        Some(lists) => lists.into_iter().map(Some).collect(),
        None => Vec::new(),
    }
}

/// Builds the I/O mode of one device for this round.
///
/// # Arguments
/// * `kind` - The round's frontier representation
/// * `page_lists` - Per-device page lists; the device's entry is taken
/// * `device` - The device the mode is for
///
/// # Returns
/// The workload handed to that device's I/O worker.
fn make_io_mode(
    kind: FrontierKind,
    page_lists: &mut [Option<Vec<PageId>>],
    device: usize,
) -> IoMode {
    match kind {
        FrontierKind::DenseAll => IoMode::DenseAll,
        FrontierKind::Dense => IoMode::Dense,
        FrontierKind::Sparse => IoMode::Sparse(
            page_lists[device]
                .take()
                .expect("sparse round without page list"),
        ),
    }
}

/// Shared first half of a round: the round counter, the active-edge count,
/// empty-vertex filtering, the representation decision, the page frontier,
/// and the output frontier allocation.
///
/// # Arguments
/// * `rt` - Runtime whose round counter advances
/// * `graph` - Graph store of the round
/// * `frontier` - Input frontier, converted in place
/// * `flags` - Output allocation control
///
/// # Returns
/// The prepared round, or `None` when the frontier activates no edges at
/// all.
///
/// # Panics
/// * If the frontier covers a different vertex count than the graph
fn prepare_round(
    rt: &Runtime,
    graph: &DiskGraph,
    frontier: &mut Option<&mut Frontier>,
    flags: Flags,
) -> Option<RoundPrep> {
    rt.inc_round();

    let n = graph.num_nodes();
    let m = graph.num_edges();

    if let Some(f) = frontier.as_deref() {
        assert!(
            f.num_vertices() == n,
            "frontier over {} vertices used with a {}-vertex graph",
            f.num_vertices(),
            n
        );
    }

    let activated_edges = match frontier.as_deref() {
        Some(f) => count_active_edges(graph, f),
        None => m,
    };
    if activated_edges == 0 {
        return None;
    }

    if let Some(f) = frontier.as_deref_mut() {
        filter_out_empty_nodes(graph, f);
    }

    let activated_nodes = frontier.as_deref().map_or(n as u64, |f| f.count() as u64);

    let kind = decide_representation(frontier, activated_nodes, activated_edges, m);

    let sparse_pages = build_page_frontier(graph, frontier.as_deref(), kind);

    let out_frontier = if should_output(flags) {
        let mut out = Frontier::new(n);
        // Workers activate with the access pattern of the input form.
        if matches!(kind, FrontierKind::DenseAll | FrontierKind::Dense) {
            out.to_dense();
        }
        Some(out)
    } else {
        None
    };

    Some(RoundPrep {
        kind,
        activated_nodes,
        activated_edges,
        sparse_pages,
        out_frontier,
    })
}

/// Sums the out-degrees of every frontier member.
///
/// # Returns
/// The number of edges this round will visit; duplicates in a sparse
/// frontier are counted as pushed.
fn count_active_edges(graph: &DiskGraph, frontier: &Frontier) -> u64 {
    let total = AtomicU64::new(0);
    vertex_map(frontier, |v| {
        total.fetch_add(graph.degree(v) as u64, Ordering::Relaxed);
    });
    total.load(Ordering::Relaxed)
}

/// Drops isolated vertices from the frontier: they activate nothing and
/// would only inflate the page frontier.
fn filter_out_empty_nodes(graph: &DiskGraph, frontier: &mut Frontier) {
    if frontier.is_dense() {
        frontier
            .dense()
            .expect("dense frontier without bitmap")
            .and_with(graph.non_empty_nodes());
    } else {
        let filtered = VertexBag::new();
        frontier
            .sparse()
            .expect("sparse frontier without bag")
            .for_each(|v: Vid| {
                if graph.degree(v) > 0 {
                    filtered.push(v);
                }
            });
        frontier.set_sparse(filtered);
    }
}

/// Applies the density threshold: heavy frontiers run dense, light ones
/// run sparse with a bitmap mirror for membership checks.
fn decide_representation(
    frontier: &mut Option<&mut Frontier>,
    activated_nodes: u64,
    activated_edges: u64,
    num_edges: u64,
) -> FrontierKind {
    match frontier.as_deref_mut() {
        None => FrontierKind::DenseAll,
        Some(f) => {
            if (activated_nodes + activated_edges) as f64 > num_edges as f64 * DENSE_THRESHOLD {
                if !f.is_dense() {
                    f.to_dense();
                }
            } else if f.is_dense() {
                f.to_sparse();
            } else {
                // Stays sparse; workers still need the bitmap mirror for
                // membership checks.
                f.fill_dense();
            }
            if f.is_dense() {
                FrontierKind::Dense
            } else {
                FrontierKind::Sparse
            }
        }
    }
}

/// Marks the pages every frontier vertex touches: bits in the per-device
/// activation bitmaps for dense rounds, per-device page-id lists for sparse
/// rounds.
fn build_page_frontier(
    graph: &DiskGraph,
    frontier: Option<&Frontier>,
    kind: FrontierKind,
) -> Option<Vec<Vec<PageId>>> {
    let k = graph.num_devices();
    match kind {
        FrontierKind::DenseAll => {
            for device in 0..k {
                graph.activated_pages(device).set_all_parallel();
            }
            None
        }
        FrontierKind::Dense => {
            let frontier = frontier.expect("dense round without frontier");
            vertex_map(frontier, |v| {
                let (mut pid, pid_end) = graph.page_range(v);
                while pid <= pid_end {
                    let device = graph.device_of_page(pid);
                    graph
                        .activated_pages(device)
                        .set_bit_atomic(graph.local_page_id(pid) as usize);
                    pid += 1;
                }
            });
            None
        }
        FrontierKind::Sparse => {
            let frontier = frontier.expect("sparse round without frontier");
            let bags: Vec<VertexBag<PageId>> = (0..k).map(|_| VertexBag::new()).collect();
            vertex_map(frontier, |v| {
                let (mut pid, pid_end) = graph.page_range(v);
                while pid <= pid_end {
                    let device = graph.device_of_page(pid);
                    bags[device].push(graph.local_page_id(pid));
                    pid += 1;
                }
            });
            Some(bags.iter().map(|b| b.to_vec()).collect())
        }
    }
}

/// Max/min imbalance across workers; 1.0 when it cannot be computed.
fn skew<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut min = f64::MAX;
    let mut max = 0.0f64;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if min <= 0.0 || min == f64::MAX {
        1.0
    } else {
        max / min
    }
}

#[allow(clippy::too_many_arguments)]
fn print_round(
    rt: &Runtime,
    kind: FrontierKind,
    activated_nodes: u64,
    activated_edges: u64,
    io_bytes: u64,
    compute_time: f64,
    io_time: f64,
    io_skew: f64,
    pb_skews: Option<(f64, f64)>,
) {
    let mut line = format!(
        "# EDGEMAP {:4} : {:12} nodes {:>9}, {:12} edges, {:12} bytes, {:8.5} sec, {:8.5} sec",
        rt.round(),
        activated_nodes,
        kind.name(),
        activated_edges,
        io_bytes,
        compute_time,
        io_time
    );
    if let Some((bin_skew, acc_skew)) = pb_skews {
        line.push_str(&format!(" (bin: {:.2}, acc: {:.2})", bin_skew, acc_skew));
    }
    line.push_str(&format!(" (io: {:.2})", io_skew));
    println!("{}", line);
}
