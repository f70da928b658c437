use clap::Parser;
use serde::Serialize;

use riptide::algorithms::bc::{bc, BcConfig};
use riptide::algorithms::bfs::{bfs, BfsConfig, UNVISITED};
use riptide::algorithms::kcore::{kcore, KcoreConfig};
use riptide::algorithms::pagerank::{pagerank, print_top, PageRankConfig};
use riptide::algorithms::spmv::{spmv, SpmvConfig};
use riptide::algorithms::wcc::{find_largest, wcc};
use riptide::config::MB;
use riptide::engine::bins::Bins;
use riptide::measure_io;
use riptide::storage::convert::GraphData;
use riptide::{DiskGraph, Runtime};

#[derive(Parser, Debug, Serialize)]
#[command(author, version, about)]
struct Args {
    /// Index file of the out-edge graph (output path for the convert task).
    out_index: String,

    /// Adjacency file per storage device, in stripe order.
    #[arg(required = true)]
    out_adj: Vec<String>,

    /// The task to be performed: bfs, pagerank, wcc, kcore, spmv, bc,
    /// convert.
    #[arg(short, long, default_value_t = String::from("bfs"))]
    task: String,

    /// Index file of the reverse graph (wcc, kcore, bc).
    #[arg(long)]
    in_index: Option<String>,

    /// Adjacency files of the reverse graph.
    #[arg(long, num_args = 1..)]
    in_adj: Vec<String>,

    /// Number of compute worker threads.
    #[arg(long, default_value_t = 4)]
    compute_workers: usize,

    /// Total page-buffer budget in MB, shared across devices.
    #[arg(long, default_value_t = riptide::config::IO_BUFFER_BYTES / MB)]
    io_buffer_size: u64,

    /// Source vertex for bfs and bc.
    #[arg(long, default_value_t = 0)]
    start_node: u32,

    /// Iteration cap for pagerank and spmv.
    #[arg(long, default_value_t = 20)]
    max_iterations: u32,

    /// Total bin space in MB for the propagation-blocking pathway.
    #[arg(long, default_value_t = riptide::config::BIN_SPACE_BYTES / MB)]
    bin_space: u64,

    /// Number of destination-range bins.
    #[arg(long, default_value_t = riptide::config::BIN_COUNT)]
    bin_count: usize,

    /// Records per thread-private bin write buffer.
    #[arg(long, default_value_t = riptide::config::BIN_BUF_SIZE)]
    bin_buf_size: usize,

    /// Fraction of compute workers doing scatter work.
    #[arg(long, default_value_t = riptide::config::BINNING_WORKER_RATIO)]
    binning_ratio: f64,

    /// Run BFS through the propagation-blocking pathway.
    #[arg(long, default_value_t = false)]
    prop_blocking: bool,

    /// Smallest k probed by kcore.
    #[arg(long, default_value_t = 1)]
    min_k: u32,

    /// Largest k probed by kcore.
    #[arg(long, default_value_t = 10000)]
    max_k: u32,

    /// Edge-list text file consumed by the convert task.
    #[arg(long)]
    edge_list: Option<String>,
}

fn main() {
    let args = Args::parse();
    println!(
        "config: {}",
        serde_json::to_string(&args).expect("arguments serialize")
    );

    if args.task == "convert" {
        run_convert(&args);
        return;
    }

    let num_devices = args.out_adj.len();
    assert!(
        args.compute_workers >= num_devices,
        "need at least one compute worker per device ({} devices)",
        num_devices
    );

    let mut rt = Runtime::new(
        args.compute_workers,
        num_devices,
        args.io_buffer_size * MB,
    );
    rt.init_binning(args.binning_ratio);

    let out_graph = DiskGraph::build(&args.out_index, &args.out_adj);
    let n = out_graph.num_nodes();

    match args.task.as_str() {
        "bfs" => {
            let bins = args
                .prop_blocking
                .then(|| Bins::new(n, args.bin_space * MB, args.bin_count, args.bin_buf_size));
            let parents = measure_io!("BFS", {
                bfs(
                    &rt,
                    &out_graph,
                    BfsConfig {
                        start_node: args.start_node,
                        bins: bins.as_ref(),
                    },
                )
            });
            let reached = parents.iter().filter(|&&p| p != UNVISITED).count();
            println!("BFS reached {} vertices from {}", reached, args.start_node);
        }
        "pagerank" => {
            let bins = Bins::new(n, args.bin_space * MB, args.bin_count, args.bin_buf_size);
            bins.print();
            let scores = measure_io!("PAGERANK", {
                pagerank(
                    &rt,
                    &out_graph,
                    &bins,
                    PageRankConfig {
                        max_iterations: args.max_iterations,
                        ..PageRankConfig::default()
                    },
                )
            });
            print_top(&scores, 20);
        }
        "wcc" => {
            let in_graph = build_in_graph(&args);
            let ids = measure_io!("WCC", { wcc(&rt, &out_graph, &in_graph) });
            find_largest(&ids);
        }
        "kcore" => {
            let in_graph = build_in_graph(&args);
            let (largest, _cores) = measure_io!("KCORE", {
                kcore(
                    &rt,
                    &out_graph,
                    &in_graph,
                    KcoreConfig {
                        min_k: args.min_k,
                        max_k: args.max_k,
                    },
                )
            });
            println!("kcore finished with largest core {}", largest);
        }
        "spmv" => {
            let bins = Bins::new(n, args.bin_space * MB, args.bin_count, args.bin_buf_size);
            let result = measure_io!("SPMV", {
                spmv(
                    &rt,
                    &out_graph,
                    &bins,
                    SpmvConfig {
                        max_iterations: args.max_iterations,
                    },
                )
            });
            let norm: f64 = result.iter().map(|&v| v.abs() as f64).sum();
            println!("SPMV finished, l1 norm {:.4}", norm);
        }
        "bc" => {
            let in_graph = build_in_graph(&args);
            let scores = measure_io!("BC", {
                bc(
                    &rt,
                    &out_graph,
                    &in_graph,
                    BcConfig {
                        start_node: args.start_node,
                    },
                )
            });
            print_top(&scores, 20);
        }
        other => {
            eprintln!("Task {} not supported.", other);
            std::process::exit(1);
        }
    }
}

fn build_in_graph(args: &Args) -> DiskGraph {
    let in_index = args
        .in_index
        .as_ref()
        .unwrap_or_else(|| panic!("task {} needs --in-index/--in-adj", args.task));
    assert!(
        !args.in_adj.is_empty(),
        "task {} needs --in-adj adjacency files",
        args.task
    );
    assert_eq!(
        args.in_adj.len(),
        args.out_adj.len(),
        "forward and reverse graphs must stripe over the same devices"
    );
    DiskGraph::build(in_index, &args.in_adj)
}

/// Converts an edge-list text file into the on-disk format, writing the
/// forward graph to the positional paths and, when `--in-index`/`--in-adj`
/// are given, the transposed graph alongside it.
fn run_convert(args: &Args) {
    let input = args
        .edge_list
        .as_ref()
        .expect("convert needs --edge-list <file>");
    let graph = GraphData::from_edge_list_file(input);
    println!(
        "loaded {} vertices, {} edges",
        graph.num_nodes,
        graph.num_edges()
    );

    let adj_paths: Vec<std::path::PathBuf> =
        args.out_adj.iter().map(std::path::PathBuf::from).collect();
    graph.write_files(std::path::Path::new(&args.out_index), &adj_paths);
    println!("wrote {} and {} adjacency file(s)", args.out_index, adj_paths.len());

    if let Some(in_index) = &args.in_index {
        assert!(
            !args.in_adj.is_empty(),
            "transposed output needs --in-adj paths"
        );
        let transposed = graph.transpose();
        let in_paths: Vec<std::path::PathBuf> =
            args.in_adj.iter().map(std::path::PathBuf::from).collect();
        transposed.write_files(std::path::Path::new(in_index), &in_paths);
        println!("wrote transposed graph to {}", in_index);
    }
}
