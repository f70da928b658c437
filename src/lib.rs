//! riptide: an out-of-core, SSD-backed parallel graph processing engine.
//!
//! Edges live on one or more storage devices and are streamed in 4 KiB
//! pages on demand; vertex state stays in memory. Algorithms are written
//! against a frontier-based `edge_map` primitive with two execution
//! pathways: the direct path applies atomic per-edge updates in place, the
//! propagation-blocking path routes `(dst, payload)` records through
//! destination-range bins for cache-friendly gathering.

pub mod algorithms;
pub mod config;
pub mod engine;
pub mod frontier;
pub mod runtime;
pub mod stats;
pub mod storage;
pub mod types;
pub mod util;

pub use engine::edge_map::{edge_map, edge_map_pb, FrontierKind};
pub use engine::vertex_ops::{vertex_filter, vertex_filter_all, vertex_map, vertex_map_all};
pub use frontier::Frontier;
pub use runtime::Runtime;
pub use storage::DiskGraph;
pub use types::{Flags, PageId, Vid, NO_OUTPUT, PROP_BLOCKING};
