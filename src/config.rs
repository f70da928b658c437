//! Engine-wide constants and default tunables.

/// Size of one I/O page in bytes. The adjacency files are read in units of
/// this granularity and their length is always a multiple of it.
pub const PAGE_SIZE: usize = 4096;

/// log2(PAGE_SIZE), used to turn byte offsets into page ids.
pub const PAGE_SHIFT: u32 = 12;

/// Cache line size used for index file alignment.
pub const CACHE_LINE: usize = 64;

/// Width of one on-disk edge record in bytes (a single destination id).
pub const EDGE_WIDTH: usize = 4;

/// Depth of the per-device I/O submission ring.
pub const IO_QUEUE_DEPTH: usize = 64;

/// Maximum number of contiguous pages coalesced into one read request.
pub const IO_MAX_PAGES_PER_REQ: usize = 4;

/// Upper bound on page runs taken from a fan-out queue in one bulk dequeue.
pub const IO_QUEUE_BULK_DEQ: usize = 64;

/// Frontier density threshold. A frontier whose activated vertex plus edge
/// count exceeds `num_edges * DENSE_THRESHOLD` is processed densely.
pub const DENSE_THRESHOLD: f64 = 0.005;

/// Default fraction of compute workers doing scatter work on the
/// propagation-blocking path. The remainder gathers.
pub const BINNING_WORKER_RATIO: f64 = 0.67;

/// Default number of destination-range bins.
pub const BIN_COUNT: usize = 4096;

/// Default capacity (in records) of a thread-private bin write buffer.
pub const BIN_BUF_SIZE: usize = 128;

/// Default total bin space in bytes.
pub const BIN_SPACE_BYTES: u64 = 256 * MB;

/// Buffered-reader capacity for text graph parsing.
pub const READ_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// One megabyte.
pub const MB: u64 = 1024 * 1024;

/// Default I/O buffer budget in bytes, shared across all devices.
pub const IO_BUFFER_BYTES: u64 = 128 * MB;

/// When set, large page-aligned allocations are backed by files created
/// under this directory instead of anonymous memory.
pub const PMEM_DIR_ENV: &str = "RIPTIDE_PMEM_DIR";
