use crate::config::{CACHE_LINE, PAGE_SHIFT};
use crate::engine::bins::Bins;
use crate::engine::io::PageBuffer;
use crate::util::align_up;

pub(crate) mod header;

pub use header::GraphHeader;

/// Vertex identifier. The engine addresses at most 2^32 vertices.
pub type Vid = u32;

/// Page identifier. Pages are 4 KiB blocks of an adjacency file; a page id
/// is either global (across all devices) or device-local depending on
/// context, and every API documents which one it takes.
pub type PageId = u32;

/// Inclusive range of vertices whose edges touch a given page.
pub type VidRange = (Vid, Vid);

/// Page id of the page holding the byte at `offset` of the edge region.
///
/// # Arguments
/// * `offset` - Byte offset into the packed edge stream
///
/// # Returns
/// The global page id owning that byte.
#[inline]
pub fn page_of(offset: u64) -> PageId {
    (offset >> PAGE_SHIFT) as PageId
}

/// Byte offset of `offset` within its page.
#[inline]
pub fn offset_in_page(offset: u64) -> usize {
    (offset & ((1u64 << PAGE_SHIFT) - 1)) as usize
}

/// Behavior flags for one `edge_map` round.
pub type Flags = u32;

/// Do not allocate an output frontier for this round.
pub const NO_OUTPUT: Flags = 0x01;

/// Route updates through the propagation-blocking scatter/gather pathway.
pub const PROP_BLOCKING: Flags = 0x10;

#[inline]
pub fn should_output(flags: Flags) -> bool {
    flags & NO_OUTPUT == 0
}

#[inline]
pub fn use_prop_blocking(flags: Flags) -> bool {
    flags & PROP_BLOCKING != 0
}

/// A run of contiguous device-local pages fetched by an I/O worker.
///
/// Ownership of the backing buffer moves with the run: the I/O worker
/// allocates it, the fan-out queue carries it, and the consuming compute or
/// scatter worker drops it and credits the device's free-page counter.
pub struct PageRun {
    /// Device the pages were read from.
    pub device: usize,
    /// First device-local page id of the run.
    pub first_page: PageId,
    /// Number of contiguous pages in the run.
    pub num_pages: usize,
    /// Page-aligned buffer holding `num_pages * PAGE_SIZE` bytes.
    pub buf: PageBuffer,
}

/// A 32-bit payload that can ride in the low half of a bin record.
///
/// Values are bit-reinterpreted, not converted: an `f32` payload travels as
/// its raw bits and is reassembled on the gather side.
///
/// # Methods
/// * `to_bits` - The raw 32-bit representation of the value
/// * `from_bits` - Rebuilds the value from its raw bits
pub trait Payload: Copy + Send + Sync + 'static {
    fn to_bits(self) -> u32;
    fn from_bits(bits: u32) -> Self;
}

impl Payload for u32 {
    #[inline]
    fn to_bits(self) -> u32 {
        self
    }
    #[inline]
    fn from_bits(bits: u32) -> Self {
        bits
    }
}

impl Payload for i32 {
    #[inline]
    fn to_bits(self) -> u32 {
        self as u32
    }
    #[inline]
    fn from_bits(bits: u32) -> Self {
        bits as i32
    }
}

impl Payload for f32 {
    #[inline]
    fn to_bits(self) -> u32 {
        self.to_bits()
    }
    #[inline]
    fn from_bits(bits: u32) -> Self {
        f32::from_bits(bits)
    }
}

/// Common surface of every edge function object: the per-destination
/// admission test. The default admits every edge.
pub trait EdgeOp: Send + Sync {
    #[inline]
    fn cond(&self, _dst: Vid) -> bool {
        true
    }
}

/// Function object for the direct pathway. The engine always routes through
/// [`DirectEdgeOp::update_atomic`]; [`DirectEdgeOp::update`] is an optional
/// sequential fast path kept for callers that run single threaded.
pub trait DirectEdgeOp: EdgeOp {
    /// Sequential update of `dst` state.
    ///
    /// # Arguments
    /// * `src` - Source vertex of the edge
    /// * `dst` - Destination vertex being updated
    ///
    /// # Returns
    /// True iff `dst` newly became active.
    #[inline]
    fn update(&self, src: Vid, dst: Vid) -> bool {
        self.update_atomic(src, dst)
    }

    /// Concurrent update of `dst` state.
    ///
    /// # Arguments
    /// * `src` - Source vertex of the edge
    /// * `dst` - Destination vertex being updated
    ///
    /// # Returns
    /// True iff this caller performed the state-changing transition;
    /// exactly one concurrent caller may report it.
    fn update_atomic(&self, src: Vid, dst: Vid) -> bool;
}

/// Function object for the propagation-blocking pathway.
///
/// `scatter` produces the payload carried through the bins; `gather` absorbs
/// it into destination state and reports whether the destination should be
/// activated. This pathway never calls `update_atomic`.
pub trait PbEdgeOp: EdgeOp {
    type Value: Payload;

    fn scatter(&self, src: Vid, dst: Vid) -> Self::Value;

    fn gather(&self, dst: Vid, val: Self::Value) -> bool;

    /// The bins collection this function scatters into.
    fn bins(&self) -> &Bins;
}

/// Byte length of the index file for `num_nodes` vertices, per the on-disk
/// layout: header, one base offset per 16 vertices, cache-line padding,
/// then dense u32 degrees.
pub fn index_file_len(num_nodes: u64) -> usize {
    degrees_offset(num_nodes) + num_nodes as usize * std::mem::size_of::<u32>()
}

/// Number of 64-bit base offsets in the index: one per 16 vertices.
///
/// # Arguments
/// * `num_nodes` - Vertex count of the graph
///
/// # Returns
/// How many base offsets the index stores.
pub fn num_base_offsets(num_nodes: u64) -> usize {
    if num_nodes == 0 {
        return 0;
    }
    ((num_nodes - 1) / 16 + 1) as usize
}

/// Byte offset of the degree array within the index file.
///
/// The header and base-offset section is padded to the cache line before
/// the degrees begin.
///
/// # Arguments
/// * `num_nodes` - Vertex count of the graph
///
/// # Returns
/// Where the first 32-bit degree lives.
pub fn degrees_offset(num_nodes: u64) -> usize {
    align_up(
        GraphHeader::BYTES + num_base_offsets(num_nodes) * std::mem::size_of::<u64>(),
        CACHE_LINE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_helpers() {
        assert!(should_output(0));
        assert!(!should_output(NO_OUTPUT));
        assert!(use_prop_blocking(PROP_BLOCKING | NO_OUTPUT));
        assert!(!use_prop_blocking(NO_OUTPUT));
    }

    #[test]
    fn test_page_math() {
        assert_eq!(page_of(0), 0);
        assert_eq!(page_of(4095), 0);
        assert_eq!(page_of(4096), 1);
        assert_eq!(offset_in_page(4100), 4);
    }

    #[test]
    fn test_payload_roundtrip() {
        let x = -1.5f32;
        assert_eq!(f32::from_bits(Payload::to_bits(x)), x);
        let y = u32::MAX;
        assert_eq!(<u32 as Payload>::from_bits(y.to_bits()), y);
    }

    #[test]
    fn test_index_layout() {
        // 5 vertices: header (32 B) + one base offset (8 B) -> padded to 64,
        // then 5 degrees (20 B).
        assert_eq!(num_base_offsets(5), 1);
        assert_eq!(degrees_offset(5), 64);
        assert_eq!(index_file_len(5), 84);

        // 17 vertices need two base offsets.
        assert_eq!(num_base_offsets(17), 2);
    }
}
