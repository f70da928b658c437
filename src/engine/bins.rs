//! Destination-range bins for the propagation-blocking pathway.
//!
//! Scatter workers append `(dst, payload)` records through thread-private
//! write buffers; full buffers spill into the active bin of the
//! destination range's [`BinPair`]. A full bin is handed to the shared
//! full-bins queue and its sibling takes over. Gather workers drain full
//! bins and return them to the binning state.
//!
//! Each record packs the destination id in the high 32 bits and the raw
//! payload bits in the low 32.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::queue::SegQueue;

use crate::types::{Payload, Vid};
use crate::util::msb_position;

const STATE_BINNING: u8 = 0;
const STATE_ACCUMULATE: u8 = 1;

/// High bit of the tail word; set when the bin stops accepting writes.
const TAIL_CLOSED: u64 = 1 << 63;

#[inline]
pub fn encode_record(dst: Vid, bits: u32) -> u64 {
    ((dst as u64) << 32) | bits as u64
}

#[inline]
pub fn decode_record(record: u64) -> (Vid, u32) {
    ((record >> 32) as Vid, record as u32)
}

/// One fixed-capacity record buffer.
///
/// A bin alternates between two states: binning, in which writers reserve
/// slot ranges and fill them, and accumulate, in which it sits in the
/// full-bins queue waiting to be drained.
///
/// # Fields
/// * `id` - Destination-range index this bin belongs to
/// * `capacity` - Maximum number of records
/// * `records` - The record storage
/// * `tail` - Reservation cursor; the CLOSED bit freezes it during hand-off
/// * `committed` - Records fully written; drainers wait until it catches
///   the tail
/// * `state` - Binning or accumulate
pub struct Bin {
    id: usize,
    capacity: usize,
    records: Box<[AtomicU64]>,
    /// Reservation cursor; the CLOSED bit freezes it during hand-off.
    tail: AtomicU64,
    /// Records fully written; drainers wait until it catches the tail.
    committed: AtomicUsize,
    state: AtomicU8,
}

impl Bin {
    fn new(id: usize, capacity: usize) -> Self {
        let mut records = Vec::with_capacity(capacity);
        records.resize_with(capacity, || AtomicU64::new(0));
        Self {
            id,
            capacity,
            records: records.into_boxed_slice(),
            tail: AtomicU64::new(0),
            committed: AtomicUsize::new(0),
            state: AtomicU8::new(STATE_BINNING),
        }
    }

    pub fn bin_id(&self) -> usize {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn mark_binning(&self) {
        self.state.store(STATE_BINNING, Ordering::Release);
    }

    fn mark_accumulate(&self) {
        self.state.store(STATE_ACCUMULATE, Ordering::Release);
    }

    fn is_accumulate(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_ACCUMULATE
    }

    /// Number of reserved records, ignoring the closed flag.
    ///
    /// # Returns
    /// How many record slots have been handed out so far.
    pub fn len(&self) -> usize {
        (self.tail.load(Ordering::Acquire) & !TAIL_CLOSED) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close(&self) {
        self.tail.fetch_or(TAIL_CLOSED, Ordering::AcqRel);
    }

    fn is_closed(&self) -> bool {
        self.tail.load(Ordering::Acquire) & TAIL_CLOSED != 0
    }

    /// Tries to reserve `count` slots. `Err(true)` means the bin is full,
    /// `Err(false)` that it is closed or the reservation raced; both ask the
    /// caller to re-resolve the active bin.
    fn try_reserve(&self, count: usize) -> Result<usize, bool> {
        let cur = self.tail.load(Ordering::Acquire);
        if cur & TAIL_CLOSED != 0 {
            return Err(false);
        }
        if cur as usize + count > self.capacity {
            return Err(true);
        }
        match self.tail.compare_exchange(
            cur,
            cur + count as u64,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(cur as usize),
            Err(_) => Err(false),
        }
    }

    fn write(&self, at: usize, records: &[u64]) {
        for (i, &record) in records.iter().enumerate() {
            self.records[at + i].store(record, Ordering::Relaxed);
        }
        self.committed.fetch_add(records.len(), Ordering::Release);
    }

    /// Waits for in-flight writers, then copies out the records.
    ///
    /// # Returns
    /// Every committed record in reservation order.
    pub fn drain(&self) -> Vec<u64> {
        let len = self.len();
        while self.committed.load(Ordering::Acquire) < len {
            std::hint::spin_loop();
        }
        self.records[..len]
            .iter()
            .map(|r| r.load(Ordering::Relaxed))
            .collect()
    }

    /// Empties the bin and reopens it for writers.
    pub fn reset(&self) {
        self.committed.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Release);
        self.mark_binning();
    }
}

/// Queue of bins ready to be gathered.
pub struct FullBins {
    queue: SegQueue<Arc<Bin>>,
}

impl FullBins {
    fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    fn push(&self, bin: Arc<Bin>) {
        self.queue.push(bin);
    }

    pub fn pop(&self) -> Option<Arc<Bin>> {
        self.queue.pop()
    }
}

/// Two bins alternating between binning and accumulate for one
/// destination-id range.
///
/// # Fields
/// * `active` - Index (0/1) of the bin currently accepting writes
/// * `pair` - The two bins
/// * `lock` - Serializes bin switches
pub struct BinPair {
    active: AtomicUsize,
    pair: [Arc<Bin>; 2],
    lock: Mutex<()>,
}

impl BinPair {
    fn new(id: usize, capacity_per_bin: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            pair: [
                Arc::new(Bin::new(id, capacity_per_bin)),
                Arc::new(Bin::new(id, capacity_per_bin)),
            ],
            lock: Mutex::new(()),
        }
    }

    /// Hands the full active bin to the accumulate side and activates its
    /// sibling. Concurrent calls are serialized; late arrivals find the
    /// switch already done and return.
    fn switch_bin(&self, count: usize, full_bins: &FullBins) {
        let _guard = self.lock.lock().expect("bin pair lock poisoned");

        let me = self.active.load(Ordering::Acquire);
        let mine = &self.pair[me];
        if !mine.is_closed() && mine.len() + count <= mine.capacity() {
            return;
        }

        let other = 1 - me;
        // Wait until the sibling has been drained and reopened.
        while self.pair[other].is_accumulate() {
            std::hint::spin_loop();
        }

        mine.close();
        mine.mark_accumulate();
        full_bins.push(Arc::clone(mine));

        self.active.store(other, Ordering::Release);
    }

    /// Appends a block of records to the active bin, switching bins when
    /// the active one cannot hold them.
    fn append(&self, records: &[u64], full_bins: &FullBins) {
        debug_assert!(!records.is_empty());
        loop {
            let me = self.active.load(Ordering::Acquire);
            let bin = &self.pair[me];
            match bin.try_reserve(records.len()) {
                Ok(at) => {
                    bin.write(at, records);
                    return;
                }
                Err(full) => {
                    if full {
                        self.switch_bin(records.len(), full_bins);
                    }
                    // Closed or raced: re-resolve the active bin.
                }
            }
        }
    }

    /// Pushes any still-open, non-empty bin to the full-bins queue. Called
    /// after all writers have stopped.
    fn flush(&self, full_bins: &FullBins) {
        for bin in &self.pair {
            if !bin.is_accumulate() && !bin.is_empty() {
                bin.close();
                bin.mark_accumulate();
                full_bins.push(Arc::clone(bin));
            }
        }
    }

    fn reset(&self) {
        self.pair[0].reset();
        self.pair[1].reset();
        self.active.store(0, Ordering::Release);
    }
}

/// The bin collection for one graph: `bin_count` BinPairs, each covering a
/// destination-id range of width `2^shift`.
pub struct Bins {
    bin_count: usize,
    bin_buf_size: usize,
    shift: u32,
    capacity_per_bin: usize,
    pairs: Vec<BinPair>,
    full_bins: FullBins,
}

impl Bins {
    /// Sizes the collection for a graph of `num_nodes` vertices with
    /// `space_bytes` of total bin memory.
    ///
    /// The destination-range width is `2^shift` with
    /// `shift = msb(num_nodes - 1) - log2(bin_count)`, so the ranges cover
    /// the id space exactly.
    ///
    /// # Arguments
    /// * `num_nodes` - Number of vertices the destination ids come from
    /// * `space_bytes` - Total memory across all bins
    /// * `bin_count` - Number of destination ranges; must be a power of two
    /// * `bin_buf_size` - Records per thread-private write buffer
    ///
    /// # Returns
    /// A ready collection with every bin empty and in the binning state.
    ///
    /// # Panics
    /// * If `bin_count` is not a power of two, the graph is empty, or a
    ///   single bin cannot hold one full write buffer
    pub fn new(num_nodes: usize, space_bytes: u64, bin_count: usize, bin_buf_size: usize) -> Self {
        assert!(bin_count.is_power_of_two(), "bin count must be a power of two");
        assert!(num_nodes > 0, "bins require a non-empty graph");

        let capacity_per_pair = (space_bytes / bin_count as u64 / 8) as usize;
        let capacity_per_bin = capacity_per_pair / 2;
        assert!(
            capacity_per_bin >= bin_buf_size,
            "bin space too small: {} records per bin cannot hold a {}-record write buffer",
            capacity_per_bin,
            bin_buf_size
        );

        let msb = msb_position((num_nodes - 1) as u64).min(32);
        let shift = msb.saturating_sub(bin_count.trailing_zeros());

        let mut pairs = Vec::with_capacity(bin_count);
        for id in 0..bin_count {
            pairs.push(BinPair::new(id, capacity_per_bin));
        }

        Self {
            bin_count,
            bin_buf_size,
            shift,
            capacity_per_bin,
            pairs,
            full_bins: FullBins::new(),
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Bin index covering destination `dst`.
    ///
    /// # Arguments
    /// * `dst` - Destination vertex id
    ///
    /// # Returns
    /// The index of the BinPair whose id range contains `dst`.
    #[inline]
    pub fn bin_of(&self, dst: Vid) -> usize {
        ((dst >> self.shift) as usize).min(self.bin_count - 1)
    }

    pub fn pop_full_bin(&self) -> Option<Arc<Bin>> {
        self.full_bins.pop()
    }

    /// Pushes every still-open, non-empty bin to the full-bins queue. The
    /// orchestrator calls this once all scatter workers have exited.
    pub fn flush_all(&self) {
        for pair in &self.pairs {
            pair.flush(&self.full_bins);
        }
    }

    /// Returns all bins to the empty binning state, draining any leftover
    /// full-bin queue entries.
    pub fn reset(&self) {
        while self.full_bins.pop().is_some() {}
        for pair in &self.pairs {
            pair.reset();
        }
    }

    /// Creates the write-buffer front end for one scatter worker.
    ///
    /// # Returns
    /// A `BinWriter` with one empty buffer per destination range.
    pub fn writer(&self) -> BinWriter<'_> {
        BinWriter {
            bins: self,
            bufs: (0..self.bin_count)
                .map(|_| Vec::with_capacity(self.bin_buf_size))
                .collect(),
        }
    }

    pub fn print(&self) {
        println!(
            "bins: {} pairs x 2 x {} records, range width 2^{}",
            self.bin_count, self.capacity_per_bin, self.shift
        );
    }
}

/// Thread-private write buffers of one scatter worker: up to
/// `bin_buf_size` records per destination range, flushed as one contiguous
/// block when full.
pub struct BinWriter<'a> {
    bins: &'a Bins,
    bufs: Vec<Vec<u64>>,
}

impl<'a> BinWriter<'a> {
    /// Buffers one record, spilling the range's buffer when it fills up.
    ///
    /// # Arguments
    /// * `dst` - Destination vertex id, selects the range
    /// * `val` - Payload carried to the gather side
    #[inline]
    pub fn push<V: Payload>(&mut self, dst: Vid, val: V) {
        let bid = self.bins.bin_of(dst);
        let buf = &mut self.bufs[bid];
        buf.push(encode_record(dst, val.to_bits()));
        if buf.len() == self.bins.bin_buf_size {
            self.bins.pairs[bid].append(buf, &self.bins.full_bins);
            buf.clear();
        }
    }

    /// Spills every non-empty buffer. Called when the worker shuts down.
    pub fn finish(&mut self) {
        for (bid, buf) in self.bufs.iter_mut().enumerate() {
            if !buf.is_empty() {
                self.bins.pairs[bid].append(buf, &self.bins.full_bins);
                buf.clear();
            }
        }
    }
}

#[cfg(test)]
mod test_bins {
    use super::*;

    #[test]
    fn test_record_codec() {
        let record = encode_record(7, 0xdead_beef);
        assert_eq!(decode_record(record), (7, 0xdead_beef));
        let bits = Payload::to_bits(-2.5f32);
        let (dst, raw) = decode_record(encode_record(123, bits));
        assert_eq!(dst, 123);
        assert_eq!(f32::from_bits(raw), -2.5);
    }

    #[test]
    fn test_bin_of_partitions_id_space() {
        // 1<<20 vertices over 4096 bins: ranges of 256 ids.
        let bins = Bins::new(1 << 20, 64 << 20, 4096, 128);
        assert_eq!(bins.shift(), 8);
        assert_eq!(bins.bin_of(0), 0);
        assert_eq!(bins.bin_of(255), 0);
        assert_eq!(bins.bin_of(256), 1);
        assert_eq!(bins.bin_of((1 << 20) - 1), 4095);
    }

    #[test]
    fn test_writer_spills_at_buffer_capacity() {
        // Tiny configuration: 2 bins, 4-record write buffers, 16-record bins.
        let bins = Bins::new(256, 2 * 2 * 16 * 8, 2, 4);
        let mut writer = bins.writer();
        for i in 0..3u32 {
            writer.push(0, i);
        }
        // Nothing spilled yet, nothing to gather.
        assert!(bins.pop_full_bin().is_none());
        writer.push(0, 3u32);
        // Buffer hit capacity and went into the active bin, which is not
        // full yet, so the queue is still empty.
        assert!(bins.pop_full_bin().is_none());
        writer.finish();
        bins.flush_all();

        let bin = bins.pop_full_bin().expect("flushed bin");
        let records = bin.drain();
        assert_eq!(records.len(), 4);
        assert_eq!(decode_record(records[0]), (0, 0));
        assert_eq!(decode_record(records[3]), (0, 3));
    }

    #[test]
    fn test_pair_switch_hands_off_full_bin() {
        // Bin capacity 4 records, write buffers of 2.
        let bins = Bins::new(256, 2 * 2 * 4 * 8, 2, 2);
        let mut writer = bins.writer();
        // 6 records into range 0: the active bin fills at 4 and is handed
        // off; the remaining 2 land in the sibling.
        for i in 0..6u32 {
            writer.push(0, i);
        }
        writer.finish();

        let full = bins.pop_full_bin().expect("full bin after switch");
        assert_eq!(full.len(), 4);
        full.reset();

        bins.flush_all();
        let rest = bins.pop_full_bin().expect("sibling bin");
        assert_eq!(rest.len(), 2);
        assert!(bins.pop_full_bin().is_none());
    }

    #[test]
    fn test_concurrent_scatter_keeps_every_record() {
        use rayon::prelude::*;
        use std::collections::HashMap;

        let num_nodes = 1024usize;
        let bins = Bins::new(num_nodes, 64 * 1024 * 8, 64, 8);
        let records_per_thread = 2000u32;

        (0..4).into_par_iter().for_each(|t| {
            let mut writer = bins.writer();
            for i in 0..records_per_thread {
                let dst = ((t * records_per_thread + i) % num_nodes as u32) as Vid;
                writer.push(dst, i);
            }
            writer.finish();
        });
        bins.flush_all();

        let mut seen: HashMap<Vid, usize> = HashMap::new();
        while let Some(bin) = bins.pop_full_bin() {
            for record in bin.drain() {
                *seen.entry(decode_record(record).0).or_default() += 1;
            }
            bin.reset();
        }
        let total: usize = seen.values().sum();
        assert_eq!(total, 4 * records_per_thread as usize);
        // Records must land in the bin covering their destination range.
        for dst in seen.keys() {
            assert!((*dst as usize) < num_nodes);
        }
    }

    #[test]
    fn test_reset_reopens_bins() {
        let bins = Bins::new(256, 2 * 2 * 4 * 8, 2, 2);
        let mut writer = bins.writer();
        for i in 0..4u32 {
            writer.push(0, i);
        }
        writer.finish();
        bins.reset();
        assert!(bins.pop_full_bin().is_none());
        let mut writer = bins.writer();
        writer.push(0, 9u32);
        writer.finish();
        bins.flush_all();
        let bin = bins.pop_full_bin().expect("bin after reset");
        assert_eq!(bin.len(), 1);
    }
}
