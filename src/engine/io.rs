//! Asynchronous page I/O workers, one per storage device.
//!
//! A worker turns its per-round page workload (all pages, the activated-page
//! bitmap, or a sparse page list) into read requests of up to
//! `IO_MAX_PAGES_PER_REQ` contiguous pages, bounded by the submission ring
//! depth and by the device's free-page quota. Completed reads are published
//! into the device's fan-out queue as [`PageRun`]s; the consumer returns the
//! pages to the quota when it releases the buffer.

use std::collections::VecDeque;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::SegQueue;
use memmap2::MmapMut;

use crate::config::{IO_MAX_PAGES_PER_REQ, IO_QUEUE_DEPTH, PAGE_SIZE, PMEM_DIR_ENV};
use crate::engine::sync::Synchronization;
use crate::frontier::bitmap::Bitmap;
use crate::storage::DiskGraph;
use crate::types::{PageId, PageRun};

/// Page-aligned buffer holding a whole number of pages.
///
/// Backed by an anonymous mapping, or by a file created under the directory
/// named by `RIPTIDE_PMEM_DIR` when that variable is set.
pub struct PageBuffer {
    map: MmapMut,
}

static PMEM_FILE_SEQ: AtomicU64 = AtomicU64::new(0);

impl PageBuffer {
    /// Allocates `num_pages` zeroed pages.
    ///
    /// # Arguments
    /// * `num_pages` - Number of whole pages the buffer must hold
    ///
    /// # Returns
    /// A page-aligned, zero-filled buffer.
    ///
    /// # Panics
    /// * If the mapping cannot be created; allocation failure is fatal
    pub fn alloc(num_pages: usize) -> Self {
        let len = num_pages * PAGE_SIZE;
        let map = match env::var_os(PMEM_DIR_ENV) {
            Some(dir) => Self::map_file_backed(PathBuf::from(dir), len),
            None => MmapMut::map_anon(len)
                .unwrap_or_else(|e| panic!("page buffer allocation of {} bytes failed: {}", len, e)),
        };
        Self { map }
    }

    fn map_file_backed(dir: PathBuf, len: usize) -> MmapMut {
        let seq = PMEM_FILE_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("riptide-buf-{}-{}", std::process::id(), seq));
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .unwrap_or_else(|e| panic!("cannot create pmem buffer {}: {}", path.display(), e));
        file.set_len(len as u64)
            .unwrap_or_else(|e| panic!("cannot size pmem buffer {}: {}", path.display(), e));
        let map = unsafe {
            MmapMut::map_mut(&file)
                .unwrap_or_else(|e| panic!("cannot map pmem buffer {}: {}", path.display(), e))
        };
        // The mapping keeps the storage alive; the name can go.
        let _ = fs::remove_file(&path);
        map
    }

    /// Read view of the whole buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    /// Write view of the whole buffer, handed to the positional reads.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

/// Per-round page workload of one device.
///
/// Chosen by the orchestrator from the frontier representation: a missing
/// frontier streams everything, a dense frontier drives the activation
/// bitmap, and a sparse frontier enumerates its pages explicitly.
pub enum IoMode {
    /// Read every page of the device sequentially.
    DenseAll,
    /// Read the pages set in the device's activated-page bitmap.
    Dense,
    /// Read the listed device-local pages, deduplicating through the
    /// activated-page bitmap.
    Sparse(Vec<PageId>),
}

/// One read request moving through the submission ring.
///
/// # Fields
/// * `first_page` - First device-local page of the request
/// * `num_pages` - Number of contiguous pages
/// * `buf` - Destination buffer, later handed to the consumer
struct CompletedRead {
    first_page: PageId,
    num_pages: usize,
    buf: PageBuffer,
}

pub struct IoWorker<'a> {
    id: usize,
    graph: &'a DiskGraph,
    out: &'a SegQueue<PageRun>,
    num_buffer_pages: i64,
    max_pages_per_req: usize,
    queued: u64,
    sent: u64,
    received: u64,
    requested_all: bool,
    /// Requests registered but not yet submitted.
    ring: VecDeque<CompletedRead>,
    /// Submitted requests whose completions have not been dispatched.
    completions: VecDeque<CompletedRead>,
    total_bytes_accessed: u64,
}

impl<'a> IoWorker<'a> {
    /// Creates the worker for one device.
    ///
    /// # Arguments
    /// * `id` - Device index this worker serves
    /// * `graph` - Graph store owning the device files
    /// * `out` - Fan-out queue the fetched page runs are published into
    /// * `buffer_bytes` - This device's share of the page-buffer budget
    ///
    /// # Returns
    /// A worker with an empty ring and a page quota derived from
    /// `buffer_bytes`.
    ///
    /// # Panics
    /// * If the budget is smaller than one page
    pub fn new(
        id: usize,
        graph: &'a DiskGraph,
        out: &'a SegQueue<PageRun>,
        buffer_bytes: u64,
    ) -> Self {
        let num_buffer_pages = (buffer_bytes as i64) / PAGE_SIZE as i64;
        assert!(
            num_buffer_pages >= 1,
            "device {} page quota is empty ({} buffer bytes)",
            id,
            buffer_bytes
        );
        let max_pages_per_req = IO_MAX_PAGES_PER_REQ.min(num_buffer_pages as usize).max(1);
        Self {
            id,
            graph,
            out,
            num_buffer_pages,
            max_pages_per_req,
            queued: 0,
            sent: 0,
            received: 0,
            requested_all: false,
            ring: VecDeque::with_capacity(IO_QUEUE_DEPTH),
            completions: VecDeque::with_capacity(IO_QUEUE_DEPTH),
            total_bytes_accessed: 0,
        }
    }

    /// Drives the device until every requested page has been read and
    /// published.
    ///
    /// Installs the page quota, waits for the round start, then loops the
    /// mode-specific submission routine against completion dispatch until
    /// the workload is exhausted.
    ///
    /// # Arguments
    /// * `mode` - The page workload of this round
    /// * `sync` - Round-wide synchronization state
    ///
    /// # Returns
    /// The total number of bytes this worker read.
    pub fn run(mut self, mode: IoMode, sync: &Synchronization) -> u64 {
        sync.set_free_pages(self.id, self.num_buffer_pages);
        sync.wait_io_start();

        match mode {
            IoMode::DenseAll => self.run_dense_all(sync),
            IoMode::Dense => self.run_dense(sync),
            IoMode::Sparse(pages) => self.run_sparse(&pages, sync),
        }

        self.total_bytes_accessed
    }

    fn run_dense_all(&mut self, sync: &Synchronization) {
        let end = self.graph.num_pages(self.id) as PageId;
        let mut beg: PageId = 0;

        while !self.requested_all || self.received < self.queued {
            self.submit_dense_all(&mut beg, end, sync);
            if self.receive_and_dispatch() == 0 {
                std::thread::yield_now();
            }
        }
    }

    fn run_dense(&mut self, sync: &Synchronization) {
        let bitmap = self.graph.activated_pages(self.id);
        let end = self.graph.num_pages(self.id) as PageId;
        let mut beg: PageId = 0;

        while !self.requested_all || self.received < self.queued {
            self.submit_dense(bitmap, &mut beg, end, sync);
            if self.receive_and_dispatch() == 0 {
                std::thread::yield_now();
            }
        }
    }

    fn run_sparse(&mut self, pages: &[PageId], sync: &Synchronization) {
        let bitmap = self.graph.activated_pages(self.id);
        let mut next: usize = 0;

        while !self.requested_all || self.received < self.queued {
            self.submit_sparse(pages, &mut next, bitmap, sync);
            if self.receive_and_dispatch() == 0 {
                std::thread::yield_now();
            }
        }
    }

    /// Registers sequential reads over the whole device, coalescing up to
    /// the per-request page cap.
    fn submit_dense_all(&mut self, beg: &mut PageId, end: PageId, sync: &Synchronization) {
        while *beg < end && self.queued - self.sent < IO_QUEUE_DEPTH as u64 {
            let page_id = *beg;
            let num_pages = self.max_pages_per_req.min((end - *beg) as usize);
            if !self.reserve_pages(num_pages, sync) {
                break;
            }
            *beg += num_pages as PageId;
            self.enqueue_request(page_id, num_pages);
        }
        if *beg >= end {
            self.requested_all = true;
        }
        self.submit_batch();
    }

    /// Registers reads for the pages set in the activation bitmap,
    /// coalescing runs of contiguous activated pages.
    fn submit_dense(
        &mut self,
        bitmap: &Bitmap,
        beg: &mut PageId,
        end: PageId,
        sync: &Synchronization,
    ) {
        while *beg < end && self.queued - self.sent < IO_QUEUE_DEPTH as u64 {
            // Skip a whole zero word at a time; keeps the queue busy on
            // sparse activation patterns.
            if bitmap.get_word(Bitmap::word_offset(*beg as usize)) == 0 {
                *beg = Bitmap::pos_in_next_word(*beg as usize) as PageId;
                continue;
            }
            if !bitmap.get_bit(*beg as usize) {
                *beg += 1;
                continue;
            }

            // Coalesce a run of contiguous activated pages.
            let run_start = *beg;
            let mut cursor = *beg + 1;
            let mut num_pages = 1usize;
            while cursor < end
                && num_pages < self.max_pages_per_req
                && bitmap.get_bit(cursor as usize)
            {
                num_pages += 1;
                cursor += 1;
            }

            if !self.reserve_pages(num_pages, sync) {
                break;
            }
            *beg = cursor;
            self.enqueue_request(run_start, num_pages);
        }
        if *beg >= end {
            self.requested_all = true;
        }
        self.submit_batch();
    }

    /// Registers one-page reads for the listed pages, skipping pages whose
    /// activation bit is already set and marking each issued page.
    fn submit_sparse(
        &mut self,
        pages: &[PageId],
        next: &mut usize,
        bitmap: &Bitmap,
        sync: &Synchronization,
    ) {
        while *next < pages.len() && self.queued - self.sent < IO_QUEUE_DEPTH as u64 {
            let page_id = pages[*next];
            // Already issued this round.
            if bitmap.get_bit(page_id as usize) {
                *next += 1;
                continue;
            }

            if !self.reserve_pages(1, sync) {
                break;
            }
            self.enqueue_request(page_id, 1);
            // Only this worker touches the device's bitmap in sparse mode.
            bitmap.set_bit(page_id as usize);
            *next += 1;
        }
        if *next >= pages.len() {
            self.requested_all = true;
        }
        self.submit_batch();
    }

    /// Takes `num_pages` out of the quota if currently available. When the
    /// quota is exhausted the caller backs out to its outer loop, which
    /// keeps dispatching until consumers return pages.
    ///
    /// # Arguments
    /// * `num_pages` - Pages the next request needs
    /// * `sync` - Round-wide synchronization state holding the counters
    ///
    /// # Returns
    /// Whether the pages were reserved.
    fn reserve_pages(&mut self, num_pages: usize, sync: &Synchronization) -> bool {
        if sync.free_pages(self.id) < num_pages as i64 {
            return false;
        }
        sync.take_free_pages(self.id, num_pages as i64);
        true
    }

    /// Allocates the buffer and registers the read in the submission ring.
    ///
    /// # Arguments
    /// * `first_page` - First device-local page of the request
    /// * `num_pages` - Number of contiguous pages to read
    fn enqueue_request(&mut self, first_page: PageId, num_pages: usize) {
        let buf = PageBuffer::alloc(num_pages);
        self.ring.push_back(CompletedRead {
            first_page,
            num_pages,
            buf,
        });
        self.queued += 1;
        self.total_bytes_accessed += (num_pages * PAGE_SIZE) as u64;
    }

    /// Submits everything registered since the last batch. The positional
    /// reads complete here; a short read aborts the round.
    ///
    /// # Panics
    /// * Via the graph store, on any read error
    fn submit_batch(&mut self) {
        while let Some(mut read) = self.ring.pop_front() {
            self.graph.read_pages(
                self.id,
                read.first_page,
                read.num_pages,
                read.buf.as_mut_slice(),
            );
            self.completions.push_back(read);
            self.sent += 1;
        }
    }

    /// Publishes pending completions into the fan-out queue.
    ///
    /// # Returns
    /// The number of dispatched runs; zero once the workload is finished.
    fn receive_and_dispatch(&mut self) -> usize {
        if self.requested_all && self.sent == self.received {
            return 0;
        }
        let mut dispatched = 0;
        while let Some(read) = self.completions.pop_front() {
            self.out.push(PageRun {
                device: self.id,
                first_page: read.first_page,
                num_pages: read.num_pages,
                buf: read.buf,
            });
            self.received += 1;
            dispatched += 1;
        }
        dispatched
    }
}

#[cfg(test)]
mod test_io {
    use super::*;
    use crate::storage::convert::GraphData;

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

    fn dense_graph(num_nodes: usize, out_degree: u32) -> GraphData {
        let mut edges = Vec::new();
        for v in 0..num_nodes as u32 {
            for i in 0..out_degree {
                edges.push((v, (v + i + 1) % num_nodes as u32));
            }
        }
        GraphData::from_edges(num_nodes, &edges)
    }

    #[test]
    fn test_page_buffer_is_page_aligned() {
        let buf = PageBuffer::alloc(3);
        assert_eq!(buf.as_slice().len(), 3 * PAGE_SIZE);
        assert_eq!(buf.as_slice().as_ptr() as usize % PAGE_SIZE, 0);
    }

    #[test]
    fn test_dense_all_reads_every_page() {
        let graph = dense_graph(2000, 8);
        let (_dir, disk) = open_graph(&graph, 1);
        let queue: SegQueue<PageRun> = SegQueue::new();
        let sync = Synchronization::new(1);
        sync.notify_io_start();

        let worker = IoWorker::new(0, &disk, &queue, 64 * PAGE_SIZE as u64);
        let bytes = worker.run(IoMode::DenseAll, &sync);
        assert_eq!(bytes, disk.num_pages(0) * PAGE_SIZE as u64);

        let mut pages_seen = 0u64;
        while let Some(run) = queue.pop() {
            pages_seen += run.num_pages as u64;
            sync.add_free_pages(run.device, run.num_pages as i64);
        }
        assert_eq!(pages_seen, disk.num_pages(0));
        assert!(sync.min_free_pages(0) >= 0);
    }

    #[test]
    fn test_tiny_quota_makes_progress_with_concurrent_consumer() {
        let graph = dense_graph(4000, 8);
        let (_dir, disk) = open_graph(&graph, 1);
        let total_pages = disk.num_pages(0);
        assert!(total_pages > 4);

        let queue: SegQueue<PageRun> = SegQueue::new();
        let sync = Synchronization::new(1);

        std::thread::scope(|s| {
            let consumer = s.spawn(|| {
                sync.wait_io_start();
                let mut seen = 0u64;
                while seen < total_pages {
                    match queue.pop() {
                        Some(run) => {
                            seen += run.num_pages as u64;
                            let (device, num) = (run.device, run.num_pages);
                            drop(run);
                            sync.add_free_pages(device, num as i64);
                        }
                        None => std::thread::yield_now(),
                    }
                }
                seen
            });

            // Two pages of quota force constant back-and-forth.
            let worker = IoWorker::new(0, &disk, &queue, 2 * PAGE_SIZE as u64);
            let producer = s.spawn(|| worker.run(IoMode::DenseAll, &sync));
            sync.notify_io_start();

            assert_eq!(producer.join().expect("io worker"), total_pages * PAGE_SIZE as u64);
            assert_eq!(consumer.join().expect("consumer"), total_pages);
        });

        // The quota was never overdrawn.
        assert!(sync.min_free_pages(0) >= 0);
    }

    #[test]
    fn test_sparse_dedupes_repeated_pages() {
        let graph = dense_graph(2000, 8);
        let (_dir, disk) = open_graph(&graph, 1);
        let queue: SegQueue<PageRun> = SegQueue::new();
        let sync = Synchronization::new(1);
        sync.notify_io_start();

        let worker = IoWorker::new(0, &disk, &queue, 16 * PAGE_SIZE as u64);
        let pages = vec![0, 1, 1, 0, 2, 2, 2];
        let bytes = worker.run(IoMode::Sparse(pages), &sync);
        assert_eq!(bytes, 3 * PAGE_SIZE as u64);

        let mut seen = Vec::new();
        while let Some(run) = queue.pop() {
            seen.push(run.first_page);
            sync.add_free_pages(run.device, run.num_pages as i64);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
        disk.reset_page_activation();
    }

    #[test]
    fn test_dense_reads_only_activated_pages() {
        let graph = dense_graph(4000, 8);
        let (_dir, disk) = open_graph(&graph, 1);
        let total = disk.num_pages(0);
        assert!(total >= 8);

        // Activate pages 0, 1 and the last one.
        disk.activated_pages(0).set_bit_atomic(0);
        disk.activated_pages(0).set_bit_atomic(1);
        disk.activated_pages(0).set_bit_atomic(total as usize - 1);

        let queue: SegQueue<PageRun> = SegQueue::new();
        let sync = Synchronization::new(1);
        sync.notify_io_start();

        let worker = IoWorker::new(0, &disk, &queue, 16 * PAGE_SIZE as u64);
        let bytes = worker.run(IoMode::Dense, &sync);
        assert_eq!(bytes, 3 * PAGE_SIZE as u64);

        let mut pages = Vec::new();
        while let Some(run) = queue.pop() {
            for p in 0..run.num_pages {
                pages.push(run.first_page + p as u32);
            }
            sync.add_free_pages(run.device, run.num_pages as i64);
        }
        pages.sort_unstable();
        assert_eq!(pages, vec![0, 1, total as u32 - 1]);
        disk.reset_page_activation();
    }
}
