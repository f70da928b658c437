//! The runtime owns what outlives a single round: worker counts, the
//! per-device fan-out queues, the round counter, and cumulative I/O
//! statistics. A handle is threaded explicitly through every `edge_map`
//! call; there is no process-wide singleton.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::queue::SegQueue;

use crate::config::BINNING_WORKER_RATIO;
use crate::engine::sync::Synchronization;
use crate::types::PageRun;

pub struct Runtime {
    num_compute_workers: usize,
    num_io_workers: usize,
    io_buffer_bytes: u64,
    binning_ratio: f64,
    /// One fan-out queue per device, shared by its I/O worker and the
    /// compute/scatter workers assigned to it.
    queues: Vec<Arc<SegQueue<PageRun>>>,
    round: AtomicU32,
    total_io_bytes: AtomicU64,
    total_edges: AtomicU64,
    total_io_time_us: AtomicU64,
    /// Free-page counter low-water marks of the most recent round.
    last_min_free_pages: Mutex<Vec<i64>>,
}

impl Runtime {
    /// Creates a runtime for `num_compute_workers` compute threads and one
    /// I/O thread per device, sharing `io_buffer_bytes` of page buffers.
    ///
    /// # Arguments
    /// * `num_compute_workers` - Compute threads forked per round
    /// * `num_io_workers` - I/O threads, one per storage device
    /// * `io_buffer_bytes` - Page-buffer budget shared across devices
    ///
    /// # Returns
    /// A runtime with one fan-out queue per device and zeroed counters.
    ///
    /// # Panics
    /// * If either worker count is zero
    pub fn new(num_compute_workers: usize, num_io_workers: usize, io_buffer_bytes: u64) -> Self {
        assert!(num_compute_workers >= 1, "at least one compute worker");
        assert!(num_io_workers >= 1, "at least one io worker");

        // Size the shared pool used by the vertex-side parallel loops. A
        // pool may already exist when several runtimes share a process.
        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(num_compute_workers)
            .build_global();

        println!(
            "Number of threads: {} (compute {}, io {})",
            num_compute_workers + num_io_workers,
            num_compute_workers,
            num_io_workers
        );

        let queues = (0..num_io_workers)
            .map(|_| Arc::new(SegQueue::new()))
            .collect();

        Self {
            num_compute_workers,
            num_io_workers,
            io_buffer_bytes,
            binning_ratio: BINNING_WORKER_RATIO,
            queues,
            round: AtomicU32::new(0),
            total_io_bytes: AtomicU64::new(0),
            total_edges: AtomicU64::new(0),
            total_io_time_us: AtomicU64::new(0),
            last_min_free_pages: Mutex::new(Vec::new()),
        }
    }

    /// Sets the fraction of compute workers that scatter on the
    /// propagation-blocking pathway.
    ///
    /// # Arguments
    /// * `ratio` - Scatter fraction, strictly between 0 and 1
    ///
    /// # Panics
    /// * If `ratio` is outside the open interval (0, 1)
    pub fn init_binning(&mut self, ratio: f64) {
        assert!(
            ratio > 0.0 && ratio < 1.0,
            "binning ratio must be in (0, 1), got {}",
            ratio
        );
        self.binning_ratio = ratio;
    }

    pub fn num_compute_workers(&self) -> usize {
        self.num_compute_workers
    }

    pub fn num_io_workers(&self) -> usize {
        self.num_io_workers
    }

    /// Scatter share of the compute workers.
    ///
    /// # Returns
    /// `ratio * num_compute_workers` rounded down, clamped so that both the
    /// scatter and the gather side keep at least one worker.
    pub fn num_scatter_workers(&self) -> usize {
        let scatter = (self.binning_ratio * self.num_compute_workers as f64) as usize;
        scatter.clamp(1, self.num_compute_workers.saturating_sub(1).max(1))
    }

    pub fn num_gather_workers(&self) -> usize {
        self.num_compute_workers - self.num_scatter_workers()
    }

    pub fn queues(&self) -> &[Arc<SegQueue<PageRun>>] {
        &self.queues
    }

    pub fn queue(&self, device: usize) -> &SegQueue<PageRun> {
        &self.queues[device]
    }

    /// Page-buffer byte budget of one device.
    pub fn buffer_bytes_per_device(&self) -> u64 {
        self.io_buffer_bytes / self.num_io_workers as u64
    }

    pub fn round(&self) -> u32 {
        self.round.load(Ordering::Relaxed)
    }

    pub fn inc_round(&self) {
        self.round.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds one finished round into the cumulative statistics.
    ///
    /// # Arguments
    /// * `sync` - The round's synchronization state, read for the free-page
    ///   low-water marks
    /// * `io_bytes` - Bytes read this round
    /// * `edges` - Edges activated this round
    /// * `io_time` - Seconds the I/O stage took
    pub fn record_round(&self, sync: &Synchronization, io_bytes: u64, edges: u64, io_time: f64) {
        self.total_io_bytes.fetch_add(io_bytes, Ordering::Relaxed);
        self.total_edges.fetch_add(edges, Ordering::Relaxed);
        self.total_io_time_us
            .fetch_add((io_time * 1e6) as u64, Ordering::Relaxed);

        let mut marks = self
            .last_min_free_pages
            .lock()
            .expect("min free pages lock poisoned");
        marks.clear();
        for device in 0..self.num_io_workers {
            marks.push(sync.min_free_pages(device));
        }
    }

    /// Free-page low-water marks observed in the most recent round, one per
    /// device. Non-negative values mean the in-flight footprint stayed
    /// within the quota.
    pub fn last_min_free_pages(&self) -> Vec<i64> {
        self.last_min_free_pages
            .lock()
            .expect("min free pages lock poisoned")
            .clone()
    }

    pub fn total_accessed_io_bytes(&self) -> u64 {
        self.total_io_bytes.load(Ordering::Relaxed)
    }

    pub fn total_accessed_edges(&self) -> u64 {
        self.total_edges.load(Ordering::Relaxed)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let bytes = self.total_io_bytes.load(Ordering::Relaxed);
        let io_time = self.total_io_time_us.load(Ordering::Relaxed) as f64 / 1e6;
        let bw = if io_time > 0.0 {
            bytes as f64 / io_time / (1u64 << 30) as f64
        } else {
            0.0
        };
        println!(
            "# IO SUMMARY    : {} bytes, {:.5} sec, {:.2} GB/s",
            bytes, io_time, bw
        );
        println!(
            "# SUMMARY       : {} edges accessed.",
            self.total_edges.load(Ordering::Relaxed)
        );
    }
}
