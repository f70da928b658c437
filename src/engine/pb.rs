//! Propagation-blocking scatter and gather workers.
//!
//! Scatter workers walk fetched pages like the direct path but, instead of
//! touching destination state, they append `(dst, payload)` records into
//! the destination-range bins through thread-private write buffers. Gather
//! workers drain full bins, fold every record into destination state with
//! the user's gather function, and activate freshly awakened destinations.

use std::time::Instant;

use crossbeam::queue::SegQueue;

use crate::config::IO_QUEUE_BULK_DEQ;
use crate::engine::bins::decode_record;
use crate::engine::sync::Synchronization;
use crate::frontier::Frontier;
use crate::storage::DiskGraph;
use crate::types::{PageRun, Payload, PbEdgeOp};

pub struct ScatterWorker<'a> {
    id: usize,
    graph: &'a DiskGraph,
    queues: &'a [std::sync::Arc<SegQueue<PageRun>>],
    in_frontier: Option<&'a Frontier>,
    #[allow(dead_code)]
    num_processed_pages: u64,
}

impl<'a> ScatterWorker<'a> {
    /// Creates one scatter worker.
    ///
    /// # Arguments
    /// * `id` - Worker slot; `id % num_devices` selects its fan-out queue
    /// * `graph` - Graph store for page decoding
    /// * `queues` - All per-device fan-out queues
    /// * `in_frontier` - Membership filter, `None` for dense-all rounds
    pub fn new(
        id: usize,
        graph: &'a DiskGraph,
        queues: &'a [std::sync::Arc<SegQueue<PageRun>>],
        in_frontier: Option<&'a Frontier>,
    ) -> Self {
        Self {
            id,
            graph,
            queues,
            in_frontier,
            num_processed_pages: 0,
        }
    }

    /// Runs until I/O is done and the queue has been drained twice, then
    /// flushes the remaining write buffers.
    ///
    /// # Arguments
    /// * `func` - User function; `cond` + `scatter` per edge, plus the bins
    /// * `sync` - Round-wide synchronization state
    ///
    /// # Returns
    /// The worker's wall time in seconds.
    pub fn run<F: PbEdgeOp>(mut self, func: &F, sync: &Synchronization) -> f64 {
        let time_start = Instant::now();
        let mut writer = func.bins().writer();

        sync.wait_io_start();

        let queue = &self.queues[self.id % self.graph.num_devices()];
        let mut io_done = false;

        loop {
            loop {
                let mut count = 0;
                while count < IO_QUEUE_BULK_DEQ {
                    match queue.pop() {
                        Some(run) => {
                            self.process_run(func, &mut writer, run, sync);
                            count += 1;
                        }
                        None => break,
                    }
                }
                if count == 0 {
                    break;
                }
            }

            if sync.check_io_done() {
                if io_done {
                    break;
                }
                io_done = true;
            } else {
                std::thread::yield_now();
            }
        }

        // Remaining buffered records go to the bins before this worker is
        // counted as finished.
        writer.finish();

        time_start.elapsed().as_secs_f64()
    }

    fn process_run<F: PbEdgeOp>(
        &mut self,
        func: &F,
        writer: &mut crate::engine::bins::BinWriter<'_>,
        run: PageRun,
        sync: &Synchronization,
    ) {
        crate::engine::for_each_edge_in_run(self.graph, self.in_frontier, &run, |src, dst| {
            if func.cond(dst) {
                writer.push(dst, func.scatter(src, dst));
            }
        });
        self.num_processed_pages += run.num_pages as u64;
        let (device, num_pages) = (run.device, run.num_pages);
        drop(run);
        sync.add_free_pages(device, num_pages as i64);
    }
}

pub struct GatherWorker<'a> {
    #[allow(dead_code)]
    id: usize,
    out_frontier: Option<&'a Frontier>,
}

impl<'a> GatherWorker<'a> {
    /// Creates one gather worker.
    ///
    /// # Arguments
    /// * `id` - Worker slot, kept for reporting
    /// * `out_frontier` - Destination activations, `None` under `NO_OUTPUT`
    pub fn new(id: usize, out_frontier: Option<&'a Frontier>) -> Self {
        Self { id, out_frontier }
    }

    /// Runs until binning is done and no bin is pending, with one extra
    /// check pass after the flag.
    ///
    /// # Arguments
    /// * `func` - User function; `gather` per record, plus the bins
    /// * `sync` - Round-wide synchronization state
    ///
    /// # Returns
    /// The worker's wall time in seconds.
    pub fn run<F: PbEdgeOp>(self, func: &F, sync: &Synchronization) -> f64 {
        let time_start = Instant::now();

        sync.wait_io_start();

        let mut binning_done = false;

        loop {
            let job_exists = self.try_gather(func);

            if binning_done && !job_exists {
                break;
            }

            if sync.check_binning_done() {
                binning_done = true;
            } else if !job_exists {
                std::thread::yield_now();
            }
        }

        time_start.elapsed().as_secs_f64()
    }

    /// Drains one full bin if available.
    ///
    /// # Returns
    /// `true` if a bin was drained, `false` if the queue was empty.
    fn try_gather<F: PbEdgeOp>(&self, func: &F) -> bool {
        let Some(bin) = func.bins().pop_full_bin() else {
            return false;
        };

        for record in bin.drain() {
            let (dst, bits) = decode_record(record);
            let val = <F::Value as Payload>::from_bits(bits);
            if func.gather(dst, val) {
                if let Some(out) = self.out_frontier {
                    out.activate(dst);
                }
            }
        }

        bin.reset();
        true
    }
}
