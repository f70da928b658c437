//! Direct-path compute workers.
//!
//! A compute worker drains its device's fan-out queue, parses each fetched
//! page run into (src, dst) pairs, and applies the user function's atomic
//! update to every admitted edge, activating destinations in the output
//! frontier. The worker keeps draining for one extra pass after observing
//! `io_done` so the last batch published before the flag is never lost.

use std::time::Instant;

use crossbeam::queue::SegQueue;

use crate::config::IO_QUEUE_BULK_DEQ;
use crate::engine::sync::Synchronization;
use crate::frontier::Frontier;
use crate::storage::DiskGraph;
use crate::types::{DirectEdgeOp, PageRun};

pub struct ComputeWorker<'a> {
    id: usize,
    graph: &'a DiskGraph,
    queues: &'a [std::sync::Arc<SegQueue<PageRun>>],
    in_frontier: Option<&'a Frontier>,
    out_frontier: Option<&'a Frontier>,
    #[allow(dead_code)]
    num_processed_pages: u64,
}

impl<'a> ComputeWorker<'a> {
    /// Creates one direct-path worker.
    ///
    /// # Arguments
    /// * `id` - Worker slot; `id % num_devices` selects its fan-out queue
    /// * `graph` - Graph store for page decoding
    /// * `queues` - All per-device fan-out queues
    /// * `in_frontier` - Membership filter, `None` for dense-all rounds
    /// * `out_frontier` - Destination activations, `None` under `NO_OUTPUT`
    pub fn new(
        id: usize,
        graph: &'a DiskGraph,
        queues: &'a [std::sync::Arc<SegQueue<PageRun>>],
        in_frontier: Option<&'a Frontier>,
        out_frontier: Option<&'a Frontier>,
    ) -> Self {
        Self {
            id,
            graph,
            queues,
            in_frontier,
            out_frontier,
            num_processed_pages: 0,
        }
    }

    /// Runs until I/O is done and the queue has been drained twice.
    ///
    /// # Arguments
    /// * `func` - User function; `cond` + `update_atomic` per edge
    /// * `sync` - Round-wide synchronization state
    ///
    /// # Returns
    /// The worker's wall time in seconds.
    pub fn run<F: DirectEdgeOp>(mut self, func: &F, sync: &Synchronization) -> f64 {
        let time_start = Instant::now();

        sync.wait_io_start();

        let queue = &self.queues[self.id % self.graph.num_devices()];
        let mut io_done = false;

        loop {
            loop {
                let mut count = 0;
                while count < IO_QUEUE_BULK_DEQ {
                    match queue.pop() {
                        Some(run) => {
                            self.process_run(func, run, sync);
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
                // All completed reads are published once the flag is up;
                // one more drain pass picks up the final batch.
                if io_done {
                    break;
                }
                io_done = true;
            } else {
                std::thread::yield_now();
            }
        }

        time_start.elapsed().as_secs_f64()
    }

    /// Applies the function to every edge of one page run, then releases
    /// the buffer and credits the device's quota.
    fn process_run<F: DirectEdgeOp>(&mut self, func: &F, run: PageRun, sync: &Synchronization) {
        crate::engine::for_each_edge_in_run(self.graph, self.in_frontier, &run, |src, dst| {
            if func.cond(dst) && func.update_atomic(src, dst) {
                if let Some(out) = self.out_frontier {
                    out.activate(dst);
                }
            }
        });
        self.num_processed_pages += run.num_pages as u64;
        let (device, num_pages) = (run.device, run.num_pages);
        // Release the buffer before crediting the quota.
        drop(run);
        sync.add_free_pages(device, num_pages as i64);
    }
}
