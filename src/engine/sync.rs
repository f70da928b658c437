//! Synchronization substrate for one round.
//!
//! All workers of a round share one `Synchronization`: the start barrier,
//! the pipeline-stage completion flags, and the per-device free-page
//! counters that throttle the I/O workers.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};

/// # Fields
/// * `io_ready` / `io_ready_cv` - Start barrier released once all workers
///   of a round are forked
/// * `io_done` - Set after every I/O worker has exited
/// * `binning_done` - Set after the scatter side has exited and the bins
///   were flushed
/// * `free_pages` - Per-device page quota counters
/// * `min_free_pages` - Per-device low-water marks of the quota counters
pub struct Synchronization {
    io_ready: Mutex<bool>,
    io_ready_cv: Condvar,
    io_done: AtomicBool,
    binning_done: AtomicBool,
    free_pages: Vec<AtomicI64>,
    /// Low-water mark of each free-page counter; stays non-negative iff the
    /// in-flight footprint never exceeded the quota.
    min_free_pages: Vec<AtomicI64>,
}

impl Synchronization {
    pub fn new(num_devices: usize) -> Self {
        let mut free_pages = Vec::with_capacity(num_devices);
        free_pages.resize_with(num_devices, || AtomicI64::new(0));
        let mut min_free_pages = Vec::with_capacity(num_devices);
        min_free_pages.resize_with(num_devices, || AtomicI64::new(i64::MAX));
        Self {
            io_ready: Mutex::new(false),
            io_ready_cv: Condvar::new(),
            io_done: AtomicBool::new(false),
            binning_done: AtomicBool::new(false),
            free_pages,
            min_free_pages,
        }
    }

    /// Blocks until the orchestrator releases the round.
    pub fn wait_io_start(&self) {
        let mut ready = self.io_ready.lock().expect("io_ready lock poisoned");
        while !*ready {
            ready = self
                .io_ready_cv
                .wait(ready)
                .expect("io_ready lock poisoned");
        }
    }

    /// Releases every worker waiting on the start barrier.
    pub fn notify_io_start(&self) {
        let mut ready = self.io_ready.lock().expect("io_ready lock poisoned");
        *ready = true;
        self.io_ready_cv.notify_all();
    }

    pub fn mark_io_done(&self) {
        self.io_done.store(true, Ordering::Release);
    }

    pub fn check_io_done(&self) -> bool {
        self.io_done.load(Ordering::Acquire)
    }

    pub fn mark_binning_done(&self) {
        self.binning_done.store(true, Ordering::Release);
    }

    pub fn check_binning_done(&self) -> bool {
        self.binning_done.load(Ordering::Acquire)
    }

    /// Installs the page quota of one device at round start.
    ///
    /// # Arguments
    /// * `device` - Device index
    /// * `num` - Number of pages the device may hold in flight
    pub fn set_free_pages(&self, device: usize, num: i64) {
        self.free_pages[device].store(num, Ordering::Release);
        self.min_free_pages[device].store(num, Ordering::Release);
    }

    pub fn free_pages(&self, device: usize) -> i64 {
        self.free_pages[device].load(Ordering::Acquire)
    }

    /// Consumer side: credits pages back after a buffer is released.
    pub fn add_free_pages(&self, device: usize, num: i64) {
        self.free_pages[device].fetch_add(num, Ordering::AcqRel);
    }

    /// Producer side: takes `num` pages out of the quota. The caller must
    /// have observed `free_pages(device) >= num` first.
    pub fn take_free_pages(&self, device: usize, num: i64) {
        let after = self.free_pages[device].fetch_sub(num, Ordering::AcqRel) - num;
        self.min_free_pages[device].fetch_min(after, Ordering::AcqRel);
    }

    /// Lowest value the device's free-page counter reached this round.
    ///
    /// # Returns
    /// The low-water mark; non-negative iff the in-flight footprint never
    /// exceeded the quota.
    pub fn min_free_pages(&self, device: usize) -> i64 {
        self.min_free_pages[device].load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_start_barrier_releases_waiters() {
        let sync = Arc::new(Synchronization::new(1));
        let waiter = {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || {
                sync.wait_io_start();
                true
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        sync.notify_io_start();
        assert!(waiter.join().expect("waiter panicked"));
    }

    #[test]
    fn test_free_page_accounting() {
        let sync = Synchronization::new(2);
        sync.set_free_pages(0, 8);
        sync.take_free_pages(0, 3);
        assert_eq!(sync.free_pages(0), 5);
        sync.take_free_pages(0, 5);
        assert_eq!(sync.free_pages(0), 0);
        sync.add_free_pages(0, 8);
        assert_eq!(sync.free_pages(0), 8);
        assert_eq!(sync.min_free_pages(0), 0);
        // The other device is untouched.
        assert_eq!(sync.free_pages(1), 0);
    }

    #[test]
    fn test_done_flags() {
        let sync = Synchronization::new(1);
        assert!(!sync.check_io_done());
        sync.mark_io_done();
        assert!(sync.check_io_done());
        assert!(!sync.check_binning_done());
        sync.mark_binning_done();
        assert!(sync.check_binning_done());
    }
}
