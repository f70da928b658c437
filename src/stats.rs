//! Process-level I/O statistics.
//!
//! Reads byte and syscall counters from the kernel around a measured code
//! block, so a driver can report how much real device traffic an algorithm
//! run produced. On non-Linux systems only wall time is reported.

use std::fmt;
use std::time::{Duration, Instant};

/// Represents Input/Output statistics collected from system monitoring.
///
/// This structure contains both the amount of data transferred and the
/// number of system calls made for read and write operations. It provides
/// methods to calculate differences and totals and to determine whether
/// any I/O activity occurred during a measurement period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IoStats {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_syscalls: u64,
    pub write_syscalls: u64,
}

impl IoStats {
    /// Creates a new instance with all counters initialized to zero.
    ///
    /// # Returns
    /// A new `IoStats` instance suitable as a measurement baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the difference between two statistics snapshots.
    ///
    /// Subtracts the other snapshot's counters from this one using
    /// saturating subtraction, so the result is never negative even if a
    /// counter moved backwards.
    ///
    /// # Arguments
    /// * `other` - The earlier snapshot to subtract from this one
    ///
    /// # Returns
    /// A new `IoStats` instance containing the counter deltas.
    pub fn diff(&self, other: &IoStats) -> IoStats {
        IoStats {
            read_bytes: self.read_bytes.saturating_sub(other.read_bytes),
            write_bytes: self.write_bytes.saturating_sub(other.write_bytes),
            read_syscalls: self.read_syscalls.saturating_sub(other.read_syscalls),
            write_syscalls: self.write_syscalls.saturating_sub(other.write_syscalls),
        }
    }

    /// Calculates the total number of bytes transferred in both read and
    /// write operations.
    ///
    /// # Returns
    /// The total number of bytes transferred as a `u64` value.
    pub fn total_bytes(&self) -> u64 {
        self.read_bytes + self.write_bytes
    }

    /// Calculates the total number of system calls made for both read and
    /// write operations.
    ///
    /// # Returns
    /// The total number of system calls as a `u64` value.
    pub fn total_syscalls(&self) -> u64 {
        self.read_syscalls + self.write_syscalls
    }

    /// Determines whether any I/O operations have been recorded.
    ///
    /// # Returns
    /// `true` if any bytes were transferred or any system calls were made,
    /// `false` otherwise.
    pub fn has_io(&self) -> bool {
        self.total_bytes() > 0 || self.total_syscalls() > 0
    }
}

impl fmt::Display for IoStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IO: read {} bytes ({} syscalls), write {} bytes ({} syscalls), total {} bytes",
            self.read_bytes,
            self.read_syscalls,
            self.write_bytes,
            self.write_syscalls,
            self.total_bytes()
        )
    }
}

/// The complete result of one measured execution: the return value, the
/// wall-clock duration, and the I/O counter deltas observed while the
/// measured block ran.
///
/// # Type Parameters
/// * `T` - The type of the return value of the measured block
pub struct ExecutionResult<T> {
    pub result: T,
    pub duration: Duration,
    pub io_stats: IoStats,
}

impl<T> ExecutionResult<T> {
    /// Prints a one-line summary with timing, traffic, and throughput.
    ///
    /// Throughput is only shown when the measured block produced I/O and
    /// took a non-zero amount of time.
    ///
    /// # Arguments
    /// * `operation_name` - Name of the measured operation, used as the
    ///   line prefix
    pub fn print_summary(&self, operation_name: &str) {
        print!(
            "{}: time {:?}, IO {} bytes",
            operation_name,
            self.duration,
            self.io_stats.total_bytes()
        );
        if self.io_stats.has_io() && self.duration.as_secs_f64() > 0.0 {
            let throughput =
                self.io_stats.total_bytes() as f64 / self.duration.as_secs_f64() / 1024.0 / 1024.0;
            print!(" ({:.2} MB/s)", throughput);
        }
        println!();
    }
}

/// Entry point for measuring the I/O behavior of a code block.
///
/// The collector snapshots the process counters before and after the
/// measured block and reports the delta, so concurrent background traffic
/// of the same process is attributed to the block.
pub struct IoStatsCollector;

impl IoStatsCollector {
    /// Retrieves the current process's I/O statistics from the proc
    /// filesystem.
    ///
    /// Reads `/proc/self/io`, which reports bytes actually transferred to
    /// and from the storage layer together with syscall counts.
    ///
    /// # Returns
    /// A `Result` containing the current `IoStats`, or an `std::io::Error`
    /// if the proc filesystem cannot be read.
    #[cfg(target_os = "linux")]
    fn current() -> std::io::Result<IoStats> {
        let content = std::fs::read_to_string("/proc/self/io")?;
        let mut stats = IoStats::new();
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(value) = value.parse::<u64>() else {
                continue;
            };
            match key {
                "read_bytes:" => stats.read_bytes = value,
                "write_bytes:" => stats.write_bytes = value,
                "syscr:" => stats.read_syscalls = value,
                "syscw:" => stats.write_syscalls = value,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Returns empty statistics on systems without per-process I/O
    /// accounting, keeping the API uniform across platforms.
    ///
    /// # Returns
    /// A `Result` containing an empty `IoStats` instance.
    #[cfg(not(target_os = "linux"))]
    fn current() -> std::io::Result<IoStats> {
        Ok(IoStats::new())
    }

    /// Measures the execution time and I/O delta of a function.
    ///
    /// # Arguments
    /// * `f` - The closure to execute and measure
    ///
    /// # Type Parameters
    /// * `F` - Closure type, `FnOnce() -> R`
    /// * `R` - Return type of the measured closure
    ///
    /// # Returns
    /// An `ExecutionResult<R>` with the closure's return value, its wall
    /// time, and the I/O counters it moved.
    pub fn measure<F, R>(f: F) -> ExecutionResult<R>
    where
        F: FnOnce() -> R,
    {
        let start_io = Self::current().unwrap_or_default();
        let start_time = Instant::now();

        let result = f();

        let duration = start_time.elapsed();
        let end_io = Self::current().unwrap_or_default();

        ExecutionResult {
            result,
            duration,
            io_stats: end_io.diff(&start_io),
        }
    }

    /// Measures a function, prints the summary line, and passes the return
    /// value through.
    ///
    /// # Arguments
    /// * `operation_name` - Name of the measured operation for the report
    /// * `f` - The closure to execute and measure
    ///
    /// # Returns
    /// The return value of the measured closure.
    pub fn measure_and_print<F, R>(operation_name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let execution_result = Self::measure(f);
        execution_result.print_summary(operation_name);
        execution_result.result
    }
}

/// Convenience macro wrapping a block in
/// [`IoStatsCollector::measure_and_print`].
///
/// # Arguments
/// * `$name` - Expression evaluating to the operation name
/// * `$code` - Block to measure and execute
///
/// # Returns
/// The value of the executed block.
#[macro_export]
macro_rules! measure_io {
    ($name:expr, $code:block) => {{
        $crate::stats::IoStatsCollector::measure_and_print($name, || $code)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff() {
        let before = IoStats {
            read_bytes: 100,
            write_bytes: 200,
            read_syscalls: 10,
            write_syscalls: 20,
        };
        let after = IoStats {
            read_bytes: 150,
            write_bytes: 300,
            read_syscalls: 15,
            write_syscalls: 25,
        };
        let diff = after.diff(&before);
        assert_eq!(diff.read_bytes, 50);
        assert_eq!(diff.write_bytes, 100);
        assert_eq!(diff.total_bytes(), 150);
        assert!(diff.has_io());
    }

    #[test]
    fn test_measure_returns_result() {
        let result = IoStatsCollector::measure(|| {
            std::thread::sleep(Duration::from_millis(1));
            42
        });
        assert_eq!(result.result, 42);
        assert!(result.duration.as_micros() >= 1000);
    }

    #[test]
    fn test_measure_detects_file_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("probe.bin");
        let result = IoStatsCollector::measure(|| {
            std::fs::write(&path, vec![7u8; 1 << 16]).expect("write probe");
            let file = std::fs::File::open(&path).expect("open probe");
            file.sync_all().ok();
            "done"
        });
        assert_eq!(result.result, "done");
        #[cfg(target_os = "linux")]
        assert!(result.io_stats.write_syscalls > 0 || result.io_stats.write_bytes > 0);
    }
}
