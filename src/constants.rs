//! Global constants for texture replacement.

/// Most mip levels a replacement can provide.
pub const MAX_REPLACEMENT_MIP_LEVELS: usize = 8;

/// Default per-call readiness budget in seconds.
pub const DEFAULT_POLL_BUDGET_SECS: f64 = 0.0005;

/// Default age after which unused decoded data may be purged.
pub const DEFAULT_PURGE_AFTER_SECS: u64 = 20;

/// Default number of decode worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Copies smaller than this are done on the calling thread.
pub const DEFAULT_PARALLEL_COPY_MIN_BYTES: usize = 256 * 1024;

/// Fewest rows handed to one thread in a strided parallel copy.
pub const MIN_LINES_PER_THREAD: usize = 4;
