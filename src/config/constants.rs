//! Configuration constants.
//!
//! Defaults for the polling subsystem. Timeouts mirror the calculator's
//! expected latency envelope: a calculator answer normally arrives well
//! under half a second, so both the per-call budget and the semaphore wait
//! share the same default.

use std::time::Duration;

/// Default calculator endpoint.
pub const DEFAULT_ACCRUAL_ADDRESS: &str = "http://localhost:8081";

/// Default SQLite database path.
pub const DB_PATH: &str = "./accrual_agent.db";

/// Initial semaphore capacity. Effectively "unlimited" until the calculator
/// reports a ceiling and the supervisor retunes.
pub const DEFAULT_INITIAL_MAX_REQUESTS: u64 = 100_500;

/// Workers per CPU core.
pub const DEFAULT_WORKER_MULTIPLIER: usize = 2;

/// Per-call budget for one calculator request.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a worker waits for a request slot before giving up.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(500);

/// Watcher polling period.
pub const DEFAULT_WATCHER_TICK: Duration = Duration::from_secs(3);

/// Result buffer flush threshold.
pub const DEFAULT_RESULT_BATCH_SIZE: usize = 64;

/// Age after which a PROCESSING order is considered stuck and re-dispatched.
pub const DEFAULT_PROCESSING_STALE_AFTER: Duration = Duration::from_secs(30);

/// Storage retry policy: delays between attempts for transient errors.
pub const STORE_RETRY_DELAYS_SECS: [u64; 3] = [1, 3, 5];
