//! Configuration types and CLI options.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::config::constants::*;

/// Logging level for the application.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Command-line options.
///
/// Every option can also come from the environment, matching the variable
/// names the deployment tooling already sets (`ACCRUAL_SYSTEM_ADDRESS`,
/// `DATABASE_PATH`).
#[derive(Debug, Parser)]
#[command(
    name = "accrual-agent",
    about = "Polls the accrual calculator for pending orders and records the results."
)]
pub struct Opt {
    /// Base URL of the accrual calculator
    #[arg(long = "accrual-address", env = "ACCRUAL_SYSTEM_ADDRESS", default_value = DEFAULT_ACCRUAL_ADDRESS)]
    pub accrual_address: String,

    /// Database path (SQLite file)
    #[arg(long = "db-path", env = "DATABASE_PATH", value_parser, default_value = DB_PATH)]
    pub db_path: PathBuf,

    /// Initial cap on concurrent calculator requests
    #[arg(long, default_value_t = DEFAULT_INITIAL_MAX_REQUESTS)]
    pub initial_max_requests: u64,

    /// Workers per CPU core
    #[arg(long, default_value_t = DEFAULT_WORKER_MULTIPLIER)]
    pub worker_multiplier: usize,

    /// Semaphore acquisition timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_ACQUIRE_TIMEOUT.as_millis() as u64)]
    pub acquire_timeout_ms: u64,

    /// Per-request timeout toward the calculator in milliseconds
    #[arg(long, default_value_t = DEFAULT_CALL_TIMEOUT.as_millis() as u64)]
    pub call_timeout_ms: u64,

    /// Watcher polling period in seconds
    #[arg(long, default_value_t = DEFAULT_WATCHER_TICK.as_secs())]
    pub watcher_tick_secs: u64,

    /// How many results to buffer before a batched write
    #[arg(long, default_value_t = DEFAULT_RESULT_BATCH_SIZE)]
    pub result_batch_size: usize,

    /// Seconds after which a PROCESSING order is re-dispatched
    #[arg(long, default_value_t = DEFAULT_PROCESSING_STALE_AFTER.as_secs())]
    pub stale_after_secs: u64,

    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log format: plain|json
    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,
}

/// Library configuration (no CLI dependencies).
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the accrual calculator
    pub accrual_base_url: String,

    /// Database path (SQLite file)
    pub database_path: PathBuf,

    /// Initial semaphore capacity
    pub initial_max_requests: u64,

    /// Workers = CPU cores x this multiplier
    pub worker_multiplier: usize,

    /// Semaphore acquisition timeout
    pub acquire_timeout: Duration,

    /// Per-call timeout toward the calculator
    pub call_timeout: Duration,

    /// Watcher polling period
    pub watcher_tick: Duration,

    /// Result buffer flush threshold
    pub result_batch_size: usize,

    /// Staleness threshold for re-dispatching PROCESSING orders
    pub processing_stale_after: Duration,

    /// Log level
    pub log_level: LogLevel,

    /// Log format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            accrual_base_url: DEFAULT_ACCRUAL_ADDRESS.to_string(),
            database_path: PathBuf::from(DB_PATH),
            initial_max_requests: DEFAULT_INITIAL_MAX_REQUESTS,
            worker_multiplier: DEFAULT_WORKER_MULTIPLIER,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            watcher_tick: DEFAULT_WATCHER_TICK,
            result_batch_size: DEFAULT_RESULT_BATCH_SIZE,
            processing_stale_after: DEFAULT_PROCESSING_STALE_AFTER,
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
        }
    }
}

/// Construction-time validation failure for [`Config`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("initial_max_requests must be at least 1")]
    ZeroCapacity,
    #[error("worker_multiplier must be at least 1")]
    ZeroMultiplier,
    #[error("watcher_tick must be greater than zero")]
    ZeroTick,
    #[error("result_batch_size must be at least 1")]
    ZeroBatch,
}

impl Config {
    /// Checks the invariants the polling subsystem relies on: a positive
    /// ticker period, at least one worker, at least one request slot, and a
    /// non-empty flush threshold.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.initial_max_requests == 0 {
            return Err(ConfigValidationError::ZeroCapacity);
        }
        if self.worker_multiplier == 0 {
            return Err(ConfigValidationError::ZeroMultiplier);
        }
        if self.watcher_tick.is_zero() {
            return Err(ConfigValidationError::ZeroTick);
        }
        if self.result_batch_size == 0 {
            return Err(ConfigValidationError::ZeroBatch);
        }
        Ok(())
    }

    /// Number of pool workers, `cpu_count x worker_multiplier`.
    ///
    /// Also used as the bounded capacity of the internal streams.
    pub fn worker_count(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus * self.worker_multiplier
    }
}

impl From<Opt> for Config {
    fn from(opt: Opt) -> Self {
        Config {
            accrual_base_url: opt.accrual_address,
            database_path: opt.db_path,
            initial_max_requests: opt.initial_max_requests,
            worker_multiplier: opt.worker_multiplier,
            acquire_timeout: Duration::from_millis(opt.acquire_timeout_ms),
            call_timeout: Duration::from_millis(opt.call_timeout_ms),
            watcher_tick: Duration::from_secs(opt.watcher_tick_secs),
            result_batch_size: opt.result_batch_size,
            processing_stale_after: Duration::from_secs(opt.stale_after_secs),
            log_level: opt.log_level,
            log_format: opt.log_format,
        }
    }
}
