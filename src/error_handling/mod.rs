//! Error types and outcome statistics.
//!
//! This module provides:
//! - Typed errors for the calculator client, the order store, and startup
//! - Thread-safe outcome counters summarized at shutdown

mod stats;
mod types;

pub use stats::{Outcome, PollStats};
pub use types::{ClientError, DatabaseError, InitializationError, StoreError};
