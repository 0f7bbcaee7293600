//! Order storage.
//!
//! This module provides:
//! - The [`OrderStore`] capability trait the polling core runs against
//! - A SQLite implementation with WAL mode and bounded retry on transient
//!   connection errors
//! - Idempotent schema migrations
//!
//! All timestamps are stored as epoch milliseconds UTC.

pub mod migrations;
pub mod orders;
pub mod pool;

pub use migrations::run_migrations;
pub use orders::{Balance, OrderStore, SqliteOrderStore, Withdrawal};
pub use pool::init_db_pool_with_path;
