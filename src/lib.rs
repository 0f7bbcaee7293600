//! accrual-agent library: rate-limited accrual polling for a loyalty-points
//! backend.
//!
//! The core is a supervised pipeline that discovers orders needing
//! calculation, fans bounded-concurrency requests out to an external accrual
//! calculator, reacts to the calculator's 429/Retry-After back-pressure by
//! pausing and retuning its concurrency from the observed request rate, and
//! persists the verdicts back to storage.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use accrual_agent::{
//!     init_db_pool_with_path, run_migrations, Config, HttpAccrualClient, SqliteOrderStore,
//!     Supervisor,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let pool = init_db_pool_with_path(&config.database_path).await?;
//! run_migrations(&pool).await?;
//!
//! let store = Arc::new(SqliteOrderStore::new(pool, config.processing_stale_after));
//! let client = Arc::new(HttpAccrualClient::new(
//!     config.accrual_base_url.clone(),
//!     config.call_timeout,
//! )?);
//!
//! let shutdown = CancellationToken::new();
//! Supervisor::new(client, store, config).run(shutdown).await?;
//! # Ok(())
//! # }
//! ```
//!
//! This library requires a Tokio runtime.

pub mod client;
pub mod config;
pub mod error_handling;
pub mod initialization;
pub mod model;
pub mod pool;
pub mod rpm;
pub mod semaphore;
pub mod storage;
pub mod supervisor;
pub mod watcher;

// Re-export public API
pub use client::{AccrualClient, HttpAccrualClient};
pub use config::{Config, LogFormat, LogLevel, Opt};
pub use error_handling::{ClientError, Outcome, PollStats, StoreError};
pub use model::{AccrualInfo, Amount, CalculatorStatus, Order, OrderId, OrderStatus, RateLimitSignal};
pub use semaphore::{AcquireError, ResizableSemaphore};
pub use storage::{init_db_pool_with_path, run_migrations, OrderStore, SqliteOrderStore};
pub use supervisor::Supervisor;
