//! Database connection pool management.
//!
//! The pool is built from declarative connect options: the database file is
//! created on first connect, every connection opens in WAL journal mode, and
//! a busy timeout absorbs writer contention between the watcher's batched
//! flushes and the auxiliary balance reads.

use std::path::Path;
use std::time::Duration;

use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error_handling::DatabaseError;

const MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (and creates, if missing) the SQLite database at `db_path` and
/// returns a connection pool over it.
pub async fn init_db_pool_with_path(db_path: &Path) -> Result<SqlitePool, DatabaseError> {
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(connect_options)
        .await?;

    info!("Connected to database at {}", db_path.display());
    Ok(pool)
}
