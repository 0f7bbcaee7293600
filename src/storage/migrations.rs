//! Database schema migrations.
//!
//! Statements are idempotent (`IF NOT EXISTS`) so startup can run them
//! unconditionally against new and existing databases alike.

use sqlx::SqlitePool;

use crate::error_handling::DatabaseError;

/// Creates the orders and withdrawals tables and their indexes.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DatabaseError> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL,
            accrual_kopecks INTEGER,
            uploaded_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status, updated_at)",
        "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders (user_id, uploaded_at)",
        "CREATE TABLE IF NOT EXISTS withdrawals (
            order_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            amount_kopecks INTEGER NOT NULL,
            processed_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_withdrawals_user ON withdrawals (user_id, processed_at)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
