//! Order store: the capability trait the polling core runs against, plus the
//! SQLite implementation.
//!
//! Every SQLite operation is wrapped in a bounded backoff (1 s/3 s/5 s) that
//! retries transient connection errors only; domain errors and SQL failures
//! surface immediately.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio_retry::RetryIf;

use crate::config::STORE_RETRY_DELAYS_SECS;
use crate::error_handling::StoreError;
use crate::model::{AccrualInfo, Amount, Order, OrderId, OrderStatus};

/// A user's bonus balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    /// Points currently available.
    pub current: Amount,
    /// Lifetime sum of withdrawals.
    pub withdrawn: Amount,
}

/// One recorded withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub order_id: OrderId,
    pub user_id: String,
    pub amount: Amount,
    /// Epoch milliseconds UTC.
    pub processed_at: i64,
}

/// Capability interface over durable order state.
///
/// Implementations must be safe for concurrent use: the watcher's dispatch
/// and result loops and the auxiliary read paths all share one instance.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Orders eligible for dispatch: `NEW`, or `PROCESSING` that has gone
    /// stale (stuck in flight longer than the staleness threshold).
    async fn select_pollable(&self) -> Result<Vec<OrderId>, StoreError>;

    /// Overwrites the stored status of one order.
    async fn set_status(&self, id: &OrderId, status: OrderStatus) -> Result<(), StoreError>;

    /// Persists a batch of calculator verdicts atomically, translating each
    /// calculator status to its stored counterpart and keeping any
    /// previously recorded accrual when the verdict carries none.
    async fn apply_accrual_results(&self, batch: &[AccrualInfo]) -> Result<(), StoreError>;

    /// Records a new accrual order. Re-submitting an existing id is a no-op.
    async fn create_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Records a withdrawal, failing with
    /// [`StoreError::InsufficientFunds`] when the balance cannot cover it.
    async fn create_withdrawal(
        &self,
        user_id: &str,
        order_id: &OrderId,
        amount: Amount,
    ) -> Result<(), StoreError>;

    /// Current and withdrawn totals for one user.
    async fn get_balance(&self, user_id: &str) -> Result<Balance, StoreError>;

    /// All accrual orders of one user, oldest first.
    async fn list_accruals(&self, user_id: &str) -> Result<Vec<Order>, StoreError>;

    /// All withdrawals of one user, oldest first.
    async fn list_withdrawals(&self, user_id: &str) -> Result<Vec<Withdrawal>, StoreError>;
}

/// SQLite-backed [`OrderStore`].
pub struct SqliteOrderStore {
    pool: SqlitePool,
    stale_after: Duration,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn retry_delays() -> impl Iterator<Item = Duration> {
    STORE_RETRY_DELAYS_SECS
        .iter()
        .copied()
        .map(Duration::from_secs)
}

fn is_transient(err: &StoreError) -> bool {
    err.is_transient()
}

impl SqliteOrderStore {
    /// Wraps a connected pool. `stale_after` is the age at which a
    /// `PROCESSING` order becomes pollable again.
    pub fn new(pool: SqlitePool, stale_after: Duration) -> Self {
        SqliteOrderStore { pool, stale_after }
    }

    async fn select_pollable_once(&self) -> Result<Vec<OrderId>, StoreError> {
        let cutoff = now_millis() - self.stale_after.as_millis() as i64;
        let rows = sqlx::query(
            "SELECT id FROM orders
             WHERE status = 'NEW' OR (status = 'PROCESSING' AND updated_at < ?)
             ORDER BY uploaded_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("id").map_err(StoreError::from_sqlx)?;
            let id = OrderId::new(raw).map_err(|_| {
                StoreError::Sql(sqlx::Error::Decode("empty order id in orders table".into()))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn set_status_once(&self, id: &OrderId, status: OrderStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_millis())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn apply_accrual_results_once(&self, batch: &[AccrualInfo]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        let now = now_millis();
        for info in batch {
            let status = info.status.storage_status();
            let accrual = info.accrual.map(|a| a.total_kopecks());
            let result = sqlx::query(
                "UPDATE orders
                 SET status = ?, accrual_kopecks = COALESCE(?, accrual_kopecks), updated_at = ?
                 WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(accrual)
            .bind(now)
            .bind(info.order_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
            if result.rows_affected() == 0 {
                log::warn!("accrual result for unknown order {}", info.order_id);
            }
        }
        tx.commit().await.map_err(StoreError::from_sqlx)
    }

    async fn create_order_once(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, user_id, status, accrual_kopecks, uploaded_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(order.id.as_str())
        .bind(&order.user_id)
        .bind(order.status.as_str())
        .bind(order.accrual.map(|a| a.total_kopecks()))
        .bind(order.uploaded_at)
        .bind(order.uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn create_withdrawal_once(
        &self,
        user_id: &str,
        order_id: &OrderId,
        amount: Amount,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        let (accrued, withdrawn) = balance_kopecks(&mut tx, user_id).await?;
        if accrued - withdrawn < amount.total_kopecks() {
            return Err(StoreError::InsufficientFunds);
        }
        sqlx::query(
            "INSERT INTO withdrawals (order_id, user_id, amount_kopecks, processed_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(order_id.as_str())
        .bind(user_id)
        .bind(amount.total_kopecks())
        .bind(now_millis())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        tx.commit().await.map_err(StoreError::from_sqlx)
    }

    async fn get_balance_once(&self, user_id: &str) -> Result<Balance, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        let (accrued, withdrawn) = balance_kopecks(&mut tx, user_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(Balance {
            current: Amount::from_kopecks(accrued - withdrawn),
            withdrawn: Amount::from_kopecks(withdrawn),
        })
    }

    async fn list_accruals_once(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, status, accrual_kopecks, uploaded_at
             FROM orders WHERE user_id = ? ORDER BY uploaded_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.iter().map(order_from_row).collect()
    }

    async fn list_withdrawals_once(&self, user_id: &str) -> Result<Vec<Withdrawal>, StoreError> {
        let rows = sqlx::query(
            "SELECT order_id, user_id, amount_kopecks, processed_at
             FROM withdrawals WHERE user_id = ? ORDER BY processed_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        let mut withdrawals = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_id: String = row.try_get("order_id").map_err(StoreError::from_sqlx)?;
            withdrawals.push(Withdrawal {
                order_id: OrderId::new(raw_id).map_err(|_| {
                    StoreError::Sql(sqlx::Error::Decode("empty withdrawal order id".into()))
                })?,
                user_id: row.try_get("user_id").map_err(StoreError::from_sqlx)?,
                amount: Amount::from_kopecks(
                    row.try_get("amount_kopecks").map_err(StoreError::from_sqlx)?,
                ),
                processed_at: row.try_get("processed_at").map_err(StoreError::from_sqlx)?,
            });
        }
        Ok(withdrawals)
    }
}

/// Accrued and withdrawn kopeck totals, read inside the caller's transaction
/// so the withdrawal check and insert see one consistent snapshot.
async fn balance_kopecks(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
) -> Result<(i64, i64), StoreError> {
    let accrued: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(accrual_kopecks), 0) FROM orders
         WHERE user_id = ? AND status = 'PROCESSED'",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)?;

    let withdrawn: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(amount_kopecks), 0) FROM withdrawals WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(StoreError::from_sqlx)?;

    Ok((accrued, withdrawn))
}

fn order_from_row(row: &SqliteRow) -> Result<Order, StoreError> {
    let raw_id: String = row.try_get("id").map_err(StoreError::from_sqlx)?;
    let raw_status: String = row.try_get("status").map_err(StoreError::from_sqlx)?;
    let status = OrderStatus::parse(&raw_status).ok_or_else(|| {
        StoreError::Sql(sqlx::Error::Decode(
            format!("unknown order status {raw_status:?}").into(),
        ))
    })?;
    let accrual: Option<i64> = row
        .try_get("accrual_kopecks")
        .map_err(StoreError::from_sqlx)?;
    Ok(Order {
        id: OrderId::new(raw_id)
            .map_err(|_| StoreError::Sql(sqlx::Error::Decode("empty order id".into())))?,
        user_id: row.try_get("user_id").map_err(StoreError::from_sqlx)?,
        status,
        accrual: accrual.map(Amount::from_kopecks),
        uploaded_at: row.try_get("uploaded_at").map_err(StoreError::from_sqlx)?,
    })
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn select_pollable(&self) -> Result<Vec<OrderId>, StoreError> {
        RetryIf::spawn(retry_delays(), || self.select_pollable_once(), is_transient).await
    }

    async fn set_status(&self, id: &OrderId, status: OrderStatus) -> Result<(), StoreError> {
        RetryIf::spawn(
            retry_delays(),
            || self.set_status_once(id, status),
            is_transient,
        )
        .await
    }

    async fn apply_accrual_results(&self, batch: &[AccrualInfo]) -> Result<(), StoreError> {
        RetryIf::spawn(
            retry_delays(),
            || self.apply_accrual_results_once(batch),
            is_transient,
        )
        .await
    }

    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        RetryIf::spawn(retry_delays(), || self.create_order_once(order), is_transient).await
    }

    async fn create_withdrawal(
        &self,
        user_id: &str,
        order_id: &OrderId,
        amount: Amount,
    ) -> Result<(), StoreError> {
        RetryIf::spawn(
            retry_delays(),
            || self.create_withdrawal_once(user_id, order_id, amount),
            is_transient,
        )
        .await
    }

    async fn get_balance(&self, user_id: &str) -> Result<Balance, StoreError> {
        RetryIf::spawn(retry_delays(), || self.get_balance_once(user_id), is_transient).await
    }

    async fn list_accruals(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        RetryIf::spawn(retry_delays(), || self.list_accruals_once(user_id), is_transient).await
    }

    async fn list_withdrawals(&self, user_id: &str) -> Result<Vec<Withdrawal>, StoreError> {
        RetryIf::spawn(
            retry_delays(),
            || self.list_withdrawals_once(user_id),
            is_transient,
        )
        .await
    }
}
