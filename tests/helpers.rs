// Shared test helpers: scripted calculator mock, temp databases, seeding,
// and polling asserts used across the integration test files.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::NamedTempFile;

use accrual_agent::model::{AccrualInfo, CalculatorStatus, Order, OrderId, OrderStatus};
use accrual_agent::{init_db_pool_with_path, run_migrations, AccrualClient, ClientError};

/// Creates a temporary database file.
///
/// File-backed rather than `sqlite::memory:` because the pool opens several
/// connections and each in-memory connection would see its own database.
#[allow(dead_code)] // Used by other test files
pub fn create_temp_db() -> NamedTempFile {
    NamedTempFile::new().expect("Failed to create temp database file")
}

/// Connects a pool to `file` and applies migrations.
#[allow(dead_code)] // Used by other test files
pub async fn migrated_pool(file: &NamedTempFile) -> SqlitePool {
    let pool = init_db_pool_with_path(file.path())
        .await
        .expect("Failed to initialize test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

/// A NEW order for `user` with the current upload time.
#[allow(dead_code)] // Used by other test files
pub fn new_order(id: &str, user: &str) -> Order {
    Order {
        id: OrderId::new(id).expect("test order id"),
        user_id: user.to_string(),
        status: OrderStatus::New,
        accrual: None,
        uploaded_at: chrono::Utc::now().timestamp_millis(),
    }
}

/// Reads the stored status of one order.
#[allow(dead_code)] // Used by other test files
pub async fn stored_status(pool: &SqlitePool, id: &str) -> Option<String> {
    sqlx::query_scalar("SELECT status FROM orders WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .expect("status query")
}

/// Polls until the order reaches `want` or the deadline passes.
#[allow(dead_code)] // Used by other test files
pub async fn wait_for_status(pool: &SqlitePool, id: &str, want: &str, deadline: Duration) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if stored_status(pool, id).await.as_deref() == Some(want) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Mock calculator driven by the order id:
/// - ids starting with "2" succeed with `accrual = id`
/// - ids starting with "5" always fail with a transport error
/// - "429" answers one rate limit (then behaves like a "2xx" id)
/// - ids starting with "428" succeed after a deliberately slow call
#[allow(dead_code)] // Constructors vary per test file
pub struct ScriptedCalculator {
    pub calls: AtomicUsize,
    rate_limit_armed: AtomicBool,
    retry_after: Duration,
    slow_call: Duration,
}

#[allow(dead_code)]
impl ScriptedCalculator {
    pub fn new() -> Self {
        Self::with_timings(Duration::from_millis(300), Duration::from_millis(250))
    }

    pub fn with_timings(retry_after: Duration, slow_call: Duration) -> Self {
        ScriptedCalculator {
            calls: AtomicUsize::new(0),
            rate_limit_armed: AtomicBool::new(true),
            retry_after,
            slow_call,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn processed(order_id: &OrderId) -> AccrualInfo {
        let accrual = order_id.as_str().parse().ok();
        AccrualInfo {
            order_id: order_id.clone(),
            status: CalculatorStatus::Processed,
            accrual,
        }
    }
}

#[async_trait]
impl AccrualClient for ScriptedCalculator {
    async fn get_order_info(&self, order_id: &OrderId) -> Result<AccrualInfo, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match order_id.as_str() {
            "429" => {
                if self
                    .rate_limit_armed
                    .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    Err(ClientError::TooManyRequests {
                        retry_after: self.retry_after,
                        allowed_rpm: 1,
                    })
                } else {
                    // The calculator lifted its limit; the retried order
                    // now resolves normally.
                    Ok(Self::processed(order_id))
                }
            }
            id if id.starts_with("428") => {
                tokio::time::sleep(self.slow_call).await;
                Ok(Self::processed(order_id))
            }
            id if id.starts_with('2') => Ok(Self::processed(order_id)),
            id if id.starts_with('5') => {
                Err(ClientError::Transport("calculator error".to_string()))
            }
            _ => Ok(AccrualInfo::synthetic(
                order_id.clone(),
                CalculatorStatus::Registered,
            )),
        }
    }
}
