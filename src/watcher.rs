//! Watcher: periodic producer of work and consumer of results.
//!
//! The ticker loop asks storage for pollable orders, pushes them onto the
//! job stream, and marks them `PROCESSING`; the result loop buffers
//! calculator verdicts and persists them in batches. Both run inside one
//! task; each tick's storage pass is spawned separately so a slow query
//! never stalls result persistence.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error_handling::PollStats;
use crate::model::{AccrualInfo, OrderId, OrderStatus};
use crate::storage::OrderStore;

pub struct Watcher {
    store: Arc<dyn OrderStore>,
    jobs: mpsc::Sender<OrderId>,
    results: mpsc::Receiver<AccrualInfo>,
    tick: Duration,
    batch_size: usize,
    stats: Arc<PollStats>,
}

impl Watcher {
    pub fn new(
        store: Arc<dyn OrderStore>,
        jobs: mpsc::Sender<OrderId>,
        results: mpsc::Receiver<AccrualInfo>,
        tick: Duration,
        batch_size: usize,
        stats: Arc<PollStats>,
    ) -> Self {
        assert!(!tick.is_zero(), "watcher tick must be greater than zero");
        assert!(batch_size > 0, "result batch size must be at least 1");
        Watcher {
            store,
            jobs,
            results,
            tick,
            batch_size,
            stats,
        }
    }

    /// Runs until `cancel` fires or the result stream closes. Buffered
    /// results are flushed on the way out either way.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Watcher running");

        let mut buffer: Vec<AccrualInfo> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut dispatches: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let store = Arc::clone(&self.store);
                    let jobs = self.jobs.clone();
                    let token = cancel.clone();
                    dispatches.spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = dispatch_pollable(store, jobs) => {}
                        }
                    });
                    // Reap whatever already finished so the set stays small.
                    while dispatches.try_join_next().is_some() {}
                }
                maybe_result = self.results.recv() => match maybe_result {
                    Some(info) => {
                        self.stats.record_status(info.status);
                        buffer.push(info);
                        if buffer.len() >= self.batch_size {
                            flush(self.store.as_ref(), &mut buffer).await;
                        }
                    }
                    // Result stream closed: shutdown.
                    None => break,
                }
            }
        }

        flush(self.store.as_ref(), &mut buffer).await;
        while dispatches.join_next().await.is_some() {}
        info!("Watcher stopped");
    }
}

/// One tick's storage pass: select pollable orders, enqueue each, mark it
/// `PROCESSING`. A failed status update is logged and left for the next
/// tick to retry.
async fn dispatch_pollable(store: Arc<dyn OrderStore>, jobs: mpsc::Sender<OrderId>) {
    let ids = match store.select_pollable().await {
        Ok(ids) => ids,
        Err(e) => {
            error!("Failed to select orders for accrual: {e}");
            return;
        }
    };
    if !ids.is_empty() {
        debug!("Dispatching {} pollable orders", ids.len());
    }
    for id in ids {
        if jobs.send(id.clone()).await.is_err() {
            // Job stream closed: shutdown.
            return;
        }
        if let Err(e) = store.set_status(&id, OrderStatus::Processing).await {
            error!("Failed to mark order {id} as PROCESSING: {e}");
        }
    }
}

async fn flush(store: &dyn OrderStore, buffer: &mut Vec<AccrualInfo>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(e) = store.apply_accrual_results(buffer).await {
        error!("Failed to persist {} accrual results: {e}", buffer.len());
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error_handling::StoreError;
    use crate::model::{Amount, CalculatorStatus, Order};
    use crate::storage::{Balance, Withdrawal};

    /// Minimal in-memory store: enough state to observe dispatches and
    /// flushed batches.
    struct MemoryStore {
        orders: Mutex<HashMap<String, OrderStatus>>,
        batches: Mutex<Vec<Vec<AccrualInfo>>>,
    }

    impl MemoryStore {
        fn with_new_orders(ids: &[&str]) -> Self {
            let orders = ids
                .iter()
                .map(|id| (id.to_string(), OrderStatus::New))
                .collect();
            MemoryStore {
                orders: Mutex::new(orders),
                batches: Mutex::new(Vec::new()),
            }
        }

        fn status_of(&self, id: &str) -> Option<OrderStatus> {
            self.orders.lock().unwrap().get(id).copied()
        }

        fn flushed(&self) -> Vec<Vec<AccrualInfo>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OrderStore for MemoryStore {
        async fn select_pollable(&self) -> Result<Vec<OrderId>, StoreError> {
            let orders = self.orders.lock().unwrap();
            let mut ids: Vec<_> = orders
                .iter()
                .filter(|(_, status)| **status == OrderStatus::New)
                .map(|(id, _)| OrderId::new(id.clone()).unwrap())
                .collect();
            ids.sort();
            Ok(ids)
        }

        async fn set_status(&self, id: &OrderId, status: OrderStatus) -> Result<(), StoreError> {
            self.orders
                .lock()
                .unwrap()
                .insert(id.as_str().to_string(), status);
            Ok(())
        }

        async fn apply_accrual_results(&self, batch: &[AccrualInfo]) -> Result<(), StoreError> {
            let mut orders = self.orders.lock().unwrap();
            for info in batch {
                orders.insert(
                    info.order_id.as_str().to_string(),
                    info.status.storage_status(),
                );
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }

        async fn create_order(&self, _order: &Order) -> Result<(), StoreError> {
            Ok(())
        }

        async fn create_withdrawal(
            &self,
            _user_id: &str,
            _order_id: &OrderId,
            _amount: Amount,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get_balance(&self, _user_id: &str) -> Result<Balance, StoreError> {
            Ok(Balance {
                current: Amount::default(),
                withdrawn: Amount::default(),
            })
        }

        async fn list_accruals(&self, _user_id: &str) -> Result<Vec<Order>, StoreError> {
            Ok(Vec::new())
        }

        async fn list_withdrawals(&self, _user_id: &str) -> Result<Vec<Withdrawal>, StoreError> {
            Ok(Vec::new())
        }
    }

    const TICK: Duration = Duration::from_millis(10);
    const WAIT: Duration = Duration::from_secs(2);

    fn verdict(id: &str, status: CalculatorStatus) -> AccrualInfo {
        AccrualInfo::synthetic(OrderId::new(id).unwrap(), status)
    }

    #[tokio::test]
    async fn test_tick_dispatches_and_marks_processing() {
        let store = Arc::new(MemoryStore::with_new_orders(&["1", "2"]));
        let (jobs_tx, mut jobs_rx) = mpsc::channel(8);
        let (_results_tx, results_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let watcher = Watcher::new(
            Arc::clone(&store) as Arc<dyn OrderStore>,
            jobs_tx,
            results_rx,
            TICK,
            4,
            Arc::new(PollStats::new()),
        );
        let handle = tokio::spawn(watcher.run(cancel.clone()));

        // A tick may re-dispatch an order it has not yet marked, so collect
        // until both ids have shown up at least once.
        let mut seen = std::collections::HashSet::new();
        while seen.len() < 2 {
            let job = tokio::time::timeout(WAIT, jobs_rx.recv())
                .await
                .expect("dispatch within the wait budget")
                .expect("job stream open");
            seen.insert(job.as_str().to_string());
        }
        assert!(seen.contains("1") && seen.contains("2"));

        // The dispatched orders must leave the pollable set.
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(store.status_of("1"), Some(OrderStatus::Processing));
        assert_eq!(store.status_of("2"), Some(OrderStatus::Processing));

        cancel.cancel();
        tokio::time::timeout(WAIT, handle)
            .await
            .expect("watcher join")
            .unwrap();
    }

    #[tokio::test]
    async fn test_results_flush_on_batch_size() {
        let store = Arc::new(MemoryStore::with_new_orders(&[]));
        let (jobs_tx, _jobs_rx) = mpsc::channel(8);
        let (results_tx, results_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let watcher = Watcher::new(
            Arc::clone(&store) as Arc<dyn OrderStore>,
            jobs_tx,
            results_rx,
            Duration::from_secs(60),
            2,
            Arc::new(PollStats::new()),
        );
        let handle = tokio::spawn(watcher.run(cancel.clone()));

        results_tx
            .send(verdict("1", CalculatorStatus::Processed))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            store.flushed().is_empty(),
            "one result must stay buffered below the threshold"
        );

        results_tx
            .send(verdict("2", CalculatorStatus::Invalid))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let flushed = store.flushed();
        assert_eq!(flushed.len(), 1, "hitting the threshold must flush");
        assert_eq!(flushed[0].len(), 2);
        assert_eq!(store.status_of("1"), Some(OrderStatus::Processed));
        assert_eq!(store.status_of("2"), Some(OrderStatus::Invalid));

        cancel.cancel();
        tokio::time::timeout(WAIT, handle)
            .await
            .expect("watcher join")
            .unwrap();
    }

    #[tokio::test]
    async fn test_partial_buffer_flushes_when_results_close() {
        let store = Arc::new(MemoryStore::with_new_orders(&[]));
        let (jobs_tx, _jobs_rx) = mpsc::channel(8);
        let (results_tx, results_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let watcher = Watcher::new(
            Arc::clone(&store) as Arc<dyn OrderStore>,
            jobs_tx,
            results_rx,
            Duration::from_secs(60),
            100,
            Arc::new(PollStats::new()),
        );
        let handle = tokio::spawn(watcher.run(cancel));

        results_tx
            .send(verdict("7", CalculatorStatus::Processed))
            .await
            .unwrap();
        drop(results_tx);

        tokio::time::timeout(WAIT, handle)
            .await
            .expect("watcher must exit when results close")
            .unwrap();
        let flushed = store.flushed();
        assert_eq!(flushed.len(), 1, "exit must flush the partial buffer");
        assert_eq!(flushed[0][0].order_id.as_str(), "7");
    }

    #[tokio::test]
    async fn test_cancel_flushes_partial_buffer() {
        let store = Arc::new(MemoryStore::with_new_orders(&[]));
        let (jobs_tx, _jobs_rx) = mpsc::channel(8);
        let (results_tx, results_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let watcher = Watcher::new(
            Arc::clone(&store) as Arc<dyn OrderStore>,
            jobs_tx,
            results_rx,
            Duration::from_secs(60),
            100,
            Arc::new(PollStats::new()),
        );
        let handle = tokio::spawn(watcher.run(cancel.clone()));

        results_tx
            .send(verdict("9", CalculatorStatus::NoContent))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        tokio::time::timeout(WAIT, handle)
            .await
            .expect("watcher join")
            .unwrap();
        let flushed = store.flushed();
        assert_eq!(flushed.len(), 1);
        assert_eq!(
            store.status_of("9"),
            Some(OrderStatus::Processed),
            "NO_CONTENT persists as terminal PROCESSED"
        );
    }

    #[test]
    #[should_panic(expected = "watcher tick must be greater than zero")]
    fn test_zero_tick_panics() {
        let (jobs_tx, _jobs_rx) = mpsc::channel(1);
        let (_results_tx, results_rx) = mpsc::channel(1);
        let store = Arc::new(MemoryStore::with_new_orders(&[]));
        let _ = Watcher::new(
            store as Arc<dyn OrderStore>,
            jobs_tx,
            results_rx,
            Duration::ZERO,
            1,
            Arc::new(PollStats::new()),
        );
    }
}
