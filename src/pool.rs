//! Worker pool: bounded-concurrency calculator polling.
//!
//! Each worker pulls an order id off the shared job stream, takes a slot
//! from the resizable semaphore, calls the calculator, and publishes the
//! verdict. Rate-limit answers tear the pool down: the first worker to see
//! one wins a compare-and-swap, cancels the pool's token, and forwards the
//! signal to the supervisor; the rest observe the cancelled token and exit
//! quietly.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::AccrualClient;
use crate::error_handling::ClientError;
use crate::model::{AccrualInfo, CalculatorStatus, OrderId, RateLimitSignal};
use crate::semaphore::ResizableSemaphore;

/// The job stream receiver, shared by all workers of a run cycle. The lock
/// is held only across a single `recv`.
pub type SharedJobs = Arc<Mutex<mpsc::Receiver<OrderId>>>;

/// Spawns and restarts the worker set. One pool instance lives for the whole
/// service; `start` is called again with a fresh token after every pause
/// cycle.
pub struct WorkerPool {
    client: Arc<dyn AccrualClient>,
    semaphore: Arc<ResizableSemaphore>,
    jobs: SharedJobs,
    rate_events: mpsc::Sender<RateLimitSignal>,
    request_ticks: mpsc::Sender<()>,
    results: mpsc::Sender<AccrualInfo>,
    acquire_timeout: Duration,
}

/// Handle over one run cycle's workers.
pub struct PoolHandle {
    cancel: CancellationToken,
    workers: FuturesUnordered<JoinHandle<()>>,
}

impl PoolHandle {
    /// Number of workers this cycle started with.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to finish on its own (job stream closed or
    /// token cancelled elsewhere).
    pub async fn join(mut self) {
        while let Some(joined) = self.workers.next().await {
            if let Err(e) = joined {
                warn!("Worker task failed to join: {e}");
            }
        }
    }

    /// Cancels the pool token and waits for in-flight workers to finish
    /// their current iteration.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.join().await;
    }
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn AccrualClient>,
        semaphore: Arc<ResizableSemaphore>,
        jobs: SharedJobs,
        rate_events: mpsc::Sender<RateLimitSignal>,
        request_ticks: mpsc::Sender<()>,
        results: mpsc::Sender<AccrualInfo>,
        acquire_timeout: Duration,
    ) -> Self {
        WorkerPool {
            client,
            semaphore,
            jobs,
            rate_events,
            request_ticks,
            results,
            acquire_timeout,
        }
    }

    /// Starts `worker_count` workers on a child of `parent` and returns the
    /// handle used to drain them. Workers never outlive the returned
    /// handle's token.
    pub fn start(&self, parent: &CancellationToken, worker_count: usize) -> PoolHandle {
        let cancel = parent.child_token();
        // First-wins latch for rate-limit forwarding, fresh per cycle.
        let limit_reported = Arc::new(AtomicBool::new(false));

        let workers = FuturesUnordered::new();
        for id in 0..worker_count {
            let worker = Worker {
                id,
                client: Arc::clone(&self.client),
                semaphore: Arc::clone(&self.semaphore),
                jobs: Arc::clone(&self.jobs),
                rate_events: self.rate_events.clone(),
                request_ticks: self.request_ticks.clone(),
                results: self.results.clone(),
                acquire_timeout: self.acquire_timeout,
                cancel: cancel.clone(),
                limit_reported: Arc::clone(&limit_reported),
            };
            workers.push(tokio::spawn(worker.run()));
        }
        info!("All workers started (count: {worker_count})");

        PoolHandle { cancel, workers }
    }
}

struct Worker {
    id: usize,
    client: Arc<dyn AccrualClient>,
    semaphore: Arc<ResizableSemaphore>,
    jobs: SharedJobs,
    rate_events: mpsc::Sender<RateLimitSignal>,
    request_ticks: mpsc::Sender<()>,
    results: mpsc::Sender<AccrualInfo>,
    acquire_timeout: Duration,
    cancel: CancellationToken,
    limit_reported: Arc<AtomicBool>,
}

impl Worker {
    async fn run(self) {
        loop {
            let order_id = tokio::select! {
                _ = self.cancel.cancelled() => break,
                job = next_job(&self.jobs) => match job {
                    Some(id) => id,
                    // Job stream closed: shutdown.
                    None => break,
                },
            };
            if let ControlFlow::Break(()) = self.process(order_id).await {
                break;
            }
        }
        debug!("Worker {} stopped", self.id);
    }

    async fn process(&self, order_id: OrderId) -> ControlFlow<()> {
        if let Err(e) = self.semaphore.acquire_timeout(self.acquire_timeout).await {
            warn!("Worker {}: no request slot for order {order_id}: {e}", self.id);
            return self
                .publish(AccrualInfo::synthetic(
                    order_id,
                    CalculatorStatus::AgentFailed,
                ))
                .await;
        }

        // Count the attempt; a full tick buffer drops it, which only makes
        // the observed RPM (and thus the retuned capacity) more conservative.
        let _ = self.request_ticks.try_send(());

        let outcome = self.client.get_order_info(&order_id).await;
        self.semaphore.release();

        match outcome {
            Ok(info) => self.publish(info).await,
            Err(ClientError::NoContent) => {
                self.publish(AccrualInfo::synthetic(order_id, CalculatorStatus::NoContent))
                    .await
            }
            Err(ClientError::TooManyRequests {
                retry_after,
                allowed_rpm,
            }) => {
                let published = self
                    .publish(AccrualInfo::synthetic(
                        order_id,
                        CalculatorStatus::CalculatorFailed,
                    ))
                    .await;
                if published.is_break() || self.cancel.is_cancelled() {
                    return ControlFlow::Break(());
                }
                if self
                    .limit_reported
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    // Stop the rest of the pool before the supervisor even
                    // sees the signal, so no new request starts inside the
                    // calculator's quiet window.
                    self.cancel.cancel();
                    let signal = RateLimitSignal {
                        retry_after,
                        allowed_rpm,
                    };
                    if self.rate_events.send(signal).await.is_err() {
                        warn!("Rate event receiver dropped before the signal was delivered");
                    }
                }
                ControlFlow::Break(())
            }
            Err(err) => {
                if self.cancel.is_cancelled() {
                    return ControlFlow::Break(());
                }
                error!("Failed to get order info for {order_id}: {err}");
                self.publish(AccrualInfo::synthetic(
                    order_id,
                    CalculatorStatus::CalculatorFailed,
                ))
                .await
            }
        }
    }

    /// Publishes a result, honoring cancellation.
    async fn publish(&self, info: AccrualInfo) -> ControlFlow<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => ControlFlow::Break(()),
            sent = self.results.send(info) => {
                if sent.is_err() {
                    // Result stream closed: shutdown.
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        }
    }
}

async fn next_job(jobs: &SharedJobs) -> Option<OrderId> {
    let mut receiver = jobs.lock().await;
    receiver.recv().await
}
