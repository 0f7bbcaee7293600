//! Supervisor: lifecycle and rate-limit state machine for the polling
//! subsystem.
//!
//! Owns the four internal streams and drives Running → Paused → Running
//! cycles: on a rate-limit signal the pool is drained, the observed RPM is
//! snapshotted, and after the calculator's Retry-After window the semaphore
//! is retuned to `clamp(allowed / observed, 1, initial capacity)` and the pool restarts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::client::AccrualClient;
use crate::config::Config;
use crate::error_handling::{Outcome, PollStats};
use crate::model::RateLimitSignal;
use crate::pool::{SharedJobs, WorkerPool};
use crate::rpm::RpmObserver;
use crate::semaphore::ResizableSemaphore;
use crate::storage::OrderStore;
use crate::watcher::Watcher;

pub struct Supervisor {
    client: Arc<dyn AccrualClient>,
    store: Arc<dyn OrderStore>,
    config: Config,
    stats: Arc<PollStats>,
}

impl Supervisor {
    pub fn new(client: Arc<dyn AccrualClient>, store: Arc<dyn OrderStore>, config: Config) -> Self {
        Supervisor {
            client,
            store,
            config,
            stats: Arc::new(PollStats::new()),
        }
    }

    /// Shared outcome counters, for a summary after [`run`](Self::run)
    /// returns.
    pub fn stats(&self) -> Arc<PollStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the polling subsystem until `shutdown` fires.
    ///
    /// On return every worker, the watcher, and the RPM observer have been
    /// joined and all internal streams are closed.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        self.config
            .validate()
            .context("invalid polling configuration")?;

        let worker_count = self.config.worker_count();
        let stream_capacity = worker_count;

        let (jobs_tx, jobs_rx) = mpsc::channel(stream_capacity);
        let (results_tx, results_rx) = mpsc::channel(stream_capacity);
        let (ticks_tx, ticks_rx) = mpsc::channel(stream_capacity);
        let (rate_tx, mut rate_rx) = mpsc::channel::<RateLimitSignal>(stream_capacity);

        let initial_capacity = self.config.initial_max_requests;
        let semaphore = Arc::new(ResizableSemaphore::new(initial_capacity));

        let mut observer = RpmObserver::new(ticks_rx);
        observer.start();

        let watcher = Watcher::new(
            Arc::clone(&self.store),
            jobs_tx,
            results_rx,
            self.config.watcher_tick,
            self.config.result_batch_size,
            Arc::clone(&self.stats),
        );
        let watcher_handle = tokio::spawn(watcher.run(shutdown.child_token()));

        let jobs: SharedJobs = Arc::new(Mutex::new(jobs_rx));
        let pool = WorkerPool::new(
            Arc::clone(&self.client),
            Arc::clone(&semaphore),
            jobs,
            rate_tx,
            ticks_tx,
            results_tx,
            self.config.acquire_timeout,
        );
        let mut pool_handle = Some(pool.start(&shutdown, worker_count));
        info!(
            "Supervisor running ({} workers, initial capacity {})",
            worker_count, initial_capacity
        );

        let mut current_capacity = initial_capacity;
        // Present exactly while paused: the pending signal and the RPM
        // snapshot taken after the pool drained.
        let mut pending: Option<(RateLimitSignal, u64)> = None;
        let pause_timer = sleep(Duration::ZERO);
        tokio::pin!(pause_timer);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                Some(signal) = rate_rx.recv(), if pending.is_none() => {
                    info!(
                        "Calculator rate limit: {} rpm allowed, pausing for {:?}",
                        signal.allowed_rpm, signal.retry_after
                    );
                    self.stats.increment(Outcome::RateLimitPause);
                    // The reporting worker already cancelled the pool token;
                    // wait for in-flight calls to finish their iteration so
                    // the quiet window really is quiet.
                    if let Some(handle) = pool_handle.take() {
                        handle.stop().await;
                    }
                    let observed = observer.stop().await;
                    pending = Some((signal, observed));
                    pause_timer.as_mut().reset(Instant::now() + signal.retry_after);
                }

                _ = &mut pause_timer, if pending.is_some() => {
                    let (signal, observed) = pending.take().expect("pause state present");

                    let new_capacity = retuned_capacity(
                        signal.allowed_rpm,
                        observed,
                        current_capacity,
                        initial_capacity,
                    );
                    info!(
                        "Resuming polling: observed {} rpm, capacity {} -> {}",
                        observed, current_capacity, new_capacity
                    );
                    // The pool is drained, so the swap happens immediately.
                    semaphore.resize(new_capacity).await;
                    current_capacity = new_capacity;
                    observer.start();
                    pool_handle = Some(pool.start(&shutdown, worker_count));
                }
            }
        }

        info!("Supervisor shutting down");
        if let Some(handle) = pool_handle.take() {
            handle.stop().await;
        }
        observer.stop().await;
        // Dropping the pool closes the result, tick, and rate streams.
        drop(pool);
        if let Err(e) = watcher_handle.await {
            warn!("Watcher failed to join: {e}");
        }
        info!("Supervisor stopped");
        Ok(())
    }
}

/// Next semaphore capacity after a pause cycle.
///
/// Aims the next run at the calculator's reported ceiling: with `observed`
/// requests per minute spent by `previous` concurrent slots, `allowed /
/// observed` slots land on the allowance. Zero observed RPM means the
/// window told us nothing, so the capacity is left alone.
fn retuned_capacity(allowed_rpm: u64, observed_rpm: u64, previous: u64, upper: u64) -> u64 {
    if observed_rpm == 0 {
        return previous;
    }
    (allowed_rpm / observed_rpm).clamp(1, upper)
}
