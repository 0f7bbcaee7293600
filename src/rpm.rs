//! Observed request-per-minute measurement.
//!
//! Workers emit one tick per attempted calculator request; the observer
//! counts ticks between `start` and `stop` and reports
//! `floor(count / window_minutes)`. The supervisor snapshots this during a
//! pause cycle to retune semaphore capacity against the calculator's
//! reported ceiling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Below this window the elapsed time is unusable for a rate; the fallback
/// estimate divides by the tolerance instead (an upper bound, never zero).
const INTERVAL_TOLERANCE_MINUTES: f64 = 0.001; // 60 ms

/// Counts request ticks between `start` and `stop`.
///
/// The counting task holds the shared tick receiver for the duration of one
/// window, so consecutive windows observe a single stream without reopening
/// it. `stop` is idempotent; reading [`rpm`](Self::rpm) before the first stop
/// reports the fallback estimate.
pub struct RpmObserver {
    ticks: Arc<Mutex<mpsc::Receiver<()>>>,
    count: Arc<AtomicU64>,
    started_at: Instant,
    window: Option<Duration>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RpmObserver {
    pub fn new(ticks: mpsc::Receiver<()>) -> Self {
        RpmObserver {
            ticks: Arc::new(Mutex::new(ticks)),
            count: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
            window: None,
            stop: CancellationToken::new(),
            task: None,
        }
    }

    /// Opens a counting window: resets the counter and spawns the counting
    /// task. A previous window must have been stopped first.
    pub fn start(&mut self) {
        debug_assert!(self.task.is_none(), "observer started twice");

        self.count.store(0, Ordering::SeqCst);
        self.started_at = Instant::now();
        self.window = None;
        self.stop = CancellationToken::new();

        let ticks = Arc::clone(&self.ticks);
        let count = Arc::clone(&self.count);
        let stop = self.stop.clone();
        self.task = Some(tokio::spawn(async move {
            let mut receiver = ticks.lock().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    tick = receiver.recv() => match tick {
                        Some(()) => {
                            count.fetch_add(1, Ordering::SeqCst);
                        }
                        // Tick stream closed: shutdown in progress.
                        None => return,
                    }
                }
            }
        }));
    }

    /// Closes the window and returns the observed RPM. Idempotent.
    pub async fn stop(&mut self) -> u64 {
        if let Some(task) = self.task.take() {
            self.stop.cancel();
            if let Err(e) = task.await {
                log::warn!("RPM counting task failed to join: {e}");
            }
            self.window = Some(self.started_at.elapsed());
        }
        self.rpm()
    }

    /// Observed requests per minute for the last closed window.
    pub fn rpm(&self) -> u64 {
        let count = self.count.load(Ordering::SeqCst) as f64;
        let minutes = self
            .window
            .map(|w| w.as_secs_f64() / 60.0)
            .unwrap_or(0.0);
        if minutes < INTERVAL_TOLERANCE_MINUTES {
            log::warn!("RPM window shorter than tolerance, reporting upper-bound estimate");
            return (count / INTERVAL_TOLERANCE_MINUTES) as u64;
        }
        // Floor, so the retuned capacity never overshoots the ceiling.
        (count / minutes) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
        mpsc::channel(1024)
    }

    /// Sends `n` ticks and lets the counting task drain them. The 1 ms sleep
    /// only completes once every runnable task is idle, i.e. once the
    /// receiver is empty.
    async fn feed_ticks(sender: &mpsc::Sender<()>, n: usize) {
        for _ in 0..n {
            sender.send(()).await.expect("tick send");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_over_one_minute_window() {
        let (sender, receiver) = tick_channel();
        let mut observer = RpmObserver::new(receiver);

        observer.start();
        feed_ticks(&sender, 600).await;
        tokio::time::advance(Duration::from_secs(60) - Duration::from_millis(1)).await;

        let rpm = observer.stop().await;
        assert_eq!(rpm, 600, "600 ticks over 60s must report 600 rpm");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_floors_fractional_rate() {
        let (sender, receiver) = tick_channel();
        let mut observer = RpmObserver::new(receiver);

        observer.start();
        feed_ticks(&sender, 100).await;
        tokio::time::advance(Duration::from_secs(90) - Duration::from_millis(1)).await;

        // 100 ticks / 1.5 min = 66.66; floor to 66
        let rpm = observer.stop().await;
        assert_eq!(rpm, 66);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_window_reports_upper_bound() {
        let (sender, receiver) = tick_channel();
        let mut observer = RpmObserver::new(receiver);

        observer.start();
        feed_ticks(&sender, 5).await;

        // Window is ~1 ms, far below the 60 ms tolerance.
        let rpm = observer.stop().await;
        assert_eq!(
            rpm, 5000,
            "sub-tolerance window must use the tolerance divisor, not zero"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (sender, receiver) = tick_channel();
        let mut observer = RpmObserver::new(receiver);

        observer.start();
        feed_ticks(&sender, 60).await;
        tokio::time::advance(Duration::from_secs(60) - Duration::from_millis(1)).await;

        let first = observer.stop().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let second = observer.stop().await;
        assert_eq!(first, second, "second stop must not move the window");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_resets_the_counter() {
        let (sender, receiver) = tick_channel();
        let mut observer = RpmObserver::new(receiver);

        observer.start();
        feed_ticks(&sender, 120).await;
        tokio::time::advance(Duration::from_secs(60) - Duration::from_millis(1)).await;
        assert_eq!(observer.stop().await, 120);

        observer.start();
        feed_ticks(&sender, 30).await;
        tokio::time::advance(Duration::from_secs(60) - Duration::from_millis(1)).await;
        assert_eq!(
            observer.stop().await,
            30,
            "a new window must not inherit the previous count"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ticks_reports_zero() {
        let (_sender, receiver) = tick_channel();
        let mut observer = RpmObserver::new(receiver);

        observer.start();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(observer.stop().await, 0);
    }
}
