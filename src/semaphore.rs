//! Resizable counting semaphore bounding in-flight calculator requests.
//!
//! Unlike `tokio::sync::Semaphore`, capacity can be swapped at runtime:
//! `resize` blocks new acquirers, waits for every current holder to release,
//! swaps the capacity, and then reopens. The swap point is the drained window
//! after a pause cycle, so acquirers rarely observe it; those that do get
//! [`AcquireError::Unavailable`] and treat it like a timeout.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;

/// Why an acquisition did not produce a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// No slot freed up within the caller's budget.
    #[error("semaphore acquisition timed out")]
    Timeout,

    /// A resize is in progress; the semaphore is momentarily closed.
    #[error("semaphore unavailable during resize")]
    Unavailable,
}

struct State {
    capacity: u64,
    holders: u64,
    resizing: bool,
}

/// Counting semaphore with timed acquisition and safe dynamic capacity.
pub struct ResizableSemaphore {
    state: Mutex<State>,
    slot_freed: Notify,
    drained: Notify,
}

impl ResizableSemaphore {
    /// Creates a semaphore with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero; a zero-capacity semaphore can never
    /// make progress, so this is a programmer error.
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "semaphore capacity must be at least 1");
        ResizableSemaphore {
            state: Mutex::new(State {
                capacity,
                holders: 0,
                resizing: false,
            }),
            slot_freed: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Waits up to `timeout` for a slot.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<(), AcquireError> {
        match tokio::time::timeout(timeout, self.acquire_wait()).await {
            Ok(result) => result,
            Err(_) => Err(AcquireError::Timeout),
        }
    }

    async fn acquire_wait(&self) -> Result<(), AcquireError> {
        loop {
            let freed = self.slot_freed.notified();
            tokio::pin!(freed);
            // Register interest before inspecting state so a release between
            // the check and the await cannot be missed.
            freed.as_mut().enable();
            {
                let mut state = self.state.lock().expect("semaphore mutex poisoned");
                if state.resizing {
                    return Err(AcquireError::Unavailable);
                }
                if state.holders < state.capacity {
                    state.holders += 1;
                    return Ok(());
                }
            }
            freed.await;
        }
    }

    /// Returns a held slot.
    ///
    /// # Panics
    ///
    /// Panics when called without a matching acquire.
    pub fn release(&self) {
        let drained = {
            let mut state = self.state.lock().expect("semaphore mutex poisoned");
            assert!(state.holders > 0, "release without a matching acquire");
            state.holders -= 1;
            state.holders == 0 && state.resizing
        };
        if drained {
            self.drained.notify_waiters();
        }
        self.slot_freed.notify_one();
    }

    /// Swaps the capacity to `new_capacity`.
    ///
    /// Blocks new acquirers, waits for all current holders to release, then
    /// performs the swap atomically and reopens. Holders are never revoked.
    ///
    /// # Panics
    ///
    /// Panics when `new_capacity` is zero.
    pub async fn resize(&self, new_capacity: u64) {
        assert!(new_capacity > 0, "semaphore capacity must be at least 1");
        let mut first_pass = true;
        loop {
            let empty = self.drained.notified();
            tokio::pin!(empty);
            empty.as_mut().enable();
            {
                let mut state = self.state.lock().expect("semaphore mutex poisoned");
                state.resizing = true;
                if state.holders == 0 {
                    state.capacity = new_capacity;
                    state.resizing = false;
                    drop(state);
                    self.slot_freed.notify_waiters();
                    return;
                }
            }
            if first_pass {
                // Fail pending acquirers fast: they wake, observe the
                // resize, and report Unavailable instead of waiting it out.
                self.slot_freed.notify_waiters();
                first_pass = false;
            }
            empty.await;
        }
    }

    /// Current capacity.
    pub fn capacity(&self) -> u64 {
        self.state.lock().expect("semaphore mutex poisoned").capacity
    }

    /// Current holder count.
    pub fn holders(&self) -> u64 {
        self.state.lock().expect("semaphore mutex poisoned").holders
    }
}
