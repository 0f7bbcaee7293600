//! Polling outcome statistics.
//!
//! Thread-safe counters for per-order outcomes and pause cycles, shared
//! across the watcher and supervisor with `Arc` and summarized at shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::model::CalculatorStatus;

/// One countable polling outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Outcome {
    Processed,
    Invalid,
    NoContent,
    StillProcessing,
    CalculatorFailed,
    AgentFailed,
    RateLimitPause,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Processed => "processed",
            Outcome::Invalid => "invalid",
            Outcome::NoContent => "no content",
            Outcome::StillProcessing => "still processing",
            Outcome::CalculatorFailed => "calculator failed",
            Outcome::AgentFailed => "agent failed",
            Outcome::RateLimitPause => "rate-limit pauses",
        }
    }

    fn from_status(status: CalculatorStatus) -> Self {
        match status {
            CalculatorStatus::Processed => Outcome::Processed,
            CalculatorStatus::Invalid => Outcome::Invalid,
            CalculatorStatus::NoContent => Outcome::NoContent,
            CalculatorStatus::Registered | CalculatorStatus::Processing => {
                Outcome::StillProcessing
            }
            CalculatorStatus::CalculatorFailed => Outcome::CalculatorFailed,
            CalculatorStatus::AgentFailed => Outcome::AgentFailed,
        }
    }
}

/// Thread-safe outcome tracker.
///
/// All counters are initialized to zero on creation, so `increment` never
/// has to allocate.
pub struct PollStats {
    counts: HashMap<Outcome, AtomicUsize>,
}

impl PollStats {
    pub fn new() -> Self {
        let mut counts = HashMap::new();
        for outcome in Outcome::iter() {
            counts.insert(outcome, AtomicUsize::new(0));
        }
        PollStats { counts }
    }

    pub fn increment(&self, outcome: Outcome) {
        if let Some(counter) = self.counts.get(&outcome) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records the outcome of one calculator verdict.
    pub fn record_status(&self, status: CalculatorStatus) {
        self.increment(Outcome::from_status(status));
    }

    pub fn get_count(&self, outcome: Outcome) -> usize {
        self.counts
            .get(&outcome)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Logs every non-zero counter.
    pub fn log_summary(&self) {
        log::info!("Polling outcome counts:");
        for outcome in Outcome::iter() {
            let count = self.get_count(outcome);
            if count > 0 {
                log::info!("   {}: {}", outcome.as_str(), count);
            }
        }
    }
}

impl Default for PollStats {
    fn default() -> Self {
        Self::new()
    }
}
