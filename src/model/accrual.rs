//! Calculator-side DTOs: the per-order verdict and the rate-limit signal.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Amount, OrderId, OrderStatus};

/// Status reported by the accrual calculator for one order.
///
/// `NoContent`, `CalculatorFailed` and `AgentFailed` never come over the
/// wire; they are synthesized locally when the calculator answers 204, when a
/// call fails, and when a worker cannot obtain a request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculatorStatus {
    Registered,
    Processing,
    Processed,
    Invalid,
    NoContent,
    CalculatorFailed,
    AgentFailed,
}

impl CalculatorStatus {
    /// Translates the calculator's verdict into the status to persist.
    ///
    /// `PROCESSED` and `NO_CONTENT` are terminal successes, `INVALID` is a
    /// terminal rejection, and everything else keeps the order in
    /// `PROCESSING` so the next watcher tick retries it.
    pub fn storage_status(&self) -> OrderStatus {
        match self {
            CalculatorStatus::Processed | CalculatorStatus::NoContent => OrderStatus::Processed,
            CalculatorStatus::Invalid => OrderStatus::Invalid,
            CalculatorStatus::Registered
            | CalculatorStatus::Processing
            | CalculatorStatus::CalculatorFailed
            | CalculatorStatus::AgentFailed => OrderStatus::Processing,
        }
    }
}

/// One calculator verdict, real or synthetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualInfo {
    #[serde(rename = "order")]
    pub order_id: OrderId,
    pub status: CalculatorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Amount>,
}

impl AccrualInfo {
    /// A synthetic verdict with no accrual, used for the locally produced
    /// statuses.
    pub fn synthetic(order_id: OrderId, status: CalculatorStatus) -> Self {
        AccrualInfo {
            order_id,
            status,
            accrual: None,
        }
    }
}

/// The calculator's reported ceiling, extracted from a 429 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSignal {
    /// How long the calculator asked us to stay quiet.
    pub retry_after: Duration,
    /// Requests-per-minute ceiling from the response body.
    pub allowed_rpm: u64,
}
