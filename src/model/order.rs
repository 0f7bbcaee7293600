//! Order identity and lifecycle status.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Amount;

/// Opaque, non-empty order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

/// Error constructing an [`OrderId`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("order id must be a non-empty string")]
pub struct EmptyOrderId;

impl OrderId {
    pub fn new(id: impl Into<String>) -> Result<Self, EmptyOrderId> {
        let id = id.into();
        if id.is_empty() {
            return Err(EmptyOrderId);
        }
        Ok(OrderId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored lifecycle status of an order.
///
/// `NEW → PROCESSING` on dispatch; `PROCESSING` moves to one of the terminal
/// statuses when a calculator verdict is persisted, or stays `PROCESSING`
/// (and becomes pollable again once stale) after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    /// Parses the TEXT column form written by [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(OrderStatus::New),
            "PROCESSING" => Some(OrderStatus::Processing),
            "PROCESSED" => Some(OrderStatus::Processed),
            "INVALID" => Some(OrderStatus::Invalid),
            _ => None,
        }
    }

    /// Terminal orders are never re-dispatched.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored accrual order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: String,
    pub status: OrderStatus,
    pub accrual: Option<Amount>,
    /// Upload time, epoch milliseconds UTC.
    pub uploaded_at: i64,
}
