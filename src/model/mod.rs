//! Domain model: order identifiers and statuses, calculator DTOs, and the
//! fixed-point money type used at the storage and wire boundaries.

pub mod accrual;
pub mod amount;
pub mod order;

pub use accrual::{AccrualInfo, CalculatorStatus, RateLimitSignal};
pub use amount::Amount;
pub use order::{Order, OrderId, OrderStatus};
