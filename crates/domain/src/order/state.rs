//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Open ──► Pending ──► Paid
///   │         │
///   └─────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order is accumulating items.
    #[default]
    Open,

    /// Order was checked out and awaits payment.
    Pending,

    /// Payment was received.
    Paid,

    /// Order was cancelled.
    Cancelled,
}

impl OrderStatus {
    /// Returns true if items can be added or removed in this status.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderStatus::Open)
    }

    /// Returns true if the state machine allows moving to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Open, OrderStatus::Pending)
                | (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Open, OrderStatus::Cancelled)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "Open",
            OrderStatus::Pending => "Pending",
            OrderStatus::Paid => "Paid",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Returns the integer code used in storage.
    pub fn code(&self) -> i16 {
        match self {
            OrderStatus::Open => 0,
            OrderStatus::Pending => 1,
            OrderStatus::Paid => 2,
            OrderStatus::Cancelled => 3,
        }
    }

    /// Parses a storage code back into a status.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(OrderStatus::Open),
            1 => Some(OrderStatus::Pending),
            2 => Some(OrderStatus::Paid),
            3 => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
