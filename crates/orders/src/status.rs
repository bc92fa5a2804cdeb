use serde::{Deserialize, Serialize};

/// The one status vocabulary shared by every component.
///
/// ```text
/// unpaid → paid → preparing → shipped → completed
///   └→ cancelled    paid|preparing → refunding → refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Unpaid,
    Paid,
    Preparing,
    Shipped,
    Completed,
    Cancelled,
    Refunding,
    Refunded,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Payment has been applied (whatever happened afterwards).
    pub fn is_paid_or_later(self) -> bool {
        !matches!(self, OrderStatus::Unpaid | OrderStatus::Cancelled)
    }

    /// Stock and coupon commitments must be given back in these states.
    pub fn requires_compensation(self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled | OrderStatus::Refunding | OrderStatus::Refunded
        )
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Unpaid, Paid)
                | (Unpaid, Cancelled)
                | (Paid, Preparing)
                | (Preparing, Shipped)
                | (Shipped, Completed)
                | (Paid, Refunding)
                | (Preparing, Refunding)
                | (Refunding, Refunded)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Unpaid => "unpaid",
            OrderStatus::Paid => "paid",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunding => "refunding",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
