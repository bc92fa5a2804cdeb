//! The error taxonomy surfaced by the engine, and the non-error outcomes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_core::{DomainError, ProductId, VariantId};
use storefront_infra::command_dispatcher::DispatchError;
use storefront_infra::coupon_store::CouponStoreError;
use storefront_infra::intent_store::IntentStoreError;
use storefront_infra::order_index::OrderIndexError;
use storefront_infra::stock_store::StockStoreError;
use storefront_orders::{OrderNo, OrderStatus};

#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Malformed cart, delivery or command input. Rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        variant_id: Option<VariantId>,
        requested: u32,
        available: u32,
    },

    #[error("coupon unavailable: {0}")]
    CouponUnavailable(String),

    #[error("coupon already claimed")]
    CouponAlreadyClaimed,

    #[error("order not found")]
    OrderNotFound,

    /// The payment window closed; the caller must not charge.
    #[error("order {order_no} expired before payment")]
    OrderExpired { order_no: OrderNo },

    /// The order is cancelled: payment arrived after a user cancel, or the
    /// checkout was abandoned mid-flight. The caller must not charge.
    #[error("order {order_no} was cancelled")]
    OrderCancelled { order_no: OrderNo },

    #[error("external gateway failure: {0}")]
    ExternalGateway(String),

    #[error("store failure: {0}")]
    Store(String),
}

impl FulfillmentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<DomainError> for FulfillmentError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::NotFound => Self::OrderNotFound,
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<DispatchError> for FulfillmentError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Validation(msg) => Self::Validation(msg),
            DispatchError::NotFound => Self::OrderNotFound,
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<StockStoreError> for FulfillmentError {
    fn from(value: StockStoreError) -> Self {
        match value {
            StockStoreError::Insufficient {
                key,
                requested,
                available,
            } => Self::InsufficientStock {
                product_id: key.product_id,
                variant_id: key.variant_id,
                requested,
                available,
            },
            StockStoreError::UnknownKey(key) => Self::Validation(format!("product {key} is not stocked")),
            StockStoreError::ZeroQuantity => Self::Validation("quantity must be positive".to_string()),
            StockStoreError::Unavailable(msg) => Self::Store(msg),
        }
    }
}

impl From<CouponStoreError> for FulfillmentError {
    fn from(value: CouponStoreError) -> Self {
        match value {
            CouponStoreError::AlreadyClaimed { .. } => Self::CouponAlreadyClaimed,
            CouponStoreError::Rejected(rejection) => Self::CouponUnavailable(rejection.to_string()),
            CouponStoreError::UnknownCoupon(id) => Self::CouponUnavailable(format!("unknown coupon {id}")),
            CouponStoreError::Domain(err) => Self::CouponUnavailable(err.to_string()),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<IntentStoreError> for FulfillmentError {
    fn from(value: IntentStoreError) -> Self {
        Self::store(value)
    }
}

impl From<OrderIndexError> for FulfillmentError {
    fn from(value: OrderIndexError) -> Self {
        Self::store(value)
    }
}

/// Result of a guarded order transition.
///
/// A from-state mismatch is not an error: it usually means a concurrent retry
/// already moved the order, so the caller gets `Unchanged` with the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum Transition {
    Applied(OrderStatus),
    Unchanged(OrderStatus),
}

impl Transition {
    pub fn status(self) -> OrderStatus {
        match self {
            Transition::Applied(s) | Transition::Unchanged(s) => s,
        }
    }

    pub fn is_applied(self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefundOutcome {
    Refunded { gateway_refund_id: String },
    /// The gateway call failed. The order stays `refunding` for an operator.
    PendingManualResolution { reason: String },
    /// The order was not refundable from its current status.
    Unchanged { status: OrderStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_catalog::StockKey;

    #[test]
    fn insufficient_stock_names_the_item() {
        let product_id = ProductId::new();
        let err: FulfillmentError = StockStoreError::Insufficient {
            key: StockKey::product(product_id),
            requested: 3,
            available: 1,
        }
        .into();

        match err {
            FulfillmentError::InsufficientStock {
                product_id: p,
                requested,
                available,
                ..
            } => {
                assert_eq!(p, product_id);
                assert_eq!((requested, available), (3, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transition_exposes_status() {
        assert!(Transition::Applied(OrderStatus::Paid).is_applied());
        assert_eq!(Transition::Unchanged(OrderStatus::Cancelled).status(), OrderStatus::Cancelled);
    }
}
