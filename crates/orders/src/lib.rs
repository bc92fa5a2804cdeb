//! Orders domain module (event-sourced).
//!
//! The order aggregate owns the canonical status and the amounts captured at
//! creation. Every transition is guarded by its expected "from" status, so a
//! retried or raced command is rejected with `DomainError::StateConflict` and the
//! caller can treat it as a no-op.

pub mod delivery;
pub mod number;
pub mod order;
pub mod pricing;
pub mod status;

pub use delivery::{Address, Delivery, DeliveryMethod, DeliveryRequest, PickupSlot};
pub use number::OrderNo;
pub use order::{
    CancelOrder, CancelReason, CompensationApplied, CompleteOrder, CompleteRefund, ConfirmPayment,
    CouponUse, MarkCompensated, Order, OrderCancelled, OrderCommand, OrderCompleted, OrderEvent,
    OrderLine, OrderPaid, OrderPlaced, OrderRefunded, OrderShipped, PaymentRecord, PlaceOrder,
    PointsRequirement, PreparationStarted, RecordRefundFailure, RefundFailed, RefundRecord,
    RefundRequested, RequestRefund, ShipOrder, StartPreparing,
};
pub use pricing::{OrderTotals, PricingRules};
pub use status::OrderStatus;

/// Aggregate type name used for order event streams.
pub const ORDER_AGGREGATE_TYPE: &str = "orders.order";
