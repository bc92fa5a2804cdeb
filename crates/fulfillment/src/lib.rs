//! Order fulfillment and inventory consistency engine.
//!
//! Takes a cart to a committed order without overselling stock, applies a
//! payment exactly once, and compensates stock and coupon holds on every
//! cancel, expiry and refund.
//!
//! Cross-entity consistency is a saga: each step commits locally (stock
//! reservation, coupon hold, order event), a durable reservation intent records
//! progress, and every undo is idempotent so it can be re-run by the
//! reconciliation sweep after a crash.

pub mod checkout;
pub mod compensation;
pub mod coupon_reservation;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod order_repository;
pub mod payment;
pub mod ports;
pub mod reconciliation;
pub mod refund;
pub mod stock_ledger;
pub mod sweeper;
pub mod wiring;

pub use checkout::{CartLine, CheckoutRequest};
pub use coupon_reservation::CouponReservation;
pub use engine::{Collaborators, EngineSettings, FulfillmentEngine};
pub use error::{FulfillmentError, RefundOutcome, Transition};
pub use order_repository::{OrderRepository, Step};
pub use payment::{OrderRef, PaymentSignal};
pub use ports::{
    GatewayError, InMemoryCatalog, InMemoryPaymentGateway, InMemoryPointsLedger, PaymentGateway, PointsLedger,
    ProductCatalog, RefundRequest,
};
pub use reconciliation::ReconcileReport;
pub use stock_ledger::{ReservedLine, StockLedger};
pub use sweeper::ExpirySweeper;
pub use wiring::{InMemoryEngine, InMemoryStack};
